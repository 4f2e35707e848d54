//! Portfolio tool handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use finhub_core::{HubError, RequestContext, ToolDescriptor};
use finhub_spoke::{ToolHandler, ToolRegistry};

use crate::{inverse_variance_weights, portfolio_return, portfolio_volatility, sharpe_ratio};

#[derive(Debug, Deserialize)]
struct AssetInput {
    symbol: String,
    expected_return: f64,
    variance: f64,
}

#[derive(Debug, Deserialize)]
struct OptimizeInput {
    assets: Vec<AssetInput>,
}

struct OptimizeTool;

#[async_trait]
impl ToolHandler for OptimizeTool {
    async fn call(&self, arguments: &Value, _ctx: &RequestContext) -> Result<Value, HubError> {
        let input: OptimizeInput = serde_json::from_value(arguments.clone())
            .map_err(|e| HubError::invalid_params(e.to_string()))?;
        if input.assets.is_empty() {
            return Err(HubError::invalid_params("assets must be non-empty"));
        }

        let variances: Vec<f64> = input.assets.iter().map(|a| a.variance).collect();
        let weights = inverse_variance_weights(&variances)
            .ok_or_else(|| HubError::invalid_params("variances must be non-negative"))?;
        let returns: Vec<f64> = input.assets.iter().map(|a| a.expected_return).collect();

        let expected = portfolio_return(&weights, &returns);
        let volatility = portfolio_volatility(&weights, &variances);

        let allocation: BTreeMap<&str, f64> = input
            .assets
            .iter()
            .zip(&weights)
            .map(|(asset, weight)| (asset.symbol.as_str(), *weight))
            .collect();

        Ok(json!({
            "allocation": allocation,
            "expected_return": expected,
            "volatility": volatility,
            "sharpe_ratio": sharpe_ratio(expected, volatility),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct HoldingInput {
    symbol: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct RebalanceInput {
    holdings: Vec<HoldingInput>,
    targets: BTreeMap<String, f64>,
    #[serde(default = "default_threshold")]
    threshold: f64,
}

fn default_threshold() -> f64 {
    0.05
}

struct RebalanceTool;

#[async_trait]
impl ToolHandler for RebalanceTool {
    async fn call(&self, arguments: &Value, _ctx: &RequestContext) -> Result<Value, HubError> {
        let input: RebalanceInput = serde_json::from_value(arguments.clone())
            .map_err(|e| HubError::invalid_params(e.to_string()))?;
        let total: f64 = input.holdings.iter().map(|h| h.value).sum();
        if total <= 0.0 {
            return Err(HubError::invalid_params("total holdings value must be > 0"));
        }
        let target_sum: f64 = input.targets.values().sum();
        if (target_sum - 1.0).abs() > 1e-6 {
            return Err(HubError::invalid_params("target weights must sum to 1"));
        }

        let mut drift = BTreeMap::new();
        let mut trades = Vec::new();
        for holding in &input.holdings {
            let current = holding.value / total;
            let target = input.targets.get(&holding.symbol).copied().unwrap_or(0.0);
            let delta = current - target;
            drift.insert(holding.symbol.clone(), delta);

            if delta.abs() > input.threshold {
                trades.push(json!({
                    "symbol": holding.symbol,
                    "action": if delta > 0.0 { "sell" } else { "buy" },
                    "amount": (delta.abs() * total),
                }));
            }
        }
        // Targets with no current holding are pure buys.
        for (symbol, target) in &input.targets {
            if !input.holdings.iter().any(|h| &h.symbol == symbol) && *target > input.threshold {
                drift.insert(symbol.clone(), -target);
                trades.push(json!({
                    "symbol": symbol,
                    "action": "buy",
                    "amount": target * total,
                }));
            }
        }

        Ok(json!({
            "drift": drift,
            "trades": trades,
            "rebalancing_needed": !trades.is_empty(),
            "total_value": total,
        }))
    }
}

/// Register the portfolio tool set.
pub fn register_portfolio_tools(registry: &mut ToolRegistry) {
    registry.register(
        ToolDescriptor {
            qualified_name: "portfolio.optimize".to_string(),
            description: "Inverse-variance allocation with portfolio statistics.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "assets": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "properties": {
                                "symbol": {"type": "string"},
                                "expected_return": {"type": "number"},
                                "variance": {"type": "number", "minimum": 0}
                            },
                            "required": ["symbol", "expected_return", "variance"]
                        }
                    }
                },
                "required": ["assets"]
            }),
            output_schema: None,
            service_name: String::new(),
        },
        Arc::new(OptimizeTool),
    );

    registry.register(
        ToolDescriptor {
            qualified_name: "portfolio.rebalance".to_string(),
            description: "Drift against target weights and the trades to close it.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "holdings": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "properties": {
                                "symbol": {"type": "string"},
                                "value": {"type": "number", "minimum": 0}
                            },
                            "required": ["symbol", "value"]
                        }
                    },
                    "targets": {
                        "type": "object",
                        "additionalProperties": {"type": "number", "minimum": 0, "maximum": 1}
                    },
                    "threshold": {"type": "number", "minimum": 0, "maximum": 1}
                },
                "required": ["holdings", "targets"]
            }),
            output_schema: None,
            service_name: String::new(),
        },
        Arc::new(RebalanceTool),
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new("portfolio-spoke");
        register_portfolio_tools(&mut registry);
        registry
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn optimize_favors_the_calmer_asset() {
        let result = registry()
            .dispatch(
                "portfolio.optimize",
                &json!({
                    "assets": [
                        {"symbol": "AAPL", "expected_return": 0.12, "variance": 0.04},
                        {"symbol": "BND", "expected_return": 0.04, "variance": 0.01}
                    ]
                }),
                &ctx(),
            )
            .await
            .unwrap();

        let aapl = result["allocation"]["AAPL"].as_f64().unwrap();
        let bnd = result["allocation"]["BND"].as_f64().unwrap();
        assert!(bnd > aapl);
        assert!(((aapl + bnd) - 1.0).abs() < 1e-9);
        assert!(result["expected_return"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn optimize_rejects_empty_assets() {
        let err = registry()
            .dispatch("portfolio.optimize", &json!({"assets": []}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32602);
    }

    #[tokio::test]
    async fn rebalance_flags_drift_above_threshold() {
        let result = registry()
            .dispatch(
                "portfolio.rebalance",
                &json!({
                    "holdings": [
                        {"symbol": "AAPL", "value": 70_000.0},
                        {"symbol": "BND", "value": 30_000.0}
                    ],
                    "targets": {"AAPL": 0.5, "BND": 0.5},
                    "threshold": 0.05
                }),
                &ctx(),
            )
            .await
            .unwrap();

        assert_eq!(result["rebalancing_needed"], true);
        let trades = result["trades"].as_array().unwrap();
        assert_eq!(trades.len(), 2);
        let sell = trades.iter().find(|t| t["symbol"] == "AAPL").unwrap();
        assert_eq!(sell["action"], "sell");
        assert!((sell["amount"].as_f64().unwrap() - 20_000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn rebalance_within_band_needs_nothing() {
        let result = registry()
            .dispatch(
                "portfolio.rebalance",
                &json!({
                    "holdings": [
                        {"symbol": "AAPL", "value": 51_000.0},
                        {"symbol": "BND", "value": 49_000.0}
                    ],
                    "targets": {"AAPL": 0.5, "BND": 0.5}
                }),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(result["rebalancing_needed"], false);
        assert!(result["trades"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rebalance_requires_normalized_targets() {
        let err = registry()
            .dispatch(
                "portfolio.rebalance",
                &json!({
                    "holdings": [{"symbol": "AAPL", "value": 100.0}],
                    "targets": {"AAPL": 0.6}
                }),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32602);
    }

    #[tokio::test]
    async fn missing_target_becomes_a_buy() {
        let result = registry()
            .dispatch(
                "portfolio.rebalance",
                &json!({
                    "holdings": [{"symbol": "AAPL", "value": 100_000.0}],
                    "targets": {"AAPL": 0.8, "VTI": 0.2}
                }),
                &ctx(),
            )
            .await
            .unwrap();
        let trades = result["trades"].as_array().unwrap();
        let buy = trades.iter().find(|t| t["symbol"] == "VTI").unwrap();
        assert_eq!(buy["action"], "buy");
        assert!((buy["amount"].as_f64().unwrap() - 20_000.0).abs() < 1e-6);
    }
}
