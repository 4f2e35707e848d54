//! Risk tool handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use finhub_core::{HubError, RequestContext, ToolDescriptor};
use finhub_spoke::{ToolHandler, ToolRegistry};

use crate::{annualize, daily_log_volatility, historical_var, parametric_var};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum VarMethod {
    Parametric,
    Historical,
}

#[derive(Debug, Deserialize)]
struct VarInput {
    portfolio_value: f64,
    #[serde(default = "default_confidence")]
    confidence_level: f64,
    #[serde(default = "default_horizon")]
    horizon_days: u32,
    #[serde(default = "default_method")]
    method: VarMethod,
    #[serde(default)]
    daily_volatility: Option<f64>,
    #[serde(default)]
    returns: Vec<f64>,
}

fn default_confidence() -> f64 {
    0.95
}

fn default_horizon() -> u32 {
    1
}

fn default_method() -> VarMethod {
    VarMethod::Parametric
}

struct VarTool;

#[async_trait]
impl ToolHandler for VarTool {
    async fn call(&self, arguments: &Value, _ctx: &RequestContext) -> Result<Value, HubError> {
        let input: VarInput = serde_json::from_value(arguments.clone())
            .map_err(|e| HubError::invalid_params(e.to_string()))?;
        if !(0.0..1.0).contains(&input.confidence_level) || input.confidence_level == 0.0 {
            return Err(HubError::invalid_params(
                "confidence_level must be in (0, 1)",
            ));
        }

        let (var, method) = match input.method {
            VarMethod::Parametric => {
                let volatility = input.daily_volatility.ok_or_else(|| {
                    HubError::invalid_params("daily_volatility is required for parametric VaR")
                })?;
                if volatility < 0.0 {
                    return Err(HubError::invalid_params("daily_volatility must be >= 0"));
                }
                (
                    parametric_var(
                        input.portfolio_value,
                        volatility,
                        input.confidence_level,
                        input.horizon_days,
                    ),
                    "parametric",
                )
            }
            VarMethod::Historical => {
                let var = historical_var(
                    &input.returns,
                    input.confidence_level,
                    input.portfolio_value,
                )
                .ok_or_else(|| {
                    HubError::invalid_params("returns must be non-empty for historical VaR")
                })?;
                (var, "historical")
            }
        };

        let ratio = if input.portfolio_value > 0.0 {
            var / input.portfolio_value
        } else {
            0.0
        };
        let risk_level = match ratio {
            r if r < 0.02 => "low",
            r if r < 0.05 => "medium",
            _ => "high",
        };

        Ok(json!({
            "var": var,
            "confidence_level": input.confidence_level,
            "horizon_days": input.horizon_days,
            "method": method,
            "risk_level": risk_level,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct VolatilityInput {
    prices: Vec<f64>,
}

struct VolatilityTool;

#[async_trait]
impl ToolHandler for VolatilityTool {
    async fn call(&self, arguments: &Value, _ctx: &RequestContext) -> Result<Value, HubError> {
        let input: VolatilityInput = serde_json::from_value(arguments.clone())
            .map_err(|e| HubError::invalid_params(e.to_string()))?;
        let daily = daily_log_volatility(&input.prices).ok_or_else(|| {
            HubError::invalid_params("prices must hold at least two positive values")
        })?;
        Ok(json!({
            "daily_volatility": daily,
            "annualized_volatility": annualize(daily),
            "observations": input.prices.len(),
        }))
    }
}

/// Register the risk tool set.
pub fn register_risk_tools(registry: &mut ToolRegistry) {
    registry.register(
        ToolDescriptor {
            qualified_name: "risk.var".to_string(),
            description: "Value-at-Risk, parametric or historical.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "portfolio_value": {"type": "number", "minimum": 0},
                    "confidence_level": {"type": "number", "exclusiveMinimum": 0, "exclusiveMaximum": 1},
                    "horizon_days": {"type": "integer", "minimum": 1},
                    "method": {"type": "string", "enum": ["parametric", "historical"]},
                    "daily_volatility": {"type": "number", "minimum": 0},
                    "returns": {"type": "array", "items": {"type": "number"}}
                },
                "required": ["portfolio_value"]
            }),
            output_schema: None,
            service_name: String::new(),
        },
        Arc::new(VarTool),
    );

    registry.register(
        ToolDescriptor {
            qualified_name: "risk.volatility".to_string(),
            description: "Daily and annualized volatility from a price series.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "prices": {
                        "type": "array",
                        "items": {"type": "number"},
                        "minItems": 2
                    }
                },
                "required": ["prices"]
            }),
            output_schema: None,
            service_name: String::new(),
        },
        Arc::new(VolatilityTool),
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new("risk-spoke");
        register_risk_tools(&mut registry);
        registry
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn parametric_var_roundtrip() {
        let result = registry()
            .dispatch(
                "risk.var",
                &json!({
                    "portfolio_value": 1_000_000.0,
                    "daily_volatility": 0.02,
                    "confidence_level": 0.95
                }),
                &ctx(),
            )
            .await
            .unwrap();
        let var = result["var"].as_f64().unwrap();
        assert!((var - 32_900.0).abs() < 1.0);
        assert_eq!(result["method"], "parametric");
        assert_eq!(result["risk_level"], "medium");
    }

    #[tokio::test]
    async fn historical_var_uses_return_series() {
        let result = registry()
            .dispatch(
                "risk.var",
                &json!({
                    "portfolio_value": 100_000.0,
                    "method": "historical",
                    "confidence_level": 0.95,
                    "returns": [-0.08, -0.02, -0.01, 0.0, 0.01, 0.01, 0.02, 0.03, 0.04, 0.05]
                }),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(result["method"], "historical");
        assert!((result["var"].as_f64().unwrap() - 8_000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn parametric_without_volatility_is_invalid_params() {
        let err = registry()
            .dispatch("risk.var", &json!({"portfolio_value": 1000.0}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32602);
    }

    #[tokio::test]
    async fn volatility_tool_reports_both_scales() {
        let result = registry()
            .dispatch(
                "risk.volatility",
                &json!({"prices": [100.0, 101.0, 99.5, 102.0, 101.2]}),
                &ctx(),
            )
            .await
            .unwrap();
        let daily = result["daily_volatility"].as_f64().unwrap();
        let annual = result["annualized_volatility"].as_f64().unwrap();
        assert!(daily > 0.0);
        assert!((annual - daily * 252.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(result["observations"], 5);
    }

    #[tokio::test]
    async fn too_short_price_series_fails_schema() {
        let err = registry()
            .dispatch("risk.volatility", &json!({"prices": [100.0]}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32602);
    }
}
