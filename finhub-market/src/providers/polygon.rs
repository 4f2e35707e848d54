//! Polygon.io client: quotes (previous close), daily aggregates, and
//! reference data.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};

use finhub_core::{ProviderSettings, RequestContext};

use crate::aggregator::{DataOperation, Provider, ProviderError, RawResponse};

use super::{get_json, has_symbol, symbol_param};

const DEFAULT_BASE_URL: &str = "https://api.polygon.io";

pub struct PolygonProvider {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl PolygonProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
        }
    }

    fn base_url(&self) -> &str {
        self.settings.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    fn api_key(&self) -> String {
        self.settings
            .credential
            .as_ref()
            .map(|c| c.reveal().to_string())
            .unwrap_or_default()
    }

    fn history_days(params: &Value) -> i64 {
        params["days"].as_i64().filter(|d| *d > 0).unwrap_or(30)
    }
}

#[async_trait]
impl Provider for PolygonProvider {
    fn id(&self) -> &str {
        "polygon"
    }

    fn supports(&self, operation: DataOperation, params: &Value) -> bool {
        matches!(
            operation,
            DataOperation::Quote | DataOperation::PriceHistory | DataOperation::CompanyProfile
        ) && has_symbol(params)
    }

    async fn fetch(
        &self,
        operation: DataOperation,
        params: &Value,
        ctx: &RequestContext,
    ) -> Result<RawResponse, ProviderError> {
        let symbol = symbol_param(params)?;
        let key = self.api_key();
        let base = self.base_url();

        let body = match operation {
            DataOperation::Quote => {
                let url = format!("{base}/v2/aggs/ticker/{symbol}/prev");
                get_json(
                    &self.client,
                    &url,
                    &[("adjusted", "true".to_string()), ("apiKey", key)],
                    ctx,
                )
                .await?
            }
            DataOperation::PriceHistory => {
                let to = Utc::now().date_naive();
                let from = to - ChronoDuration::days(Self::history_days(params));
                let url = format!("{base}/v2/aggs/ticker/{symbol}/range/1/day/{from}/{to}");
                get_json(
                    &self.client,
                    &url,
                    &[
                        ("adjusted", "true".to_string()),
                        ("sort", "asc".to_string()),
                        ("apiKey", key),
                    ],
                    ctx,
                )
                .await?
            }
            DataOperation::CompanyProfile => {
                let url = format!("{base}/v3/reference/tickers/{symbol}");
                get_json(&self.client, &url, &[("apiKey", key)], ctx).await?
            }
            DataOperation::News => {
                return Err(ProviderError::Malformed("unsupported operation".to_string()));
            }
        };

        // Polygon answers 200 with an empty result set for unknown
        // tickers.
        let empty = match operation {
            DataOperation::CompanyProfile => body["results"].is_null(),
            _ => body["results"].as_array().is_none_or(|r| r.is_empty()),
        };
        if empty {
            return Err(ProviderError::NotFound);
        }

        Ok(RawResponse { operation, body })
    }

    fn normalize(&self, raw: RawResponse) -> Result<Value, ProviderError> {
        match raw.operation {
            DataOperation::Quote => {
                let result = raw.body["results"]
                    .as_array()
                    .and_then(|r| r.first())
                    .ok_or_else(|| ProviderError::Malformed("missing results".to_string()))?;
                let close = result["c"]
                    .as_f64()
                    .ok_or_else(|| ProviderError::Malformed("missing close".to_string()))?;
                Ok(json!({
                    "symbol": result["T"].as_str().unwrap_or_default(),
                    "price": close,
                    "open": result["o"],
                    "high": result["h"],
                    "low": result["l"],
                    "volume": result["v"],
                }))
            }
            DataOperation::PriceHistory => {
                let results = raw.body["results"]
                    .as_array()
                    .ok_or_else(|| ProviderError::Malformed("missing results".to_string()))?;
                let candles: Vec<Value> = results
                    .iter()
                    .map(|bar| {
                        json!({
                            "timestamp": bar["t"],
                            "open": bar["o"],
                            "high": bar["h"],
                            "low": bar["l"],
                            "close": bar["c"],
                            "volume": bar["v"],
                        })
                    })
                    .collect();
                Ok(json!({
                    "symbol": raw.body["ticker"].as_str().unwrap_or_default(),
                    "interval": "1d",
                    "candles": candles,
                }))
            }
            DataOperation::CompanyProfile => {
                let result = &raw.body["results"];
                if result.is_null() {
                    return Err(ProviderError::Malformed("missing results".to_string()));
                }
                Ok(json!({
                    "symbol": result["ticker"].as_str().unwrap_or_default(),
                    "name": result["name"],
                    "exchange": result["primary_exchange"],
                    "currency": result["currency_name"],
                    "market_cap": result["market_cap"],
                }))
            }
            DataOperation::News => {
                Err(ProviderError::Malformed("unsupported operation".to_string()))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> PolygonProvider {
        PolygonProvider::new(ProviderSettings::default())
    }

    #[test]
    fn supports_quotes_history_and_profiles() {
        let p = provider();
        let params = json!({"symbol": "AAPL"});
        assert!(p.supports(DataOperation::Quote, &params));
        assert!(p.supports(DataOperation::PriceHistory, &params));
        assert!(p.supports(DataOperation::CompanyProfile, &params));
        assert!(!p.supports(DataOperation::News, &params));
        assert!(!p.supports(DataOperation::Quote, &json!({})));
    }

    #[test]
    fn normalizes_prev_close_into_quote() {
        let raw = RawResponse {
            operation: DataOperation::Quote,
            body: json!({
                "ticker": "AAPL",
                "status": "OK",
                "results": [
                    {"T": "AAPL", "c": 187.2, "h": 189.4, "l": 186.1, "o": 188.0, "v": 48210934.0, "t": 1729000000000i64}
                ]
            }),
        };
        let quote = provider().normalize(raw).unwrap();
        assert_eq!(quote["symbol"], "AAPL");
        assert_eq!(quote["price"], 187.2);
        assert_eq!(quote["high"], 189.4);
    }

    #[test]
    fn normalizes_aggregates_into_candles() {
        let raw = RawResponse {
            operation: DataOperation::PriceHistory,
            body: json!({
                "ticker": "MSFT",
                "results": [
                    {"t": 1, "o": 10.0, "h": 12.0, "l": 9.5, "c": 11.0, "v": 100.0},
                    {"t": 2, "o": 11.0, "h": 13.0, "l": 10.5, "c": 12.5, "v": 150.0}
                ]
            }),
        };
        let history = provider().normalize(raw).unwrap();
        assert_eq!(history["symbol"], "MSFT");
        let candles = history["candles"].as_array().unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1]["close"], 12.5);
    }

    #[test]
    fn missing_close_is_malformed() {
        let raw = RawResponse {
            operation: DataOperation::Quote,
            body: json!({"results": [{"T": "AAPL"}]}),
        };
        assert!(matches!(
            provider().normalize(raw),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn normalizes_reference_ticker_into_profile() {
        let raw = RawResponse {
            operation: DataOperation::CompanyProfile,
            body: json!({
                "results": {
                    "ticker": "AAPL",
                    "name": "Apple Inc.",
                    "primary_exchange": "XNAS",
                    "currency_name": "usd",
                    "market_cap": 2900000000000.0f64
                }
            }),
        };
        let profile = provider().normalize(raw).unwrap();
        assert_eq!(profile["name"], "Apple Inc.");
        assert_eq!(profile["exchange"], "XNAS");
    }
}
