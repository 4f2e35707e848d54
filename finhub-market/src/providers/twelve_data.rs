//! Twelve Data client: quotes and daily time series.
//!
//! Twelve Data reports failures as a 200 with `{"code": ..., "status":
//! "error"}` in the body, so classification happens on the body as well
//! as the HTTP status. Numeric fields arrive as strings.

use async_trait::async_trait;
use serde_json::{json, Value};

use finhub_core::{ProviderSettings, RequestContext};

use crate::aggregator::{DataOperation, Provider, ProviderError, RawResponse};

use super::{get_json, has_symbol, symbol_param};

const DEFAULT_BASE_URL: &str = "https://api.twelvedata.com";

pub struct TwelveDataProvider {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl TwelveDataProvider {
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

    /// Body-level error classification.
    fn check_body(body: &Value) -> Result<(), ProviderError> {
        if body["status"].as_str() != Some("error") {
            return Ok(());
        }
        match body["code"].as_i64() {
            Some(404) => Err(ProviderError::NotFound),
            Some(429) => Err(ProviderError::RateLimited),
            Some(401) | Some(403) => {
                Err(ProviderError::PermanentUnavailable("rejected key".to_string()))
            }
            other => Err(ProviderError::Transient(format!(
                "vendor error code {other:?}"
            ))),
        }
    }

    fn parse_number(value: &Value, field: &str) -> Result<f64, ProviderError> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| ProviderError::Malformed(format!("bad number in {field}"))),
            Value::String(s) => s
                .parse::<f64>()
                .map_err(|_| ProviderError::Malformed(format!("bad number in {field}"))),
            _ => Err(ProviderError::Malformed(format!("missing {field}"))),
        }
    }
}

#[async_trait]
impl Provider for TwelveDataProvider {
    fn id(&self) -> &str {
        "twelve-data"
    }

    fn supports(&self, operation: DataOperation, params: &Value) -> bool {
        matches!(
            operation,
            DataOperation::Quote | DataOperation::PriceHistory
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
                get_json(
                    &self.client,
                    &format!("{base}/quote"),
                    &[("symbol", symbol), ("apikey", key)],
                    ctx,
                )
                .await?
            }
            DataOperation::PriceHistory => {
                let size = params["days"].as_i64().filter(|d| *d > 0).unwrap_or(30);
                get_json(
                    &self.client,
                    &format!("{base}/time_series"),
                    &[
                        ("symbol", symbol),
                        ("interval", "1day".to_string()),
                        ("outputsize", size.to_string()),
                        ("apikey", key),
                    ],
                    ctx,
                )
                .await?
            }
            _ => return Err(ProviderError::Malformed("unsupported operation".to_string())),
        };

        Self::check_body(&body)?;
        Ok(RawResponse { operation, body })
    }

    fn normalize(&self, raw: RawResponse) -> Result<Value, ProviderError> {
        match raw.operation {
            DataOperation::Quote => {
                let body = &raw.body;
                Ok(json!({
                    "symbol": body["symbol"].as_str().unwrap_or_default(),
                    "price": Self::parse_number(&body["close"], "close")?,
                    "open": Self::parse_number(&body["open"], "open")?,
                    "high": Self::parse_number(&body["high"], "high")?,
                    "low": Self::parse_number(&body["low"], "low")?,
                    "volume": body["volume"].as_str().and_then(|v| v.parse::<f64>().ok()),
                    "currency": body["currency"],
                }))
            }
            DataOperation::PriceHistory => {
                let values = raw.body["values"]
                    .as_array()
                    .ok_or_else(|| ProviderError::Malformed("missing values".to_string()))?;
                let mut candles = Vec::with_capacity(values.len());
                // Twelve Data returns newest-first; the common shape is
                // oldest-first.
                for bar in values.iter().rev() {
                    candles.push(json!({
                        "timestamp": bar["datetime"],
                        "open": Self::parse_number(&bar["open"], "open")?,
                        "high": Self::parse_number(&bar["high"], "high")?,
                        "low": Self::parse_number(&bar["low"], "low")?,
                        "close": Self::parse_number(&bar["close"], "close")?,
                        "volume": bar["volume"].as_str().and_then(|v| v.parse::<f64>().ok()),
                    }));
                }
                Ok(json!({
                    "symbol": raw.body["meta"]["symbol"].as_str().unwrap_or_default(),
                    "interval": "1d",
                    "candles": candles,
                }))
            }
            _ => Err(ProviderError::Malformed("unsupported operation".to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn provider() -> TwelveDataProvider {
        TwelveDataProvider::new(ProviderSettings::default())
    }

    #[test]
    fn supports_quote_and_history_only() {
        let p = provider();
        let params = json!({"symbol": "AAPL"});
        assert!(p.supports(DataOperation::Quote, &params));
        assert!(p.supports(DataOperation::PriceHistory, &params));
        assert!(!p.supports(DataOperation::News, &params));
        assert!(!p.supports(DataOperation::CompanyProfile, &params));
    }

    #[test]
    fn body_error_codes_classify() {
        assert!(matches!(
            TwelveDataProvider::check_body(&json!({"status": "error", "code": 404})),
            Err(ProviderError::NotFound)
        ));
        assert!(matches!(
            TwelveDataProvider::check_body(&json!({"status": "error", "code": 429})),
            Err(ProviderError::RateLimited)
        ));
        assert!(matches!(
            TwelveDataProvider::check_body(&json!({"status": "error", "code": 401})),
            Err(ProviderError::PermanentUnavailable(_))
        ));
        assert!(TwelveDataProvider::check_body(&json!({"status": "ok"})).is_ok());
    }

    #[test]
    fn normalizes_string_numbers_in_quote() {
        let raw = RawResponse {
            operation: DataOperation::Quote,
            body: json!({
                "symbol": "AAPL",
                "open": "188.00",
                "high": "189.40",
                "low": "186.10",
                "close": "187.20",
                "volume": "48210934",
                "currency": "USD"
            }),
        };
        let quote = provider().normalize(raw).unwrap();
        assert_eq!(quote["price"], 187.2);
        assert_eq!(quote["currency"], "USD");
    }

    #[test]
    fn unparseable_close_is_malformed() {
        let raw = RawResponse {
            operation: DataOperation::Quote,
            body: json!({"symbol": "AAPL", "open": "1", "high": "2", "low": "0.5", "close": "n/a"}),
        };
        assert!(matches!(
            provider().normalize(raw),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn time_series_is_reversed_to_oldest_first() {
        let raw = RawResponse {
            operation: DataOperation::PriceHistory,
            body: json!({
                "meta": {"symbol": "AAPL"},
                "values": [
                    {"datetime": "2026-07-31", "open": "2", "high": "3", "low": "1", "close": "2.5", "volume": "10"},
                    {"datetime": "2026-07-30", "open": "1", "high": "2", "low": "0.5", "close": "1.5", "volume": "20"}
                ]
            }),
        };
        let history = provider().normalize(raw).unwrap();
        let candles = history["candles"].as_array().unwrap();
        assert_eq!(candles[0]["timestamp"], "2026-07-30");
        assert_eq!(candles[1]["timestamp"], "2026-07-31");
    }
}
