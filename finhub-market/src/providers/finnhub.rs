//! Finnhub client: quotes, company news, and company profiles.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};

use finhub_core::{ProviderSettings, RequestContext};

use crate::aggregator::{DataOperation, Provider, ProviderError, RawResponse};

use super::{get_json, has_symbol, symbol_param};

const DEFAULT_BASE_URL: &str = "https://finnhub.io/api/v1";

pub struct FinnhubProvider {
    settings: ProviderSettings,
    client: reqwest::Client,
}

impl FinnhubProvider {
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
}

#[async_trait]
impl Provider for FinnhubProvider {
    fn id(&self) -> &str {
        "finnhub"
    }

    fn supports(&self, operation: DataOperation, params: &Value) -> bool {
        matches!(
            operation,
            DataOperation::Quote | DataOperation::News | DataOperation::CompanyProfile
        ) && has_symbol(params)
    }

    async fn fetch(
        &self,
        operation: DataOperation,
        params: &Value,
        ctx: &RequestContext,
    ) -> Result<RawResponse, ProviderError> {
        let symbol = symbol_param(params)?;
        let token = self.api_key();
        let base = self.base_url();

        let body = match operation {
            DataOperation::Quote => {
                let mut body = get_json(
                    &self.client,
                    &format!("{base}/quote"),
                    &[("symbol", symbol.clone()), ("token", token)],
                    ctx,
                )
                .await?;
                // Finnhub answers unknown symbols with an all-zero quote.
                if body["c"].as_f64().unwrap_or(0.0) == 0.0
                    && body["t"].as_i64().unwrap_or(0) == 0
                {
                    return Err(ProviderError::NotFound);
                }
                // The quote payload does not echo the ticker back.
                if let Some(obj) = body.as_object_mut() {
                    obj.insert("symbol".to_string(), Value::String(symbol));
                }
                body
            }
            DataOperation::News => {
                let to = Utc::now().date_naive();
                let from = to - ChronoDuration::days(7);
                get_json(
                    &self.client,
                    &format!("{base}/company-news"),
                    &[
                        ("symbol", symbol),
                        ("from", from.to_string()),
                        ("to", to.to_string()),
                        ("token", token),
                    ],
                    ctx,
                )
                .await?
            }
            DataOperation::CompanyProfile => {
                let body = get_json(
                    &self.client,
                    &format!("{base}/stock/profile2"),
                    &[("symbol", symbol), ("token", token)],
                    ctx,
                )
                .await?;
                if body.as_object().is_some_and(|o| o.is_empty()) {
                    return Err(ProviderError::NotFound);
                }
                body
            }
            DataOperation::PriceHistory => {
                return Err(ProviderError::Malformed("unsupported operation".to_string()));
            }
        };

        Ok(RawResponse { operation, body })
    }

    fn normalize(&self, raw: RawResponse) -> Result<Value, ProviderError> {
        match raw.operation {
            DataOperation::Quote => {
                let body = &raw.body;
                let price = body["c"]
                    .as_f64()
                    .ok_or_else(|| ProviderError::Malformed("missing current price".to_string()))?;
                Ok(json!({
                    "symbol": body["symbol"],
                    "price": price,
                    "open": body["o"],
                    "high": body["h"],
                    "low": body["l"],
                    "previous_close": body["pc"],
                    "timestamp": body["t"],
                }))
            }
            DataOperation::News => {
                let articles = raw
                    .body
                    .as_array()
                    .ok_or_else(|| ProviderError::Malformed("expected article list".to_string()))?
                    .iter()
                    .map(|article| {
                        json!({
                            "headline": article["headline"],
                            "source": article["source"],
                            "url": article["url"],
                            "published_at": article["datetime"],
                            "summary": article["summary"],
                        })
                    })
                    .collect::<Vec<Value>>();
                Ok(json!({ "articles": articles }))
            }
            DataOperation::CompanyProfile => {
                let body = &raw.body;
                if body["ticker"].is_null() && body["name"].is_null() {
                    return Err(ProviderError::Malformed("empty profile".to_string()));
                }
                Ok(json!({
                    "symbol": body["ticker"],
                    "name": body["name"],
                    "exchange": body["exchange"],
                    "currency": body["currency"],
                    "market_cap": body["marketCapitalization"],
                }))
            }
            DataOperation::PriceHistory => {
                Err(ProviderError::Malformed("unsupported operation".to_string()))
            }
        }
    }
}
