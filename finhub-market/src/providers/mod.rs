//! Upstream market-data providers.
//!
//! Thin HTTP clients, one per vendor, each mapping HTTP failures onto the
//! typed provider error kinds and normalizing the vendor payload into the
//! common quote / candle / news / profile shapes. API keys ride as query
//! parameters and never appear in logs or error messages.

pub mod finnhub;
pub mod polygon;
pub mod twelve_data;

pub use finnhub::FinnhubProvider;
pub use polygon::PolygonProvider;
pub use twelve_data::TwelveDataProvider;

use std::sync::Arc;

use serde_json::Value;

use finhub_core::{AggregatorConfig, ProviderSettings, RequestContext};

use crate::aggregator::{Provider, ProviderError};

/// Build the full provider set from configuration; the aggregator orders
/// them by `provider_order`.
pub fn build_providers(config: &AggregatorConfig) -> Vec<Arc<dyn Provider>> {
    let settings = |id: &str| -> ProviderSettings {
        config.providers.get(id).cloned().unwrap_or_default()
    };
    vec![
        Arc::new(PolygonProvider::new(settings("polygon"))),
        Arc::new(TwelveDataProvider::new(settings("twelve-data"))),
        Arc::new(FinnhubProvider::new(settings("finnhub"))),
    ]
}

/// Map an HTTP status onto a provider error kind; `None` means success.
pub(crate) fn classify_status(status: reqwest::StatusCode) -> Option<ProviderError> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        429 => ProviderError::RateLimited,
        401 | 403 => ProviderError::PermanentUnavailable(format!("status {status}")),
        404 => ProviderError::NotFound,
        s if (500..600).contains(&s) => ProviderError::Transient(format!("status {status}")),
        _ => ProviderError::Transient(format!("status {status}")),
    })
}

/// GET a JSON document under the context's remaining budget.
pub(crate) async fn get_json(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, String)],
    ctx: &RequestContext,
) -> Result<Value, ProviderError> {
    let response = client
        .get(url)
        .query(query)
        .timeout(ctx.remaining())
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ProviderError::Transient("timed out".to_string())
            } else {
                ProviderError::Transient("request failed".to_string())
            }
        })?;

    if let Some(err) = classify_status(response.status()) {
        return Err(err);
    }
    response
        .json::<Value>()
        .await
        .map_err(|_| ProviderError::Malformed("response was not JSON".to_string()))
}

/// Read `params.symbol` as an uppercase ticker.
pub(crate) fn symbol_param(params: &Value) -> Result<String, ProviderError> {
    params["symbol"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_uppercase())
        .ok_or_else(|| ProviderError::Malformed("missing symbol".to_string()))
}

pub(crate) fn has_symbol(params: &Value) -> bool {
    params["symbol"].as_str().is_some_and(|s| !s.is_empty())
}
