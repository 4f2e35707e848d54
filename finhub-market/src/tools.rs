//! Market tool handlers.
//!
//! Every market tool is the same shape: validate arguments, run one
//! aggregator operation, return the normalized envelope. One handler
//! type parameterized by operation keeps the dispatch table flat.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use finhub_core::{HubError, RequestContext, ToolDescriptor};
use finhub_spoke::{ToolHandler, ToolRegistry};

use crate::aggregator::{DataAggregator, DataOperation};

struct AggregatorTool {
    aggregator: Arc<DataAggregator>,
    operation: DataOperation,
}

#[async_trait]
impl ToolHandler for AggregatorTool {
    async fn call(&self, arguments: &Value, ctx: &RequestContext) -> Result<Value, HubError> {
        let envelope = self.aggregator.request(self.operation, arguments, ctx).await?;
        serde_json::to_value(envelope).map_err(|e| HubError::internal(e.to_string()))
    }
}

fn symbol_schema(extra_properties: Value) -> Value {
    let mut properties = json!({
        "symbol": {
            "type": "string",
            "description": "Ticker symbol, e.g. AAPL"
        }
    });
    if let (Some(base), Some(extra)) = (properties.as_object_mut(), extra_properties.as_object())
    {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": ["symbol"]
    })
}

/// Register the market tool set against the aggregator.
pub fn register_market_tools(registry: &mut ToolRegistry, aggregator: Arc<DataAggregator>) {
    let tools = [
        (
            "market.stock_quote",
            "Latest quote for a symbol, served from the provider chain or cache.",
            DataOperation::Quote,
            symbol_schema(json!({})),
        ),
        (
            "market.price_history",
            "Daily OHLCV candles for a symbol.",
            DataOperation::PriceHistory,
            symbol_schema(json!({
                "days": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 365,
                    "description": "Trading days of history (default 30)"
                }
            })),
        ),
        (
            "market.company_news",
            "Recent company news for a symbol.",
            DataOperation::News,
            symbol_schema(json!({})),
        ),
        (
            "market.company_profile",
            "Reference data for a symbol: name, exchange, currency, market cap.",
            DataOperation::CompanyProfile,
            symbol_schema(json!({})),
        ),
    ];

    for (name, description, operation, input_schema) in tools {
        registry.register(
            ToolDescriptor {
                qualified_name: name.to_string(),
                description: description.to_string(),
                input_schema,
                output_schema: None,
                service_name: String::new(),
            },
            Arc::new(AggregatorTool {
                aggregator: Arc::clone(&aggregator),
                operation,
            }),
        );
    }
}
