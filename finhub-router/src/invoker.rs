//! The seam between the router and spoke processes.
//!
//! Production dispatch is a JSON-RPC `tools/call` POST against the
//! instance's `/mcp` endpoint; tests substitute scripted invokers.

use async_trait::async_trait;
use serde_json::{json, Value};

use finhub_core::{RequestContext, ServiceInstance};

/// Failure of a single spoke call, classified for retry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InvokeError {
    /// Connection-level failure. Retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call outlived its deadline. Retryable while budget remains.
    #[error("spoke call timed out")]
    Timeout,

    /// 5xx-equivalent from the spoke's HTTP layer. Retryable.
    #[error("spoke returned status {status}")]
    UpstreamStatus { status: u16 },

    /// JSON-RPC error object from the spoke. Not retryable; passed
    /// through unchanged.
    #[error("{message}")]
    Rpc {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    #[error("call cancelled")]
    Cancelled,
}

impl InvokeError {
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout | Self::UpstreamStatus { .. }
        )
    }
}

/// Delivers one `tools/call` to one spoke instance.
#[async_trait]
pub trait SpokeInvoker: Send + Sync {
    async fn call_tool(
        &self,
        instance: &ServiceInstance,
        tool: &str,
        arguments: &Value,
        ctx: &RequestContext,
    ) -> Result<Value, InvokeError>;
}

/// HTTP JSON-RPC invoker.
pub struct HttpSpokeInvoker {
    client: reqwest::Client,
}

impl HttpSpokeInvoker {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpSpokeInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpokeInvoker for HttpSpokeInvoker {
    async fn call_tool(
        &self,
        instance: &ServiceInstance,
        tool: &str,
        arguments: &Value,
        ctx: &RequestContext,
    ) -> Result<Value, InvokeError> {
        let url = format!("{}/mcp", instance.address.base_url());
        let request = json!({
            "jsonrpc": "2.0",
            "id": ctx.correlation_id(),
            "method": "tools/call",
            "params": { "name": tool, "arguments": arguments },
        });

        let response = self
            .client
            .post(url)
            .header("x-correlation-id", ctx.correlation_id())
            .timeout(ctx.remaining())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InvokeError::Timeout
                } else {
                    InvokeError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(InvokeError::UpstreamStatus {
                status: status.as_u16(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| InvokeError::Transport(e.to_string()))?;

        if let Some(error) = body.get("error") {
            return Err(InvokeError::Rpc {
                code: error["code"].as_i64().unwrap_or(-32603) as i32,
                message: error["message"]
                    .as_str()
                    .unwrap_or("spoke error")
                    .to_string(),
                data: error.get("data").cloned(),
            });
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}
