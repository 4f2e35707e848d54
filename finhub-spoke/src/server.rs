//! The spoke's HTTP surface: `POST /mcp` (JSON-RPC) and `GET /health`.
//!
//! Method surface mirrors the hub frontend: initialize, tools/list,
//! tools/call, ping. Notifications get an empty 204. A draining spoke
//! reports Critical so the sweeper pulls it out of rotation before the
//! process exits.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use finhub_core::{HealthReport, HealthStatus, RequestContext};
use finhub_rpc::{error, RpcRequest, RpcResponse, PROTOCOL_VERSION};

use crate::registry::ToolRegistry;

/// Shared state behind the spoke's HTTP handlers.
#[derive(Clone)]
pub struct SpokeState {
    registry: Arc<ToolRegistry>,
    per_call_timeout: Duration,
    in_flight: Arc<AtomicUsize>,
    draining: Arc<AtomicBool>,
}

impl SpokeState {
    pub fn new(registry: Arc<ToolRegistry>, per_call_timeout: Duration) -> Self {
        Self {
            registry,
            per_call_timeout,
            in_flight: Arc::new(AtomicUsize::new(0)),
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Flip the health endpoint to Critical; new registrations of work
    /// still complete, but the sweeper stops routing here.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }
}

/// Build the spoke router.
pub fn router(state: SpokeState) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health(State(state): State<SpokeState>) -> Json<HealthReport> {
    if state.draining.load(Ordering::SeqCst) {
        Json(HealthReport {
            status: HealthStatus::Critical,
            detail: Some("draining".to_string()),
        })
    } else {
        Json(HealthReport::passing())
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

async fn handle_mcp(
    State(state): State<SpokeState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(err) => {
            let response =
                RpcResponse::error(None, error::PARSE_ERROR, format!("Parse error: {err}"));
            return Json(response).into_response();
        }
    };

    // Notifications are consumed without a JSON-RPC response.
    if request.is_notification() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let id = request.id.clone();
    let response = match request.method.as_str() {
        "initialize" => RpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": state.registry.service_name(),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "ping" => RpcResponse::success(id, json!({})),
        "tools/list" => {
            let tools: Vec<Value> = state
                .registry
                .descriptors()
                .into_iter()
                .map(|d| {
                    json!({
                        "name": d.qualified_name,
                        "description": d.description,
                        "inputSchema": d.input_schema,
                    })
                })
                .collect();
            RpcResponse::success(id, json!({ "tools": tools }))
        }
        "tools/call" => {
            // Reuse the hub's correlation id when it forwarded one.
            let ctx = match headers
                .get("x-correlation-id")
                .and_then(|v| v.to_str().ok())
            {
                Some(correlation_id) => RequestContext::with_correlation_id(
                    correlation_id,
                    state.per_call_timeout,
                ),
                None => RequestContext::new(state.per_call_timeout),
            };
            let correlation_id = ctx.correlation_id().to_string();

            match request.parse_params::<ToolCallParams>() {
                Ok(params) => {
                    state.in_flight.fetch_add(1, Ordering::SeqCst);
                    let result = state
                        .registry
                        .dispatch(&params.name, &params.arguments, &ctx)
                        .await;
                    state.in_flight.fetch_sub(1, Ordering::SeqCst);

                    match result {
                        Ok(value) => RpcResponse::success(id, value),
                        Err(err) => RpcResponse::from_hub_error(id, &err, &correlation_id),
                    }
                }
                Err(err) => RpcResponse::from_hub_error(id, &err, &correlation_id),
            }
        }
        other => RpcResponse::error(
            id,
            error::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    };

    Json(response).into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::registry::ToolHandler;
    use async_trait::async_trait;
    use finhub_core::{HubError, ToolDescriptor};

    struct QuoteHandler;

    #[async_trait]
    impl ToolHandler for QuoteHandler {
        async fn call(
            &self,
            arguments: &Value,
            _ctx: &RequestContext,
        ) -> Result<Value, HubError> {
            let symbol = arguments["symbol"].as_str().unwrap_or_default();
            if symbol == "FAIL" {
                return Err(HubError::HandlerFailure("synthetic failure".to_string()));
            }
            Ok(json!({ "data": { "symbol": symbol, "price": 187.2 } }))
        }
    }

    async fn serve() -> String {
        let mut registry = ToolRegistry::new("market-spoke");
        registry.register(
            ToolDescriptor {
                qualified_name: "market.stock_quote".to_string(),
                description: "Latest quote".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": { "symbol": {"type": "string"} },
                    "required": ["symbol"]
                }),
                output_schema: None,
                service_name: String::new(),
            },
            Arc::new(QuoteHandler),
        );
        let state = SpokeState::new(Arc::new(registry), Duration::from_secs(30));
        let app = router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn rpc(base: &str, body: Value) -> Value {
        reqwest::Client::new()
            .post(format!("{base}/mcp"))
            .body(body.to_string())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn initialize_reports_protocol_and_server_info() {
        let base = serve().await;
        let response = rpc(
            &base,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}),
        )
        .await;
        assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(response["result"]["serverInfo"]["name"], "market-spoke");
        assert!(response["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn tools_list_uses_mcp_field_names() {
        let base = serve().await;
        let response = rpc(
            &base,
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        )
        .await;
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "market.stock_quote");
        assert!(tools[0]["inputSchema"]["properties"]["symbol"].is_object());
    }

    #[tokio::test]
    async fn tools_call_happy_path() {
        let base = serve().await;
        let response = rpc(
            &base,
            json!({
                "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                "params": {"name": "market.stock_quote", "arguments": {"symbol": "AAPL"}}
            }),
        )
        .await;
        assert_eq!(response["result"]["data"]["symbol"], "AAPL");
    }

    #[tokio::test]
    async fn invalid_arguments_surface_as_invalid_params() {
        let base = serve().await;
        let response = rpc(
            &base,
            json!({
                "jsonrpc": "2.0", "id": 4, "method": "tools/call",
                "params": {"name": "market.stock_quote", "arguments": {}}
            }),
        )
        .await;
        assert_eq!(response["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn handler_failure_maps_to_handler_code() {
        let base = serve().await;
        let response = rpc(
            &base,
            json!({
                "jsonrpc": "2.0", "id": 5, "method": "tools/call",
                "params": {"name": "market.stock_quote", "arguments": {"symbol": "FAIL"}}
            }),
        )
        .await;
        assert_eq!(response["error"]["code"], -32020);
    }

    #[tokio::test]
    async fn unknown_method_and_unknown_tool() {
        let base = serve().await;
        let response = rpc(
            &base,
            json!({"jsonrpc": "2.0", "id": 6, "method": "tools/describe"}),
        )
        .await;
        assert_eq!(response["error"]["code"], -32601);

        let response = rpc(
            &base,
            json!({
                "jsonrpc": "2.0", "id": 7, "method": "tools/call",
                "params": {"name": "market.bogus", "arguments": {}}
            }),
        )
        .await;
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn malformed_body_is_parse_error() {
        let base = serve().await;
        let response: Value = reqwest::Client::new()
            .post(format!("{base}/mcp"))
            .body("{nope")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn health_flips_to_critical_while_draining() {
        let mut registry = ToolRegistry::new("risk-spoke");
        registry.register(
            ToolDescriptor {
                qualified_name: "risk.noop".to_string(),
                description: "noop".to_string(),
                input_schema: json!({"type": "object"}),
                output_schema: None,
                service_name: String::new(),
            },
            Arc::new(QuoteHandler),
        );
        let state = SpokeState::new(Arc::new(registry), Duration::from_secs(30));
        let app = router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let report: HealthReport = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report.status, HealthStatus::Passing);

        state.begin_drain();
        let report: HealthReport = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report.status, HealthStatus::Critical);
    }
}
