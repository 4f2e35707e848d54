//! Frontend method router and admission control.
//!
//! Decodes the MCP method surface (initialize, tools/list, tools/call,
//! ping), hands tool calls to the execution router, and keeps the
//! process inside its in-flight budget: requests beyond the cap queue in
//! a bounded buffer and overflow is rejected with `ResourceExhausted`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use finhub_core::{HealthStatus, HubConfig, HubError, RequestContext};
use finhub_registry::ServiceRegistry;
use finhub_router::ToolRouter;
use finhub_rpc::{error, RpcRequest, RpcResponse, PROTOCOL_VERSION};

/// Bounded admission: `max_in_flight` permits, at most `queue_depth`
/// callers waiting behind them.
struct AdmissionGate {
    permits: Arc<Semaphore>,
    queued: AtomicUsize,
    queue_depth: usize,
}

impl AdmissionGate {
    fn new(max_in_flight: usize, queue_depth: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            queued: AtomicUsize::new(0),
            queue_depth,
        }
    }

    async fn admit(&self) -> Result<OwnedSemaphorePermit, HubError> {
        if let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() {
            return Ok(permit);
        }
        // Queue with a bound; overflow is an immediate rejection.
        let queued = self.queued.fetch_add(1, Ordering::SeqCst);
        if queued >= self.queue_depth {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(HubError::ResourceExhausted);
        }
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| HubError::internal("admission gate closed"));
        self.queued.fetch_sub(1, Ordering::SeqCst);
        permit
    }
}

#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
    /// Optional client budget, bounded by the server's per-call timeout.
    #[serde(default)]
    timeout_ms: Option<u64>,
}

/// Dispatches inbound JSON-RPC requests to the registry and router.
pub struct HubFrontend {
    registry: Arc<ServiceRegistry>,
    router: Arc<ToolRouter>,
    config: HubConfig,
    admission: AdmissionGate,
}

impl HubFrontend {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        router: Arc<ToolRouter>,
        config: HubConfig,
    ) -> Self {
        let admission =
            AdmissionGate::new(config.limits.max_in_flight, config.limits.queue_depth);
        Self {
            registry,
            router,
            config,
            admission,
        }
    }

    /// Dispatch one request. Returns `None` for notifications.
    pub async fn dispatch(&self, request: RpcRequest) -> Option<RpcResponse> {
        if request.is_notification() {
            match request.method.as_str() {
                "initialized" => {}
                other => tracing::debug!("unknown notification method: {other}"),
            }
            return None;
        }

        let id = request.id.clone();
        let response = match request.method.as_str() {
            "initialize" => RpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": "fin-hub",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            ),
            "ping" => RpcResponse::success(id, json!({})),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .registry
                    .list_tools(HealthStatus::Passing)
                    .await
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
            "tools/call" => self.handle_tools_call(id, &request).await,
            other => RpcResponse::error(
                id,
                error::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        };
        Some(response)
    }

    async fn handle_tools_call(
        &self,
        id: Option<finhub_rpc::RpcId>,
        request: &RpcRequest,
    ) -> RpcResponse {
        let params: ToolCallParams = match request.parse_params() {
            Ok(params) => params,
            Err(err) => return RpcResponse::from_hub_error(id, &err, "-"),
        };

        let budget = params
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.router.per_call_timeout())
            .min(self.config.router.per_call_timeout());
        let ctx = RequestContext::new(budget);

        let _permit = match self.admission.admit().await {
            Ok(permit) => permit,
            Err(err) => {
                return RpcResponse::from_hub_error(id, &err, ctx.correlation_id());
            }
        };

        tracing::debug!(
            tool = %params.name,
            correlation_id = %ctx.correlation_id(),
            "dispatching tool call"
        );
        match self
            .router
            .dispatch(&params.name, &params.arguments, &ctx)
            .await
        {
            Ok(result) => RpcResponse::success(id, result),
            Err(err) => RpcResponse::from_hub_error(id, &err, ctx.correlation_id()),
        }
    }
}
