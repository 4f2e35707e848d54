//! The mesh-wide error taxonomy.
//!
//! Every failure that can cross a component boundary is one of these kinds,
//! each with a stable JSON-RPC error code. Standard codes (-32700..-32600)
//! cover protocol-level failures; the application range carries registry,
//! routing, and aggregator failures.

use serde_json::{json, Value};

/// Error kinds surfaced across the mesh, mapped onto JSON-RPC codes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HubError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Router: the tool name resolves to no registered service.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Router: the registry returned nothing Passing for the owning service.
    #[error("No healthy instance of service '{service}'")]
    NoHealthyInstance { service: String },

    /// Router: every candidate's breaker is open and no probe is permitted.
    #[error("All instances open for tool '{tool}'")]
    AllInstancesOpen { tool: String },

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Request cancelled")]
    Cancelled,

    /// Inbound queue overflow.
    #[error("Too many requests in flight")]
    ResourceExhausted,

    /// Aggregator: every capable provider was rate limited.
    #[error("All providers rate limited for operation '{0}'")]
    ProviderRateLimited(String),

    /// Aggregator: no provider produced a result. Carries the sanitized
    /// per-provider error breakdown.
    #[error("All providers failed for operation '{operation}'")]
    AllProvidersFailed {
        operation: String,
        breakdown: Vec<(String, String)>,
    },

    /// Aggregator: a provider returned authoritative absence. Later
    /// providers are not consulted.
    #[error("Data not found for operation '{0}'")]
    DataNotFound(String),

    /// A spoke tool handler failed. Passes through the router unchanged.
    #[error("Tool handler failed: {0}")]
    HandlerFailure(String),

    /// An error relayed verbatim from a spoke response. Keeps the spoke's
    /// code and data so application errors cross the router unchanged.
    #[error("{message}")]
    Upstream {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// The JSON-RPC error code for this kind.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidRequest(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::ToolNotFound(_) => -32001,
            Self::NoHealthyInstance { .. } => -32002,
            Self::AllInstancesOpen { .. } => -32003,
            Self::DeadlineExceeded => -32004,
            Self::Cancelled => -32005,
            Self::ResourceExhausted => -32006,
            Self::ProviderRateLimited(_) => -32010,
            Self::AllProvidersFailed { .. } => -32011,
            Self::DataNotFound(_) => -32012,
            Self::HandlerFailure(_) => -32020,
            Self::Upstream { code, .. } => *code,
            Self::Internal(_) => -32603,
        }
    }

    /// Structured `data` payload for the JSON-RPC error object, if this
    /// kind carries one. Provider breakdowns are sanitized upstream and
    /// never contain credentials.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::AllProvidersFailed { breakdown, .. } => {
                let providers: Vec<Value> = breakdown
                    .iter()
                    .map(|(provider, error)| json!({"provider": provider, "error": error}))
                    .collect();
                Some(json!({ "providers": providers }))
            }
            Self::Upstream { data, .. } => data.clone(),
            _ => None,
        }
    }

    /// Whether the router may retry this failure against another instance.
    ///
    /// Client-input errors and authoritative results never retry and never
    /// trip a breaker.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Internal(_) | Self::NoHealthyInstance { .. } | Self::DeadlineExceeded
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }
}
