//! JSON-RPC error codes.
//!
//! Standard codes plus the Fin-Hub application range. The application
//! codes are the wire form of the kinds in `finhub_core::HubError`.

/// Standard JSON-RPC error: invalid JSON
pub const PARSE_ERROR: i32 = -32700;
/// Standard JSON-RPC error: not a valid request object
pub const INVALID_REQUEST: i32 = -32600;
/// Standard JSON-RPC error: method does not exist
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Standard JSON-RPC error: invalid method parameters
pub const INVALID_PARAMS: i32 = -32602;
/// Standard JSON-RPC error: internal error
pub const INTERNAL_ERROR: i32 = -32603;

// Routing failures (-32001 to -32006)

/// Tool name resolves to no registered service
pub const TOOL_NOT_FOUND: i32 = -32001;
/// No Passing instance of the owning service
pub const NO_HEALTHY_INSTANCE: i32 = -32002;
/// Every candidate's circuit breaker is open
pub const ALL_INSTANCES_OPEN: i32 = -32003;
/// Request deadline reached before a result
pub const DEADLINE_EXCEEDED: i32 = -32004;
/// Caller aborted the request
pub const CANCELLED: i32 = -32005;
/// Inbound queue overflow
pub const RESOURCE_EXHAUSTED: i32 = -32006;

// Aggregator failures (-32010 to -32012)

/// Every capable provider was rate limited
pub const PROVIDER_RATE_LIMITED: i32 = -32010;
/// No provider produced a result
pub const ALL_PROVIDERS_FAILED: i32 = -32011;
/// A provider returned authoritative absence
pub const DATA_NOT_FOUND: i32 = -32012;

// Spoke failures (-32020)

/// A tool handler failed; passes through the router unchanged
pub const HANDLER_FAILURE: i32 = -32020;
