//! finhub-rpc - JSON-RPC 2.0 / MCP wire contract
//!
//! Message types, error codes, and the JSONL transport shared by the hub
//! frontend and the spoke MCP endpoints. Params and results are carried as
//! raw JSON and only parsed by the handler that owns them.

pub mod error;
pub mod protocol;
pub mod transport;

pub use protocol::{RpcError, RpcId, RpcNotification, RpcRequest, RpcResponse};
pub use transport::{JsonlTransport, TransportError};

/// MCP protocol version spoken by the mesh.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
