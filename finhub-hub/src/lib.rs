//! finhub-hub - The hub process
//!
//! Exposes the mesh's tools behind a single MCP endpoint: a JSONL
//! JSON-RPC frontend over stdio, backed by the in-process registry and
//! the tool execution router, with the registry's HTTP API and the
//! health sweeper running alongside.

pub mod frontend;
pub mod server;

pub use frontend::HubFrontend;
pub use server::{serve_stdio, HubServer, ServerError};
