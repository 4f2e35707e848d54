//! finhub-spoke - Spoke runtime
//!
//! Hosts a set of tool handlers behind an MCP endpoint, keeps itself
//! registered with the hub, and exposes the health probe the hub's
//! sweeper polls. Tools are values in a dispatch table: adding one is a
//! registration call, not a new type.

pub mod lifecycle;
pub mod registry;
pub mod server;

pub use lifecycle::{Spoke, SpokeError};
pub use registry::{ToolHandler, ToolRegistry};
pub use server::SpokeState;
