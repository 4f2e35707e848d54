//! finhub-router - Tool execution routing
//!
//! Resolves a tool name to a healthy spoke instance and delivers the call,
//! applying weighted load balancing, per-instance concurrency permits,
//! circuit breaking per (tool, instance), and retry with jittered backoff.

pub mod breaker;
pub mod invoker;
pub mod router;

pub use breaker::{Breaker, BreakerState};
pub use invoker::{HttpSpokeInvoker, InvokeError, SpokeInvoker};
pub use router::ToolRouter;
