//! Request-scoped context: correlation id, deadline, cancellation.
//!
//! One `RequestContext` is created per inbound RPC and passed by reference
//! down the call chain. Cancellation and deadline expiry must unwind
//! promptly: in-flight network calls are aborted, permits released, and
//! coalesced-fetch waiters woken.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Context scoped to a single inbound RPC.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: String,
    deadline: Instant,
    cancel: CancellationToken,
}

impl RequestContext {
    /// Create a context with a fresh correlation id and the given time budget.
    pub fn new(budget: Duration) -> Self {
        Self::with_correlation_id(Uuid::new_v4().to_string(), budget)
    }

    pub fn with_correlation_id(correlation_id: impl Into<String>, budget: Duration) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            deadline: Instant::now() + budget,
            cancel: CancellationToken::new(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Signal cancellation to everything holding this context.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the context is cancelled. Used in `tokio::select!`
    /// arms alongside the actual work.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Derive a context for a downstream call: same correlation id and
    /// deadline, child cancellation token (cancelling the parent cancels
    /// the child, not vice versa).
    pub fn child(&self) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    /// Cap the remaining budget, e.g. for a per-call timeout tighter than
    /// the request deadline.
    pub fn with_budget_capped(&self, cap: Duration) -> Self {
        let capped = Instant::now() + cap;
        Self {
            correlation_id: self.correlation_id.clone(),
            deadline: self.deadline.min(capped),
            cancel: self.cancel.child_token(),
        }
    }
}
