//! Circuit breaker, one cell per (tool, instance) pair.
//!
//! Closed → Open at `failure_threshold` consecutive failures; Open →
//! HalfOpen once the cooldown elapses; HalfOpen admits exactly one probe
//! at a time, whose success closes the cell and whose failure re-opens it
//! and restarts the cooldown. State reads are lock-free (an atomic tag);
//! transitions are serialized behind a mutex. A cancelled call counts as
//! neither success nor failure.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use tokio::time::Instant;

use finhub_core::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn tag(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// What the router may do with an instance right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Availability {
    /// Closed: dispatch normally.
    Ready,
    /// Open past cooldown, or HalfOpen with no probe in flight: a single
    /// probe may be admitted.
    ProbeCandidate,
    /// Open within cooldown, or HalfOpen with its probe already running.
    Blocked,
}

struct BreakerInner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    last_probe_at: Option<Instant>,
}

pub struct Breaker {
    config: BreakerConfig,
    state: AtomicU8,
    inner: Mutex<BreakerInner>,
}

impl Breaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(BreakerState::Closed.tag()),
            inner: Mutex::new(BreakerInner {
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
                last_probe_at: None,
            }),
        }
    }

    /// Lock-free state read.
    pub fn state(&self) -> BreakerState {
        BreakerState::from_tag(self.state.load(Ordering::Acquire))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_state(&self, state: BreakerState) {
        self.state.store(state.tag(), Ordering::Release);
    }

    /// Read-only classification for the selection phase. Has no side
    /// effects; a probe slot is claimed separately via [`begin_probe`].
    ///
    /// [`begin_probe`]: Breaker::begin_probe
    pub(crate) fn availability(&self, now: Instant) -> Availability {
        let inner = self.lock();
        match self.state() {
            BreakerState::Closed => Availability::Ready,
            BreakerState::Open => match inner.opened_at {
                Some(opened_at) if now >= opened_at + self.config.cooldown() => {
                    Availability::ProbeCandidate
                }
                _ => Availability::Blocked,
            },
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Availability::Blocked
                } else {
                    Availability::ProbeCandidate
                }
            }
        }
    }

    /// Ordering key for "least recently tried" among probe candidates.
    pub(crate) fn last_probe_at(&self) -> Option<Instant> {
        self.lock().last_probe_at
    }

    /// Claim the single HalfOpen probe slot. Returns false if another
    /// probe won the race or the cell is not probe-eligible.
    pub(crate) fn begin_probe(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        let eligible = match self.state() {
            BreakerState::Open => inner
                .opened_at
                .is_some_and(|opened_at| now >= opened_at + self.config.cooldown()),
            BreakerState::HalfOpen => !inner.probe_in_flight,
            BreakerState::Closed => false,
        };
        if !eligible {
            return false;
        }
        self.set_state(BreakerState::HalfOpen);
        inner.probe_in_flight = true;
        inner.last_probe_at = Some(now);
        true
    }

    /// Record a successful call: failures reset, a HalfOpen probe closes
    /// the cell.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        self.set_state(BreakerState::Closed);
    }

    /// Record a retryable failure. A failed HalfOpen probe re-opens and
    /// restarts the cooldown; otherwise the cell opens once the threshold
    /// is crossed. Concurrent failures may race and overshoot the
    /// threshold by at most one, which is acceptable.
    pub fn record_failure(&self, now: Instant) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let was_probe = inner.probe_in_flight;
        inner.probe_in_flight = false;
        if was_probe || inner.consecutive_failures >= self.config.failure_threshold {
            inner.opened_at = Some(now);
            self.set_state(BreakerState::Open);
        }
    }

    /// A cancelled call counts as neither success nor failure; it only
    /// releases the probe slot so another probe can run.
    pub fn record_cancelled(&self) {
        let mut inner = self.lock();
        inner.probe_in_flight = false;
    }
}
