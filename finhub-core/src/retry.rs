//! Retry policy for transient failures.
//!
//! Exponential backoff with jitter, used by the router when failing over
//! between instances and by spokes registering against the hub.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the initial try.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits roughly `base × multiplier^(n-1)`.
    pub initial_delay: Duration,
    /// Cap applied after the exponential step.
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy used by the router when failing over between spoke instances.
    pub fn router_default() -> Self {
        Self::default()
    }

    /// Policy used by a spoke registering with the hub on startup.
    pub fn registration_default() -> Self {
        Self {
            max_retries: u32::MAX,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry `attempt` (1-indexed; attempt 0 is the initial
    /// try and waits nothing). Jittered ±25 %.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        // ±25 % jitter so synchronized retries fan out.
        let jitter = 1.0 + (rand_jitter() * 0.5 - 0.25);
        Duration::from_secs_f64(capped * jitter)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Simple pseudo-random value in [0, 1), derived from the clock. Good
/// enough for jitter; avoids pulling in a full RNG.
fn rand_jitter() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::time::SystemTime;

    let mut hasher = DefaultHasher::new();
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);

    (hasher.finish() as f64) / (u64::MAX as f64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn attempt_zero_waits_nothing() {
        assert_eq!(RetryPolicy::default().delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn delays_grow_and_stay_within_jitter_band() {
        let policy = RetryPolicy::default();

        // base 100ms, ±25% jitter
        let d1 = policy.delay_for_attempt(1);
        assert!(d1 >= Duration::from_millis(75), "got {d1:?}");
        assert!(d1 <= Duration::from_millis(125), "got {d1:?}");

        // base 200ms
        let d2 = policy.delay_for_attempt(2);
        assert!(d2 >= Duration::from_millis(150), "got {d2:?}");
        assert!(d2 <= Duration::from_millis(250), "got {d2:?}");
    }

    #[test]
    fn cap_bounds_late_attempts() {
        let policy = RetryPolicy::default().with_max_delay(Duration::from_secs(5));
        let late = policy.delay_for_attempt(20);
        // 5s cap plus 25% jitter headroom
        assert!(late <= Duration::from_millis(6250), "got {late:?}");
    }

    #[test]
    fn retry_budget_respected() {
        let policy = RetryPolicy::default().with_max_retries(2);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn registration_policy_never_gives_up() {
        let policy = RetryPolicy::registration_default();
        assert!(policy.should_retry(10_000));
        assert!(policy.delay_for_attempt(50) <= Duration::from_secs(13));
    }
}
