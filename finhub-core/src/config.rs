//! Configuration for the hub, spokes, and the market aggregator.
//!
//! Layering: defaults → TOML file → env overrides (credentials only).
//! Config is immutable for the process lifetime; a reload is a restart,
//! which keeps provider order, TTLs, and thresholds free of runtime
//! synchronization.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Opaque credential. Never printed, never serialized into logs or cache
/// keys; `Debug` is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw secret, for request signing only.
    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Configuration for the hub process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub registry: RegistryConfig,
    pub router: RouterConfig,
    pub limits: LimitsConfig,
    /// Bind address for the registry HTTP API.
    pub bind_address: String,
}

impl HubConfig {
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        load_or_default(path).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub probe_interval_seconds: u64,
    pub probe_timeout_seconds: u64,
    /// Consecutive failed probes before Warning becomes Critical.
    pub critical_after_probes: u32,
    /// Age of Critical status (or of the last heartbeat) past which an
    /// instance is purged.
    pub deregister_after_seconds: u64,
    /// Heartbeat staleness that forces Critical even when probes pass.
    pub heartbeat_ttl_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            probe_interval_seconds: 10,
            probe_timeout_seconds: 3,
            critical_after_probes: 3,
            deregister_after_seconds: 300,
            heartbeat_ttl_seconds: 30,
        }
    }
}

impl RegistryConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn deregister_after(&self) -> Duration {
        Duration::from_secs(self.deregister_after_seconds)
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Concurrency permit count per instance.
    pub per_instance_capacity: usize,
    pub per_call_timeout_seconds: u64,
    pub max_retries: u32,
    /// How long to wait for a concurrency permit before excluding the
    /// instance and re-selecting.
    pub acquire_wait_ms: u64,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub breaker: BreakerConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            per_instance_capacity: 10,
            per_call_timeout_seconds: 30,
            max_retries: 2,
            acquire_wait_ms: 100,
            base_backoff_ms: 100,
            max_backoff_ms: 5_000,
            breaker: BreakerConfig::default(),
        }
    }
}

impl RouterConfig {
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_secs(self.per_call_timeout_seconds)
    }

    pub fn acquire_wait(&self) -> Duration {
        Duration::from_millis(self.acquire_wait_ms)
    }

    pub fn retry_policy(&self) -> crate::RetryPolicy {
        crate::RetryPolicy::router_default()
            .with_max_retries(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.base_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_seconds: 30,
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// In-flight RPC cap for the process.
    pub max_in_flight: usize,
    /// Bounded admission queue; overflow is rejected with
    /// `ResourceExhausted`.
    pub queue_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 256,
            queue_depth: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Spoke
// ---------------------------------------------------------------------------

/// Configuration for one spoke process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpokeConfig {
    /// Base URL of the hub's registry API.
    pub hub_address: String,
    /// Address this spoke binds its MCP/health server to.
    pub bind_address: String,
    pub heartbeat_interval_seconds: u64,
    pub startup_registration_deadline_seconds: u64,
    pub shutdown_grace_seconds: u64,
}

impl Default for SpokeConfig {
    fn default() -> Self {
        Self {
            hub_address: "http://127.0.0.1:9100".to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            heartbeat_interval_seconds: 10,
            startup_registration_deadline_seconds: 60,
            shutdown_grace_seconds: 30,
        }
    }
}

impl SpokeConfig {
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        load_or_default(path).await
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn startup_registration_deadline(&self) -> Duration {
        Duration::from_secs(self.startup_registration_deadline_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Configuration for the market spoke's multi-source aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Fixed provider fallback order. Earlier wins when capabilities tie;
    /// the order is configuration, never adjusted at runtime.
    pub provider_order: Vec<String>,
    /// Per-operation overrides of `provider_order`, keyed by operation
    /// name (e.g. `news = ["finnhub"]`).
    pub provider_order_overrides: BTreeMap<String, Vec<String>>,
    pub cache: CacheConfig,
    /// How long a provider stays sidelined after `PermanentUnavailable`.
    pub provider_cooldown_seconds: u64,
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            provider_order: vec![
                "polygon".to_string(),
                "twelve-data".to_string(),
                "finnhub".to_string(),
            ],
            provider_order_overrides: BTreeMap::new(),
            cache: CacheConfig::default(),
            provider_cooldown_seconds: 60,
            providers: BTreeMap::new(),
        }
    }
}

impl AggregatorConfig {
    pub fn provider_cooldown(&self) -> Duration {
        Duration::from_secs(self.provider_cooldown_seconds)
    }

    /// Apply `FINHUB_<PROVIDER>_API_KEY` overrides. Secrets only ever come
    /// from the environment or the file, never from CLI args.
    pub fn apply_env_overrides<F>(&mut self, mut env: F)
    where
        F: FnMut(&str) -> Option<String>,
    {
        for (id, settings) in self.providers.iter_mut() {
            let key = format!(
                "FINHUB_{}_API_KEY",
                id.to_uppercase().replace('-', "_")
            );
            if let Some(value) = env(&key) {
                settings.credential = Some(Credential::new(value));
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl_seconds: CacheTtlConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_seconds: CacheTtlConfig::default(),
        }
    }
}

/// Per-operation cache TTLs, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtlConfig {
    pub quote: u64,
    pub price_history: u64,
    pub news: u64,
    pub company_profile: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            quote: 300,
            price_history: 3_600,
            news: 900,
            company_profile: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Override for the provider's API base URL (tests point this at a
    /// local stub).
    pub base_url: Option<String>,
    pub rate_limit: RateLimitConfig,
    pub credential: Option<Credential>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            rate_limit: RateLimitConfig::default(),
            credential: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            refill_per_second: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

async fn load_or_default<T>(path: Option<&Path>) -> Result<T, ConfigError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    let Some(path) = path else {
        return Ok(T::default());
    };
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(toml::from_str(&raw)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = HubConfig::default();
        assert_eq!(config.registry.probe_interval_seconds, 10);
        assert_eq!(config.registry.probe_timeout_seconds, 3);
        assert_eq!(config.registry.critical_after_probes, 3);
        assert_eq!(config.registry.deregister_after_seconds, 300);
        assert_eq!(config.registry.heartbeat_ttl_seconds, 30);
        assert_eq!(config.router.per_instance_capacity, 10);
        assert_eq!(config.router.per_call_timeout_seconds, 30);
        assert_eq!(config.router.max_retries, 2);
        assert_eq!(config.router.acquire_wait_ms, 100);
        assert_eq!(config.router.breaker.failure_threshold, 5);
        assert_eq!(config.router.breaker.cooldown_seconds, 30);
        assert_eq!(config.limits.max_in_flight, 256);
        assert_eq!(config.limits.queue_depth, 1024);
    }

    #[test]
    fn aggregator_defaults() {
        let config = AggregatorConfig::default();
        assert_eq!(
            config.provider_order,
            vec!["polygon", "twelve-data", "finnhub"]
        );
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.cache.ttl_seconds.quote, 300);
        assert_eq!(config.cache.ttl_seconds.company_profile, 86_400);
        assert_eq!(config.provider_cooldown_seconds, 60);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let raw = r#"
            [registry]
            probe_interval_seconds = 2

            [router.breaker]
            failure_threshold = 3
        "#;
        let config: HubConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.registry.probe_interval_seconds, 2);
        // untouched fields keep their defaults
        assert_eq!(config.registry.critical_after_probes, 3);
        assert_eq!(config.router.breaker.failure_threshold, 3);
        assert_eq!(config.router.breaker.cooldown_seconds, 30);
    }

    #[test]
    fn credential_debug_is_redacted() {
        let mut config = AggregatorConfig::default();
        config.providers.insert(
            "polygon".to_string(),
            ProviderSettings {
                credential: Some(Credential::new("sk-very-secret")),
                ..Default::default()
            },
        );
        let printed = format!("{config:?}");
        assert!(!printed.contains("sk-very-secret"));
        assert!(printed.contains("Credential(***)"));
    }

    #[test]
    fn env_override_sets_credential() {
        let mut config = AggregatorConfig::default();
        config
            .providers
            .insert("twelve-data".to_string(), ProviderSettings::default());

        config.apply_env_overrides(|key| {
            (key == "FINHUB_TWELVE_DATA_API_KEY").then(|| "from-env".to_string())
        });

        let settings = &config.providers["twelve-data"];
        assert_eq!(settings.credential.as_ref().unwrap().reveal(), "from-env");
    }

    #[tokio::test]
    async fn load_without_path_yields_defaults() {
        let config = SpokeConfig::load(None).await.unwrap();
        assert_eq!(config.heartbeat_interval_seconds, 10);
    }

    #[tokio::test]
    async fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spoke.toml");
        tokio::fs::write(&path, "heartbeat_interval_seconds = 3\n")
            .await
            .unwrap();

        let config = SpokeConfig::load(Some(&path)).await.unwrap();
        assert_eq!(config.heartbeat_interval_seconds, 3);
        assert_eq!(config.shutdown_grace_seconds, 30);
    }
}
