//! The multi-source fallback executor.
//!
//! A logical data request walks the fixed provider order until one
//! succeeds: unsupported providers are skipped, empty token buckets count
//! as rate-limited without an upstream call, `NotFound` stops the chain
//! (the data is canonically absent), and `PermanentUnavailable` sidelines
//! a provider for the configured cooldown. Fresh results land in the
//! cache under a fingerprint of the normalized parameters; concurrent
//! misses for one fingerprint coalesce into a single upstream pass.

mod budget;
mod cache;
mod provider;

pub use budget::TokenBucket;
pub use cache::{CacheStats, CachedResponse, ResponseCache};
pub use provider::{DataOperation, Provider, ProviderError, RawResponse};

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;

use finhub_core::{AggregatorConfig, CacheTtlConfig, HubError, RequestContext};

/// Normalized response envelope returned by every aggregator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub data: Value,
    pub metadata: EnvelopeMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    /// Provider id, or `"cache"`.
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub cache_hit: bool,
    /// Providers attempted before success, in order.
    pub fallback_chain: Vec<String>,
}

impl Envelope {
    fn fresh(data: Value, source: &str, fallback_chain: Vec<String>) -> Self {
        Self {
            data,
            metadata: EnvelopeMetadata {
                source: source.to_string(),
                fetched_at: Utc::now(),
                cache_hit: false,
                fallback_chain,
            },
        }
    }

    fn from_cache(cached: CachedResponse) -> Self {
        Self {
            data: cached.data,
            metadata: EnvelopeMetadata {
                source: "cache".to_string(),
                fetched_at: cached.fetched_at,
                cache_hit: true,
                fallback_chain: Vec::new(),
            },
        }
    }
}

type FlightOutcome = Result<Envelope, HubError>;
type FlightMap = HashMap<u64, broadcast::Sender<FlightOutcome>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Removes the in-flight entry if the leader is dropped before
/// publishing; dropping the sender wakes every waiter.
struct FlightGuard<'a> {
    flights: &'a Mutex<FlightMap>,
    fingerprint: u64,
    armed: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.flights).remove(&self.fingerprint);
        }
    }
}

/// Cache key: hash of the operation and the canonicalized parameters
/// (object keys sorted, so semantically equal requests collide).
/// Credentials are never part of the parameters, hence never part of the
/// key.
pub fn fingerprint(operation: DataOperation, params: &Value) -> u64 {
    let mut canonical = String::new();
    canonicalize(params, &mut canonical);
    let mut hasher = DefaultHasher::new();
    operation.as_str().hash(&mut hasher);
    canonical.hash(&mut hasher);
    hasher.finish()
}

fn canonicalize(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(key);
                out.push(':');
                canonicalize(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonicalize(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Multi-source data aggregator for one spoke.
pub struct DataAggregator {
    providers: Vec<Arc<dyn Provider>>,
    default_order: Vec<String>,
    order_overrides: HashMap<String, Vec<String>>,
    budgets: HashMap<String, TokenBucket>,
    cache: ResponseCache,
    ttls: CacheTtlConfig,
    provider_cooldown: Duration,
    cooldowns: Mutex<HashMap<String, Instant>>,
    in_flight: Mutex<FlightMap>,
}

impl DataAggregator {
    pub fn new(config: &AggregatorConfig, providers: Vec<Arc<dyn Provider>>) -> Self {
        let budgets = providers
            .iter()
            .map(|p| {
                let rate = config
                    .providers
                    .get(p.id())
                    .map(|s| s.rate_limit.clone())
                    .unwrap_or_default();
                (
                    p.id().to_string(),
                    TokenBucket::new(rate.capacity, rate.refill_per_second),
                )
            })
            .collect();

        Self {
            providers,
            default_order: config.provider_order.clone(),
            order_overrides: config
                .provider_order_overrides
                .iter()
                .map(|(op, order)| (op.clone(), order.clone()))
                .collect(),
            budgets,
            cache: ResponseCache::new(config.cache.max_entries),
            ttls: config.cache.ttl_seconds.clone(),
            provider_cooldown: config.provider_cooldown(),
            cooldowns: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Effective provider order for one operation: the per-operation
    /// override when configured, the default order otherwise. Providers
    /// missing from the order list sort last, in registration order.
    fn ordered_providers(&self, operation: DataOperation) -> Vec<&Arc<dyn Provider>> {
        let order = self
            .order_overrides
            .get(operation.as_str())
            .unwrap_or(&self.default_order);
        let mut ordered: Vec<&Arc<dyn Provider>> = order
            .iter()
            .filter_map(|id| self.providers.iter().find(|p| p.id() == id))
            .collect();
        for provider in &self.providers {
            if !order.iter().any(|id| id == provider.id()) {
                ordered.push(provider);
            }
        }
        ordered
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Serve one logical data request: cache, then the fallback chain,
    /// with single-flight coalescing per fingerprint.
    pub async fn request(
        &self,
        operation: DataOperation,
        params: &Value,
        ctx: &RequestContext,
    ) -> Result<Envelope, HubError> {
        let fingerprint = fingerprint(operation, params);

        if let Some(cached) = self.cache.get(fingerprint) {
            return Ok(Envelope::from_cache(cached));
        }

        // Join an in-flight fetch for this fingerprint, or become its
        // leader. The re-check under the lock closes the race with a
        // leader that just published.
        let waiter_rx = {
            let mut flights = lock(&self.in_flight);
            if let Some(cached) = self.cache.get(fingerprint) {
                return Ok(Envelope::from_cache(cached));
            }
            match flights.get(&fingerprint) {
                Some(tx) => Some(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    flights.insert(fingerprint, tx);
                    None
                }
            }
        };

        if let Some(mut rx) = waiter_rx {
            return tokio::select! {
                outcome = rx.recv() => match outcome {
                    Ok(shared) => shared,
                    // The leader was dropped before it could publish.
                    Err(_) => Err(HubError::Cancelled),
                },
                _ = ctx.cancelled() => Err(HubError::Cancelled),
                _ = tokio::time::sleep(ctx.remaining()) => Err(HubError::DeadlineExceeded),
            };
        }

        let mut guard = FlightGuard {
            flights: &self.in_flight,
            fingerprint,
            armed: true,
        };

        let result = self.fetch_chain(operation, params, ctx).await;

        if let Ok(envelope) = &result {
            self.cache.insert(
                fingerprint,
                CachedResponse {
                    data: envelope.data.clone(),
                    source: envelope.metadata.source.clone(),
                    fetched_at: envelope.metadata.fetched_at,
                },
                operation.ttl(&self.ttls),
            );
        }

        if let Some(tx) = lock(&self.in_flight).remove(&fingerprint) {
            let _ = tx.send(result.clone());
        }
        guard.armed = false;

        result
    }

    /// Walk the provider order once. See the module docs for the rules.
    async fn fetch_chain(
        &self,
        operation: DataOperation,
        params: &Value,
        ctx: &RequestContext,
    ) -> Result<Envelope, HubError> {
        let mut chain: Vec<String> = Vec::new();
        let mut breakdown: Vec<(String, String)> = Vec::new();
        let mut non_rate_limit_failure = false;

        for provider in self.ordered_providers(operation) {
            if ctx.is_cancelled() {
                return Err(HubError::Cancelled);
            }
            if ctx.is_expired() {
                return Err(HubError::DeadlineExceeded);
            }
            if !provider.supports(operation, params) {
                continue;
            }
            let id = provider.id().to_string();

            if self.is_cooling(&id) {
                breakdown.push((id, "cooling_down".to_string()));
                non_rate_limit_failure = true;
                continue;
            }

            chain.push(id.clone());

            let has_budget = self
                .budgets
                .get(&id)
                .map(|bucket| bucket.try_take())
                .unwrap_or(true);
            if !has_budget {
                tracing::debug!(provider = %id, %operation, "budget empty, skipping upstream call");
                breakdown.push((id, "rate_limited".to_string()));
                continue;
            }

            let fetched = tokio::select! {
                fetched = provider.fetch(operation, params, ctx) => fetched,
                _ = ctx.cancelled() => return Err(HubError::Cancelled),
                _ = tokio::time::sleep(ctx.remaining()) => return Err(HubError::DeadlineExceeded),
            };

            match fetched {
                Ok(raw) => match provider.normalize(raw) {
                    Ok(data) => {
                        return Ok(Envelope::fresh(data, &id, chain));
                    }
                    Err(err) => {
                        tracing::warn!(provider = %id, %operation, error = %err, "normalization failed");
                        breakdown.push((id, err.kind().to_string()));
                        non_rate_limit_failure = true;
                    }
                },
                Err(ProviderError::NotFound) => {
                    // Canonical absence: later providers are not consulted.
                    return Err(HubError::DataNotFound(operation.as_str().to_string()));
                }
                Err(err @ ProviderError::RateLimited) => {
                    breakdown.push((id, err.kind().to_string()));
                }
                Err(err @ ProviderError::PermanentUnavailable(_)) => {
                    tracing::warn!(provider = %id, %operation, error = %err, "provider sidelined");
                    self.set_cooldown(&id);
                    breakdown.push((id, err.kind().to_string()));
                    non_rate_limit_failure = true;
                }
                Err(err) => {
                    tracing::debug!(provider = %id, %operation, error = %err, "provider failed");
                    breakdown.push((id, err.kind().to_string()));
                    non_rate_limit_failure = true;
                }
            }
        }

        if !breakdown.is_empty() && !non_rate_limit_failure {
            return Err(HubError::ProviderRateLimited(
                operation.as_str().to_string(),
            ));
        }
        Err(HubError::AllProvidersFailed {
            operation: operation.as_str().to_string(),
            breakdown,
        })
    }

    fn is_cooling(&self, provider_id: &str) -> bool {
        let now = Instant::now();
        let mut cooldowns = lock(&self.cooldowns);
        match cooldowns.get(provider_id) {
            Some(until) if *until > now => true,
            Some(_) => {
                cooldowns.remove(provider_id);
                false
            }
            None => false,
        }
    }

    fn set_cooldown(&self, provider_id: &str) {
        lock(&self.cooldowns).insert(
            provider_id.to_string(),
            Instant::now() + self.provider_cooldown,
        );
    }
}
