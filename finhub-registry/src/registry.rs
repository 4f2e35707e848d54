//! The in-memory authoritative registry.
//!
//! A single map of instances plus a tool index, guarded by a
//! reader-writer lock. Readers see atomic snapshots: a register or
//! deregister is observable in full or not at all. Every observable state
//! change bumps the instance's version, so a caller comparing versions
//! across reads can detect staleness but never sees a regression.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};

use finhub_core::{
    DiscoverFilter, HealthStatus, InstanceId, RegistryConfig, ServiceInstance,
    ServiceRegistration, ToolDescriptor,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// A tool qualified name is already advertised by a different service
    /// name. The later registration loses.
    #[error("Tool '{tool}' is already owned by service '{owner}'")]
    ToolConflict { tool: String, owner: String },

    #[error("Unknown instance: {0}")]
    UnknownInstance(InstanceId),
}

struct InstanceRecord {
    instance: ServiceInstance,
    consecutive_probe_failures: u32,
    /// When the instance entered its current status; drives the
    /// deregistration TTL for Critical instances.
    status_since: DateTime<Utc>,
}

impl InstanceRecord {
    fn set_status(&mut self, status: HealthStatus, now: DateTime<Utc>) {
        if self.instance.status != status {
            self.instance.status = status;
            self.instance.version += 1;
            self.status_since = now;
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    instances: HashMap<InstanceId, InstanceRecord>,
    /// qualified tool name → descriptor. Ownership is by service *name*;
    /// descriptors outlive individual instances and are dropped when the
    /// last instance of the name goes.
    tools: HashMap<String, ToolDescriptor>,
}

impl RegistryInner {
    fn instances_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a InstanceRecord> + 'a {
        self.instances
            .values()
            .filter(move |r| r.instance.name == name)
    }
}

/// Service registry and discovery.
pub struct ServiceRegistry {
    inner: RwLock<RegistryInner>,
    config: RegistryConfig,
    /// Removal notifications, consumed by the router to evict breaker
    /// state and permits for dead instances.
    removals: broadcast::Sender<InstanceId>,
}

impl ServiceRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let (removals, _) = broadcast::channel(64);
        Self {
            inner: RwLock::new(RegistryInner::default()),
            config,
            removals,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Subscribe to instance removals (deregistration or TTL purge).
    pub fn subscribe_removals(&self) -> broadcast::Receiver<InstanceId> {
        self.removals.subscribe()
    }

    /// Register an instance and its tools.
    ///
    /// Assigns timestamps, sets status Passing, and stores the instance.
    /// Rejects the whole registration if any tool name collides with
    /// another service name; nothing becomes visible on rejection.
    pub async fn register(
        &self,
        registration: ServiceRegistration,
    ) -> Result<ServiceInstance, RegistryError> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        for tool in &registration.tools {
            if let Some(existing) = inner.tools.get(&tool.qualified_name) {
                if existing.service_name != registration.name {
                    return Err(RegistryError::ToolConflict {
                        tool: tool.qualified_name.clone(),
                        owner: existing.service_name.clone(),
                    });
                }
            }
        }

        let instance = match inner.instances.get_mut(&registration.id) {
            Some(record) => {
                // Re-registration of a live instance refreshes its facts.
                record.instance.address = registration.address;
                record.instance.tags = registration.tags;
                record.instance.metadata = registration.metadata;
                record.instance.health_endpoint = registration.health_endpoint;
                record.instance.last_heartbeat_at = now;
                record.instance.version += 1;
                record.consecutive_probe_failures = 0;
                record.set_status(HealthStatus::Passing, now);
                record.instance.clone()
            }
            None => {
                let instance = ServiceInstance {
                    id: registration.id.clone(),
                    name: registration.name.clone(),
                    address: registration.address,
                    tags: registration.tags,
                    metadata: registration.metadata,
                    health_endpoint: registration.health_endpoint,
                    registered_at: now,
                    last_heartbeat_at: now,
                    status: HealthStatus::Passing,
                    version: 1,
                };
                inner.instances.insert(
                    registration.id.clone(),
                    InstanceRecord {
                        instance: instance.clone(),
                        consecutive_probe_failures: 0,
                        status_since: now,
                    },
                );
                instance
            }
        };

        for mut tool in registration.tools {
            tool.service_name = registration.name.clone();
            inner.tools.insert(tool.qualified_name.clone(), tool);
        }

        tracing::info!(
            instance = %instance.id,
            service = %instance.name,
            "registered instance"
        );
        Ok(instance)
    }

    /// Remove an instance; drops its service's tools when it was the last
    /// instance of that name.
    pub async fn deregister(&self, id: &InstanceId) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .instances
            .remove(id)
            .ok_or_else(|| RegistryError::UnknownInstance(id.clone()))?;

        let name = record.instance.name;
        if inner.instances_of(&name).next().is_none() {
            inner.tools.retain(|_, tool| tool.service_name != name);
        }
        drop(inner);

        let _ = self.removals.send(id.clone());
        tracing::info!(instance = %id, service = %name, "deregistered instance");
        Ok(())
    }

    /// Record a heartbeat. A Critical instance does not recover on
    /// heartbeat alone; it returns to Passing through a successful probe.
    pub async fn heartbeat(&self, id: &InstanceId) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .instances
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownInstance(id.clone()))?;
        record.instance.last_heartbeat_at = Utc::now();
        record.instance.version += 1;
        Ok(())
    }

    /// Snapshot of instances matching the filter, ordered by (name, id)
    /// for deterministic iteration.
    pub async fn discover(&self, filter: &DiscoverFilter) -> Vec<ServiceInstance> {
        let inner = self.inner.read().await;
        let mut matches: Vec<ServiceInstance> = inner
            .instances
            .values()
            .filter(|r| r.instance.matches(filter))
            .map(|r| r.instance.clone())
            .collect();
        matches.sort_by(|a, b| (&a.name, &a.id).cmp(&(&b.name, &b.id)));
        matches
    }

    /// Tools whose owning service has at least one instance at or above
    /// `min_status`. A tool whose only instances are Critical is invisible.
    pub async fn list_tools(&self, min_status: HealthStatus) -> Vec<ToolDescriptor> {
        let inner = self.inner.read().await;
        let mut tools: Vec<ToolDescriptor> = inner
            .tools
            .values()
            .filter(|tool| {
                inner
                    .instances_of(&tool.service_name)
                    .any(|r| r.instance.status.at_least(min_status))
            })
            .cloned()
            .collect();
        tools.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        tools
    }

    /// Resolve a tool name to its owning service name.
    pub async fn resolve_tool(&self, qualified_name: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner
            .tools
            .get(qualified_name)
            .map(|tool| tool.service_name.clone())
    }

    pub async fn get(&self, id: &InstanceId) -> Option<ServiceInstance> {
        let inner = self.inner.read().await;
        inner.instances.get(id).map(|r| r.instance.clone())
    }

    pub async fn instance_count(&self) -> usize {
        self.inner.read().await.instances.len()
    }

    // -- health bookkeeping, driven by the sweeper ------------------------

    /// Targets for the next probe sweep.
    pub async fn probe_targets(&self) -> Vec<(InstanceId, String)> {
        let inner = self.inner.read().await;
        inner
            .instances
            .values()
            .map(|r| (r.instance.id.clone(), r.instance.health_endpoint.clone()))
            .collect()
    }

    /// Any successful probe returns the instance to Passing.
    pub async fn record_probe_success(&self, id: &InstanceId) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.instances.get_mut(id) {
            record.consecutive_probe_failures = 0;
            record.set_status(HealthStatus::Passing, Utc::now());
        }
    }

    /// One failure degrades Passing to Warning; `critical_after_probes`
    /// consecutive failures degrade Warning to Critical.
    pub async fn record_probe_failure(&self, id: &InstanceId) {
        let mut inner = self.inner.write().await;
        let critical_after = self.config.critical_after_probes;
        if let Some(record) = inner.instances.get_mut(id) {
            record.consecutive_probe_failures =
                record.consecutive_probe_failures.saturating_add(1);
            let now = Utc::now();
            match record.instance.status {
                HealthStatus::Passing | HealthStatus::Unknown => {
                    record.set_status(HealthStatus::Warning, now);
                }
                HealthStatus::Warning if record.consecutive_probe_failures >= critical_after => {
                    record.set_status(HealthStatus::Critical, now);
                }
                _ => {}
            }
        }
    }

    /// Apply heartbeat staleness and the deregistration TTL. Returns the
    /// purged instance ids. Heartbeat expiry and failed probes race; the
    /// first to trip wins.
    pub async fn sweep_expired(&self) -> Vec<InstanceId> {
        let now = Utc::now();
        let heartbeat_ttl =
            chrono::Duration::seconds(self.config.heartbeat_ttl_seconds as i64);
        let deregister_after =
            chrono::Duration::seconds(self.config.deregister_after_seconds as i64);

        let mut inner = self.inner.write().await;

        for record in inner.instances.values_mut() {
            if now - record.instance.last_heartbeat_at > heartbeat_ttl {
                record.set_status(HealthStatus::Critical, now);
            }
        }

        let purged: Vec<InstanceId> = inner
            .instances
            .values()
            .filter(|r| {
                r.instance.status == HealthStatus::Critical
                    && now - r.status_since > deregister_after
            })
            .map(|r| r.instance.id.clone())
            .collect();

        let mut orphaned_names = Vec::new();
        for id in &purged {
            if let Some(record) = inner.instances.remove(id) {
                let name = record.instance.name;
                if inner.instances_of(&name).next().is_none() {
                    orphaned_names.push(name);
                }
            }
        }
        for name in orphaned_names {
            inner.tools.retain(|_, tool| tool.service_name != name);
        }
        drop(inner);

        for id in &purged {
            let _ = self.removals.send(id.clone());
            tracing::warn!(instance = %id, "purged expired instance");
        }
        purged
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};

    fn registration(id: &InstanceId, name: &str, tools: &[&str]) -> ServiceRegistration {
        ServiceRegistration {
            id: id.clone(),
            name: name.to_string(),
            address: finhub_core::ServiceAddress::new("127.0.0.1", 9301),
            tags: BTreeSet::from(["finance".to_string()]),
            metadata: BTreeMap::from([("version".to_string(), "0.3.0".to_string())]),
            health_endpoint: "http://127.0.0.1:9301/health".to_string(),
            tools: tools
                .iter()
                .map(|t| ToolDescriptor {
                    qualified_name: t.to_string(),
                    description: format!("{t} tool"),
                    input_schema: json!({"type": "object"}),
                    output_schema: None,
                    service_name: name.to_string(),
                })
                .collect(),
        }
    }

    fn test_registry() -> ServiceRegistry {
        ServiceRegistry::new(RegistryConfig::default())
    }

    #[tokio::test]
    async fn register_then_discover_roundtrip() {
        let registry = test_registry();
        let id = InstanceId::generate();
        let reg = registration(&id, "market-spoke", &["market.stock_quote"]);

        let stored = registry.register(reg).await.unwrap();
        assert_eq!(stored.status, HealthStatus::Passing);
        assert_eq!(stored.version, 1);

        let found = registry
            .discover(&DiscoverFilter::by_name("market-spoke"))
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert_eq!(found[0].address.port, 9301);
        assert!(found[0].tags.contains("finance"));
    }

    #[tokio::test]
    async fn tool_name_collision_rejects_later_registration() {
        let registry = test_registry();
        let first = InstanceId::generate();
        registry
            .register(registration(&first, "market-spoke", &["market.stock_quote"]))
            .await
            .unwrap();

        let second = InstanceId::generate();
        let err = registry
            .register(registration(&second, "rogue-spoke", &["market.stock_quote"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::ToolConflict { .. }));

        // The rejected instance is not visible at all.
        assert!(registry.get(&second).await.is_none());
    }

    #[tokio::test]
    async fn same_name_peer_may_advertise_same_tool() {
        let registry = test_registry();
        let a = InstanceId::generate();
        let b = InstanceId::generate();
        registry
            .register(registration(&a, "market-spoke", &["market.stock_quote"]))
            .await
            .unwrap();
        registry
            .register(registration(&b, "market-spoke", &["market.stock_quote"]))
            .await
            .unwrap();

        let peers = registry
            .discover(&DiscoverFilter::by_name("market-spoke"))
            .await;
        assert_eq!(peers.len(), 2);
    }

    #[tokio::test]
    async fn tools_survive_until_last_instance_leaves() {
        let registry = test_registry();
        let a = InstanceId::generate();
        let b = InstanceId::generate();
        registry
            .register(registration(&a, "market-spoke", &["market.stock_quote"]))
            .await
            .unwrap();
        registry
            .register(registration(&b, "market-spoke", &["market.stock_quote"]))
            .await
            .unwrap();

        registry.deregister(&a).await.unwrap();
        assert_eq!(registry.list_tools(HealthStatus::Passing).await.len(), 1);

        registry.deregister(&b).await.unwrap();
        assert!(registry.list_tools(HealthStatus::Passing).await.is_empty());
        assert!(registry.resolve_tool("market.stock_quote").await.is_none());
    }

    #[tokio::test]
    async fn probe_failures_degrade_in_steps() {
        let registry = test_registry();
        let id = InstanceId::generate();
        registry
            .register(registration(&id, "risk-spoke", &["risk.var"]))
            .await
            .unwrap();

        registry.record_probe_failure(&id).await;
        assert_eq!(
            registry.get(&id).await.unwrap().status,
            HealthStatus::Warning
        );

        registry.record_probe_failure(&id).await;
        registry.record_probe_failure(&id).await;
        assert_eq!(
            registry.get(&id).await.unwrap().status,
            HealthStatus::Critical
        );

        // Critical instances keep their tools invisible.
        assert!(registry.list_tools(HealthStatus::Passing).await.is_empty());

        // Any success recovers fully.
        registry.record_probe_success(&id).await;
        assert_eq!(
            registry.get(&id).await.unwrap().status,
            HealthStatus::Passing
        );
        assert_eq!(registry.list_tools(HealthStatus::Passing).await.len(), 1);
    }

    #[tokio::test]
    async fn version_is_monotonic_across_state_changes() {
        let registry = test_registry();
        let id = InstanceId::generate();
        registry
            .register(registration(&id, "risk-spoke", &[]))
            .await
            .unwrap();

        let mut last = 0;
        for _ in 0..4 {
            registry.record_probe_failure(&id).await;
            registry.heartbeat(&id).await.unwrap();
            let version = registry.get(&id).await.unwrap().version;
            assert!(version >= last, "version regressed: {version} < {last}");
            last = version;
        }
        registry.record_probe_success(&id).await;
        assert!(registry.get(&id).await.unwrap().version >= last);
    }

    #[tokio::test]
    async fn stale_heartbeat_forces_critical_and_ttl_purges() {
        let config = RegistryConfig {
            heartbeat_ttl_seconds: 0,
            deregister_after_seconds: 0,
            ..Default::default()
        };
        let registry = ServiceRegistry::new(config);
        let id = InstanceId::generate();
        registry
            .register(registration(&id, "market-spoke", &["market.stock_quote"]))
            .await
            .unwrap();
        let mut removals = registry.subscribe_removals();

        // TTLs of zero make any heartbeat immediately stale.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let purged = registry.sweep_expired().await;
        assert_eq!(purged, vec![id.clone()]);
        assert!(registry.get(&id).await.is_none());
        assert!(registry.resolve_tool("market.stock_quote").await.is_none());
        assert_eq!(removals.try_recv().unwrap(), id);
    }

    #[tokio::test]
    async fn discover_filters_by_min_status() {
        let registry = test_registry();
        let id = InstanceId::generate();
        registry
            .register(registration(&id, "market-spoke", &[]))
            .await
            .unwrap();
        registry.record_probe_failure(&id).await;

        assert!(registry
            .discover(&DiscoverFilter::by_name("market-spoke"))
            .await
            .is_empty());
        let warned = registry
            .discover(&DiscoverFilter::by_name("market-spoke").min_status(HealthStatus::Warning))
            .await;
        assert_eq!(warned.len(), 1);
    }

    #[tokio::test]
    async fn deregister_unknown_instance_errors() {
        let registry = test_registry();
        let err = registry.deregister(&InstanceId::generate()).await.unwrap_err();
        assert!(matches!(err, RegistryError::UnknownInstance(_)));
    }
}
