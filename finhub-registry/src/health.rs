//! Background health sweeper.
//!
//! Polls each instance's health endpoint on a fixed interval. Each probe
//! runs under its own timeout so a single slow or crashed upstream never
//! stalls the sweep of the others. A failed probe is a normal event:
//! logged, recorded against the instance, never surfaced to callers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use finhub_core::{HealthReport, HealthStatus, RegistryConfig};

use crate::registry::ServiceRegistry;

#[derive(Debug, thiserror::Error)]
#[error("probe failed: {0}")]
pub struct ProbeError(pub String);

/// One health probe against a spoke's health endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, endpoint: &str) -> Result<HealthReport, ProbeError>;
}

/// Production probe: GET the endpoint, expect HTTP 200 with a Passing
/// report. Any non-200, parse failure, or non-Passing status degrades the
/// instance.
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, endpoint: &str) -> Result<HealthReport, ProbeError> {
        let response = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(|e| ProbeError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProbeError(format!("status {}", response.status())));
        }
        response
            .json::<HealthReport>()
            .await
            .map_err(|e| ProbeError(e.to_string()))
    }
}

/// Owns the sweep loop.
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    probe: Arc<dyn HealthProbe>,
    config: RegistryConfig,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        probe: Arc<dyn HealthProbe>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            registry,
            probe,
            config,
        }
    }

    /// Spawn the sweep loop; it runs until the token is cancelled.
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.probe_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("health sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.sweep_once().await;
                    }
                }
            }
        })
    }

    /// One full sweep: probe every instance concurrently, then apply
    /// heartbeat staleness and the deregistration TTL.
    pub async fn sweep_once(&self) {
        let targets = self.registry.probe_targets().await;
        let timeout = self.config.probe_timeout();

        let probes = targets.into_iter().map(|(id, endpoint)| {
            let probe = Arc::clone(&self.probe);
            let registry = Arc::clone(&self.registry);
            async move {
                match tokio::time::timeout(timeout, probe.probe(&endpoint)).await {
                    Ok(Ok(report)) if report.status == HealthStatus::Passing => {
                        registry.record_probe_success(&id).await;
                    }
                    Ok(Ok(report)) => {
                        tracing::debug!(instance = %id, status = %report.status, "degraded probe");
                        registry.record_probe_failure(&id).await;
                    }
                    Ok(Err(err)) => {
                        tracing::debug!(instance = %id, error = %err, "probe failed");
                        registry.record_probe_failure(&id).await;
                    }
                    Err(_) => {
                        tracing::debug!(instance = %id, "probe timed out after {timeout:?}");
                        registry.record_probe_failure(&id).await;
                    }
                }
            }
        });
        futures::future::join_all(probes).await;

        self.registry.sweep_expired().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use finhub_core::{InstanceId, ServiceAddress, ServiceRegistration};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Scripted probe: per-endpoint queue of outcomes; empty queue means
    /// success.
    struct ScriptedProbe {
        outcomes: Mutex<HashMap<String, Vec<Result<HealthReport, String>>>>,
    }

    impl ScriptedProbe {
        fn new() -> Self {
            Self {
                outcomes: Mutex::new(HashMap::new()),
            }
        }

        async fn push_failure(&self, endpoint: &str, count: usize) {
            let mut outcomes = self.outcomes.lock().await;
            let queue = outcomes.entry(endpoint.to_string()).or_default();
            for _ in 0..count {
                queue.push(Err("connection refused".to_string()));
            }
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, endpoint: &str) -> Result<HealthReport, ProbeError> {
            let mut outcomes = self.outcomes.lock().await;
            match outcomes.get_mut(endpoint).and_then(|q| {
                if q.is_empty() {
                    None
                } else {
                    Some(q.remove(0))
                }
            }) {
                Some(Ok(report)) => Ok(report),
                Some(Err(e)) => Err(ProbeError(e)),
                None => Ok(HealthReport::passing()),
            }
        }
    }

    /// Probe that never returns; exercises the per-probe timeout.
    struct HangingProbe;

    #[async_trait]
    impl HealthProbe for HangingProbe {
        async fn probe(&self, _endpoint: &str) -> Result<HealthReport, ProbeError> {
            futures::future::pending().await
        }
    }

    fn registration(name: &str, endpoint: &str) -> ServiceRegistration {
        ServiceRegistration {
            id: InstanceId::generate(),
            name: name.to_string(),
            address: ServiceAddress::new("127.0.0.1", 9400),
            tags: Default::default(),
            metadata: Default::default(),
            health_endpoint: endpoint.to_string(),
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn sweep_degrades_failing_instance_and_recovers() {
        let registry = Arc::new(ServiceRegistry::new(RegistryConfig::default()));
        let probe = Arc::new(ScriptedProbe::new());
        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            probe.clone(),
            RegistryConfig::default(),
        );

        let reg = registration("market-spoke", "http://spoke-a/health");
        let id = reg.id.clone();
        registry.register(reg).await.unwrap();

        probe.push_failure("http://spoke-a/health", 3).await;

        monitor.sweep_once().await;
        assert_eq!(
            registry.get(&id).await.unwrap().status,
            HealthStatus::Warning
        );

        monitor.sweep_once().await;
        monitor.sweep_once().await;
        assert_eq!(
            registry.get(&id).await.unwrap().status,
            HealthStatus::Critical
        );

        // Queue drained: next probe passes and the instance recovers.
        monitor.sweep_once().await;
        assert_eq!(
            registry.get(&id).await.unwrap().status,
            HealthStatus::Passing
        );
    }

    #[tokio::test]
    async fn hanging_probe_only_degrades_its_own_instance() {
        let config = RegistryConfig {
            probe_timeout_seconds: 0,
            ..Default::default()
        };
        let registry = Arc::new(ServiceRegistry::new(config.clone()));

        let healthy = registration("risk-spoke", "healthy");
        let healthy_id = healthy.id.clone();
        registry.register(healthy).await.unwrap();

        let hung = registration("market-spoke", "hung");
        let hung_id = hung.id.clone();
        registry.register(hung).await.unwrap();

        // Both instances go through the hanging probe path; the zero
        // timeout turns every probe into a failure, but the sweep itself
        // must still complete.
        let monitor = HealthMonitor::new(Arc::clone(&registry), Arc::new(HangingProbe), config);
        tokio::time::timeout(Duration::from_secs(2), monitor.sweep_once())
            .await
            .expect("sweep must not hang");

        assert_eq!(
            registry.get(&hung_id).await.unwrap().status,
            HealthStatus::Warning
        );
        assert_eq!(
            registry.get(&healthy_id).await.unwrap().status,
            HealthStatus::Warning
        );
    }

    #[tokio::test]
    async fn spawned_sweeper_is_cancellable() {
        let registry = Arc::new(ServiceRegistry::new(RegistryConfig::default()));
        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            Arc::new(ScriptedProbe::new()),
            RegistryConfig::default(),
        );

        let cancel = CancellationToken::new();
        let handle = monitor.spawn(cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper must stop on cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn non_passing_report_degrades() {
        let registry = Arc::new(ServiceRegistry::new(RegistryConfig::default()));
        let probe = Arc::new(ScriptedProbe::new());
        {
            let mut outcomes = probe.outcomes.lock().await;
            outcomes.insert(
                "http://spoke-b/health".to_string(),
                vec![Ok(HealthReport {
                    status: HealthStatus::Critical,
                    detail: Some("database gone".to_string()),
                })],
            );
        }
        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            probe,
            RegistryConfig::default(),
        );

        let reg = registration("portfolio-spoke", "http://spoke-b/health");
        let id = reg.id.clone();
        registry.register(reg).await.unwrap();

        monitor.sweep_once().await;
        assert_eq!(
            registry.get(&id).await.unwrap().status,
            HealthStatus::Warning
        );
    }
}
