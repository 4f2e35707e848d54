//! Spoke lifecycle: serve, register, heartbeat, drain, deregister.
//!
//! Startup order: bind the MCP/health server first so the hub's probes
//! land somewhere, then register with backoff until the startup deadline.
//! Shutdown order: flip health to Critical, drain in-flight calls inside
//! the grace window, deregister, stop serving.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use finhub_core::{InstanceId, RetryPolicy, ServiceAddress, ServiceRegistration, SpokeConfig};
use finhub_registry::{RegistryClient, RegistryClientError};

use crate::registry::ToolRegistry;
use crate::server::{router, SpokeState};

#[derive(Debug, thiserror::Error)]
pub enum SpokeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Registration did not succeed before the startup deadline; startup
    /// fails rather than serving unregistered.
    #[error("registration did not succeed within {0:?}")]
    RegistrationTimeout(Duration),

    #[error(transparent)]
    Registry(#[from] RegistryClientError),
}

/// A running spoke process: tool registry, MCP server, and the hub
/// registration lifecycle.
pub struct Spoke {
    config: SpokeConfig,
    registry: Arc<ToolRegistry>,
    instance_id: InstanceId,
    tags: std::collections::BTreeSet<String>,
    metadata: std::collections::BTreeMap<String, String>,
}

impl Spoke {
    pub fn new(config: SpokeConfig, registry: ToolRegistry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            instance_id: InstanceId::generate(),
            tags: Default::default(),
            metadata: Default::default(),
        }
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Run until the token is cancelled. Returns once the graceful
    /// shutdown (drain + deregister) has completed.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), SpokeError> {
        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        let addr = listener.local_addr()?;

        let state = SpokeState::new(
            Arc::clone(&self.registry),
            Duration::from_secs(30),
        );
        let app = router(state.clone());
        let server_cancel = cancel.child_token();
        let server = tokio::spawn(async move {
            let shutdown = server_cancel.clone();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(err) = result {
                tracing::error!(error = %err, "spoke server failed");
            }
        });

        let client = RegistryClient::new(&self.config.hub_address);
        let registration = ServiceRegistration {
            id: self.instance_id.clone(),
            name: self.registry.service_name().to_string(),
            address: ServiceAddress::new(addr.ip().to_string(), addr.port()),
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
            health_endpoint: format!("http://{addr}/health"),
            tools: self.registry.descriptors(),
        };

        if let Err(err) = self
            .register_with_backoff(&client, &registration, &cancel)
            .await
        {
            server.abort();
            let _ = server.await;
            return Err(err);
        }
        tracing::info!(
            instance = %self.instance_id,
            service = %self.registry.service_name(),
            %addr,
            "spoke registered and serving"
        );

        // Heartbeat until shutdown. A missed heartbeat is logged and
        // retried on the next tick; the hub's TTL decides when it counts.
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = client.heartbeat(&self.instance_id).await {
                        tracing::warn!(error = %err, "heartbeat failed");
                    }
                }
            }
        }

        // Graceful shutdown: stop accepting via health, drain, deregister.
        state.begin_drain();
        let drain_deadline = Instant::now() + self.config.shutdown_grace();
        while state.in_flight() > 0 && Instant::now() < drain_deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if state.in_flight() > 0 {
            tracing::warn!(
                in_flight = state.in_flight(),
                "shutdown grace elapsed with calls still in flight"
            );
        }

        if let Err(err) = client.deregister(&self.instance_id).await {
            tracing::warn!(error = %err, "deregistration failed");
        }
        server.abort();
        let _ = server.await;
        Ok(())
    }

    /// Retry registration with exponential backoff until it succeeds or
    /// the startup deadline passes.
    async fn register_with_backoff(
        &self,
        client: &RegistryClient,
        registration: &ServiceRegistration,
        cancel: &CancellationToken,
    ) -> Result<(), SpokeError> {
        let deadline = Instant::now() + self.config.startup_registration_deadline();
        let policy = RetryPolicy::registration_default();
        let mut attempt: u32 = 0;

        loop {
            match client.register(registration).await {
                Ok(_) => return Ok(()),
                // A tool-name conflict will never resolve by retrying.
                Err(err @ RegistryClientError::Rejected { status: 409, .. }) => {
                    return Err(SpokeError::Registry(err));
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "registration attempt failed");
                }
            }

            attempt += 1;
            let delay = policy.delay_for_attempt(attempt);
            if Instant::now() + delay >= deadline {
                return Err(SpokeError::RegistrationTimeout(
                    self.config.startup_registration_deadline(),
                ));
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(SpokeError::RegistrationTimeout(Duration::ZERO));
                }
            }
        }
    }
}
