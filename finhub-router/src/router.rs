//! The dispatch pipeline.
//!
//! Resolve tool → enumerate Passing instances → filter by breaker →
//! weighted round-robin selection → bounded permit acquisition → invoke →
//! record the outcome. Retryable failures back off and fail over to the
//! remaining instances; application errors pass through untouched.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use finhub_core::{
    DiscoverFilter, HubError, InstanceId, RequestContext, RouterConfig, ServiceInstance,
};
use finhub_registry::ServiceRegistry;

use crate::breaker::{Availability, Breaker, BreakerState};
use crate::invoker::{InvokeError, SpokeInvoker};

/// Per-instance concurrency bookkeeping: the permit pool and the
/// in-flight gauge that feeds the balancer weights.
struct InstanceGauge {
    permits: Semaphore,
    in_flight: AtomicUsize,
}

/// Routes `tools/call` requests to healthy spoke instances.
pub struct ToolRouter {
    registry: Arc<ServiceRegistry>,
    invoker: Arc<dyn SpokeInvoker>,
    config: RouterConfig,
    breakers: Mutex<HashMap<(String, InstanceId), Arc<Breaker>>>,
    gauges: Mutex<HashMap<InstanceId, Arc<InstanceGauge>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ToolRouter {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        invoker: Arc<dyn SpokeInvoker>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            invoker,
            config,
            breakers: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver one tool call. See the module docs for the pipeline.
    pub async fn dispatch(
        &self,
        tool: &str,
        arguments: &Value,
        ctx: &RequestContext,
    ) -> Result<Value, HubError> {
        let service = self
            .registry
            .resolve_tool(tool)
            .await
            .ok_or_else(|| HubError::ToolNotFound(tool.to_string()))?;

        let retry = self.config.retry_policy();
        let mut excluded: HashSet<InstanceId> = HashSet::new();
        let mut attempt: u32 = 0;
        let mut last_error: Option<InvokeError> = None;

        loop {
            if ctx.is_cancelled() {
                return Err(HubError::Cancelled);
            }
            if ctx.is_expired() {
                return Err(HubError::DeadlineExceeded);
            }

            let candidates: Vec<ServiceInstance> = self
                .registry
                .discover(&DiscoverFilter::by_name(&service))
                .await
                .into_iter()
                .filter(|i| !excluded.contains(&i.id))
                .collect();
            if candidates.is_empty() {
                return Err(match last_error {
                    Some(InvokeError::Timeout) => HubError::DeadlineExceeded,
                    Some(err) => HubError::internal(format!(
                        "all instances of '{service}' failed, last error: {err}"
                    )),
                    None => HubError::NoHealthyInstance { service },
                });
            }

            let now = Instant::now();
            let Some((instance, is_probe)) = self.select(tool, &candidates, now) else {
                return Err(HubError::AllInstancesOpen {
                    tool: tool.to_string(),
                });
            };
            let breaker = self.breaker(tool, &instance.id);
            let gauge = self.gauge(&instance.id);

            // Step 5: bounded permit acquisition. Timing out excludes the
            // instance and re-selects; it is not a retry.
            let acquire_wait = self.config.acquire_wait().min(ctx.remaining());
            let permit = tokio::select! {
                permit = gauge.permits.acquire() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        if is_probe {
                            breaker.record_cancelled();
                        }
                        return Err(HubError::internal("instance permit pool closed"));
                    }
                },
                _ = ctx.cancelled() => {
                    if is_probe {
                        breaker.record_cancelled();
                    }
                    return Err(HubError::Cancelled);
                }
                _ = tokio::time::sleep(acquire_wait) => {
                    if is_probe {
                        breaker.record_cancelled();
                    }
                    if ctx.is_expired() {
                        return Err(HubError::DeadlineExceeded);
                    }
                    tracing::debug!(
                        instance = %instance.id,
                        tool,
                        "permit wait exceeded, excluding instance"
                    );
                    excluded.insert(instance.id.clone());
                    continue;
                }
            };

            gauge.in_flight.fetch_add(1, Ordering::SeqCst);
            let call_ctx = ctx.with_budget_capped(self.config.per_call_timeout());
            let result = tokio::select! {
                result = self.invoker.call_tool(&instance, tool, arguments, &call_ctx) => result,
                _ = ctx.cancelled() => Err(InvokeError::Cancelled),
                _ = tokio::time::sleep(call_ctx.remaining()) => Err(InvokeError::Timeout),
            };
            gauge.in_flight.fetch_sub(1, Ordering::SeqCst);
            drop(permit);

            match result {
                Ok(value) => {
                    breaker.record_success();
                    return Ok(value);
                }
                Err(InvokeError::Cancelled) => {
                    // Neither success nor failure for breaker purposes.
                    breaker.record_cancelled();
                    return Err(HubError::Cancelled);
                }
                Err(InvokeError::Rpc {
                    code,
                    message,
                    data,
                }) => {
                    // The spoke answered; connectivity is proven. The error
                    // is request-local and passes through unchanged.
                    breaker.record_success();
                    return Err(HubError::Upstream {
                        code,
                        message,
                        data,
                    });
                }
                Err(err) => {
                    breaker.record_failure(Instant::now());
                    tracing::warn!(
                        instance = %instance.id,
                        tool,
                        error = %err,
                        "spoke call failed"
                    );
                    excluded.insert(instance.id.clone());

                    if !retry.should_retry(attempt) {
                        return Err(match err {
                            InvokeError::Timeout => HubError::DeadlineExceeded,
                            other => HubError::internal(format!(
                                "spoke call failed after {} attempts: {other}",
                                attempt + 1
                            )),
                        });
                    }
                    last_error = Some(err);
                    attempt += 1;

                    let delay = retry.delay_for_attempt(attempt).min(ctx.remaining());
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = ctx.cancelled() => return Err(HubError::Cancelled),
                    }
                }
            }
        }
    }

    /// Steps 3–4: breaker filtering and weighted round-robin.
    ///
    /// Closed instances are ranked by weight `max(1, capacity − in_flight)`,
    /// ties by lowest in-flight, then lowest instance id. With no Closed
    /// instance, the least-recently-tried probe candidate gets the single
    /// HalfOpen probe slot. `None` means every candidate is open inside
    /// its cooldown (or its probe is already running).
    fn select(
        &self,
        tool: &str,
        candidates: &[ServiceInstance],
        now: Instant,
    ) -> Option<(ServiceInstance, bool)> {
        let mut ready: Vec<&ServiceInstance> = Vec::new();
        let mut probes: Vec<(&ServiceInstance, Option<Instant>)> = Vec::new();

        for instance in candidates {
            let breaker = self.breaker(tool, &instance.id);
            match breaker.availability(now) {
                Availability::Ready => ready.push(instance),
                Availability::ProbeCandidate => probes.push((instance, breaker.last_probe_at())),
                Availability::Blocked => {}
            }
        }

        if !ready.is_empty() {
            let chosen = ready.into_iter().min_by_key(|instance| {
                let in_flight = self.in_flight(&instance.id);
                let weight = self
                    .config
                    .per_instance_capacity
                    .saturating_sub(in_flight)
                    .max(1);
                (std::cmp::Reverse(weight), in_flight, instance.id.clone())
            })?;
            return Some((chosen.clone(), false));
        }

        probes.sort_by(|a, b| (a.1, &a.0.id).cmp(&(b.1, &b.0.id)));
        for (instance, _) in probes {
            if self.breaker(tool, &instance.id).begin_probe(now) {
                return Some((instance.clone(), true));
            }
        }
        None
    }

    fn breaker(&self, tool: &str, id: &InstanceId) -> Arc<Breaker> {
        let mut breakers = lock(&self.breakers);
        Arc::clone(
            breakers
                .entry((tool.to_string(), id.clone()))
                .or_insert_with(|| Arc::new(Breaker::new(self.config.breaker.clone()))),
        )
    }

    fn gauge(&self, id: &InstanceId) -> Arc<InstanceGauge> {
        let mut gauges = lock(&self.gauges);
        Arc::clone(gauges.entry(id.clone()).or_insert_with(|| {
            Arc::new(InstanceGauge {
                permits: Semaphore::new(self.config.per_instance_capacity),
                in_flight: AtomicUsize::new(0),
            })
        }))
    }

    /// In-flight spoke calls against one instance.
    pub fn in_flight(&self, id: &InstanceId) -> usize {
        lock(&self.gauges)
            .get(id)
            .map(|g| g.in_flight.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Breaker state and failure streak for one (tool, instance) pair.
    pub fn breaker_snapshot(&self, tool: &str, id: &InstanceId) -> Option<(BreakerState, u32)> {
        lock(&self.breakers)
            .get(&(tool.to_string(), id.clone()))
            .map(|b| (b.state(), b.consecutive_failures()))
    }

    /// Drop breaker cells and the permit pool for a removed instance.
    pub fn evict_instance(&self, id: &InstanceId) {
        lock(&self.breakers).retain(|(_, instance_id), _| instance_id != id);
        lock(&self.gauges).remove(id);
    }
}
