//! Background health checking of quarantined and untested resources.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::HealthCheckConfig;
use crate::core::error::ProbeError;
use crate::core::record::{ResourceDetails, ResourceStatus};
use crate::core::resource_pool::ResourcePool;
use crate::util::serde::{ResourceId, ResourceKind};

/// Snapshot handed to a [`Prober`]. The prober never sees the live record.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeTarget {
    /// Record being probed.
    pub id: ResourceId,
    /// Status at checkout (`testing` or `inactive`).
    pub status: ResourceStatus,
    /// Connection attributes.
    pub details: ResourceDetails,
}

impl ProbeTarget {
    /// Kind of the probed record.
    pub const fn kind(&self) -> ResourceKind {
        self.details.kind()
    }
}

/// Successful probe result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Measured latency, written back to the record's speed/response time.
    pub latency_ms: Option<u32>,
}

impl ProbeReport {
    /// Healthy, no measurement.
    pub const fn healthy() -> Self {
        Self { latency_ms: None }
    }

    /// Healthy with a measured latency.
    pub const fn with_latency(latency_ms: u32) -> Self {
        Self {
            latency_ms: Some(latency_ms),
        }
    }
}

/// Checks whether a resource works. Implementations do the I/O.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe one resource.
    async fn probe(&self, target: &ProbeTarget) -> Result<ProbeReport, ProbeError>;
}

/// Tally of one probe cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Probes started.
    pub probed: usize,
    /// Records moved to `active`.
    pub activated: usize,
    /// Records left in or moved to `inactive`.
    pub inactive: usize,
    /// Records escalated to `banned`.
    pub banned: usize,
    /// Results dropped because the record changed while probing.
    pub discarded: usize,
}

/// Clears probe claims that were not resolved, e.g. when a cycle is cancelled.
///
/// A resolved id may already be claimed again by another cycle, so it must be
/// taken out of the set before the guard drops.
struct ProbeClaim<'a> {
    pool: &'a ResourcePool,
    ids: BTreeSet<ResourceId>,
}

impl ProbeClaim<'_> {
    fn resolve(&mut self, id: ResourceId) {
        self.ids.remove(&id);
    }
}

impl Drop for ProbeClaim<'_> {
    fn drop(&mut self) {
        self.pool.release_probe_claims(std::mem::take(&mut self.ids));
    }
}

/// Periodically probes `testing` and `inactive` records of one pool.
pub struct HealthChecker {
    pool: Arc<ResourcePool>,
    prober: Arc<dyn Prober>,
    check_interval: Duration,
    max_concurrent: usize,
    probe_timeout: Duration,
}

impl HealthChecker {
    /// Create a checker for `pool`.
    #[must_use]
    pub fn new(pool: Arc<ResourcePool>, prober: Arc<dyn Prober>, config: &HealthCheckConfig) -> Self {
        Self {
            pool,
            prober,
            check_interval: Duration::from_secs(config.interval_secs),
            max_concurrent: config.max_concurrent_probes.max(1),
            probe_timeout: Duration::from_millis(config.probe_timeout_ms),
        }
    }

    /// Pool being checked.
    pub const fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }

    /// Probe every eligible record once, at most `max_concurrent` at a time.
    ///
    /// Leased records are never probed, and records claimed for probing are not
    /// leasable until their result is applied. Dropping the future cancels the
    /// outstanding probes and releases their claims.
    pub async fn run_cycle(&self) -> CycleReport {
        let targets = self.pool.checkout_probe_targets();
        let mut report = CycleReport {
            probed: targets.len(),
            ..CycleReport::default()
        };
        if targets.is_empty() {
            return report;
        }
        let mut claim = ProbeClaim {
            pool: &self.pool,
            ids: targets.iter().map(|t| t.id).collect(),
        };

        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut probes = JoinSet::new();
        for target in targets {
            let permits = Arc::clone(&permits);
            let prober = Arc::clone(&self.prober);
            let timeout = self.probe_timeout;
            probes.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = tokio::time::timeout(timeout, prober.probe(&target))
                    .await
                    .unwrap_or(Err(ProbeError::Timeout(timeout)));
                (target.id, result)
            });
        }

        while let Some(joined) = probes.join_next().await {
            let (id, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(kind = %self.pool.kind(), error = %e, "probe task failed");
                    continue;
                }
            };
            if let Err(err) = &result {
                warn!(kind = %self.pool.kind(), resource_id = %id, error = %err, "probe failed");
            }
            let applied = self.pool.apply_probe_result(id, result);
            claim.resolve(id);
            match applied {
                Some(ResourceStatus::Active) => report.activated += 1,
                Some(ResourceStatus::Inactive) => report.inactive += 1,
                Some(ResourceStatus::Banned) => report.banned += 1,
                Some(_) | None => report.discarded += 1,
            }
        }

        debug!(
            kind = %self.pool.kind(),
            probed = report.probed,
            activated = report.activated,
            banned = report.banned,
            "health check cycle finished"
        );
        report
    }

    /// Run cycles on a fixed interval until `shutdown_rx` fires.
    ///
    /// A cycle in flight at shutdown gets `grace` to finish; after that its
    /// probes are cancelled.
    #[must_use]
    pub fn start_with_shutdown(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
        grace: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                kind = %self.pool.kind(),
                interval_secs = self.check_interval.as_secs(),
                "health checker started"
            );
            let mut ticker = interval(self.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cycle = self.run_cycle();
                        tokio::pin!(cycle);
                        tokio::select! {
                            _ = &mut cycle => {}
                            _ = shutdown_rx.recv() => {
                                if tokio::time::timeout(grace, &mut cycle).await.is_err() {
                                    warn!(kind = %self.pool.kind(), "in-flight probes cancelled after grace period");
                                }
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!(kind = %self.pool.kind(), "health checker shutting down");
        })
    }
}
