//! Orchestrator facade: the single entry point for callers.
//!
//! Binds one [`ResourcePool`], [`HealthChecker`] and [`Sweeper`] per resource
//! kind plus one shared [`AlertRuleEngine`], and owns their background loops.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::core::alerts::{
    AlertEvent, AlertInstance, AlertRule, AlertRuleEngine, MetricsSnapshot, RuleState,
};
use crate::core::error::OrchestratorError;
use crate::core::health::{CycleReport, HealthChecker};
use crate::core::record::{
    Lease, LeaseRequirements, NewResource, ReleaseOutcome, ResourceFilter, ResourceRecord,
    ResourceUpdate,
};
use crate::core::resource_pool::{PoolMetrics, ResourcePool};
use crate::core::sweeper::{SweepReport, Sweeper};
use crate::runtime::lifecycle::{BackgroundTasks, ShutdownReport};
use crate::util::clock::{Clock, SharedClock};
use crate::util::serde::{ResourceId, ResourceKind};

/// Pool plus the loops that maintain it.
pub struct PoolUnit {
    /// The pool.
    pub pool: Arc<ResourcePool>,
    /// Its health checker.
    pub health: Arc<HealthChecker>,
    /// Its sweeper.
    pub sweeper: Arc<Sweeper>,
}

/// Composition root over all pools and the alert engine.
pub struct Orchestrator {
    units: BTreeMap<ResourceKind, PoolUnit>,
    alerts: Arc<AlertRuleEngine>,
    clock: SharedClock,
    alert_interval: Duration,
    shutdown_grace: Duration,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl Orchestrator {
    pub(crate) fn from_parts(
        units: BTreeMap<ResourceKind, PoolUnit>,
        alerts: Arc<AlertRuleEngine>,
        clock: SharedClock,
        alert_interval: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            units,
            alerts,
            clock,
            alert_interval,
            shutdown_grace,
            tasks: Mutex::new(None),
        }
    }

    fn unit(&self, kind: ResourceKind) -> Result<&PoolUnit, OrchestratorError> {
        self.units
            .get(&kind)
            .ok_or(OrchestratorError::UnknownKind(kind))
    }

    /// Pool serving `kind`.
    pub fn pool(&self, kind: ResourceKind) -> Result<&Arc<ResourcePool>, OrchestratorError> {
        self.unit(kind).map(|u| &u.pool)
    }

    /// Kinds with a configured pool.
    pub fn kinds(&self) -> Vec<ResourceKind> {
        self.units.keys().copied().collect()
    }

    /// The alert engine.
    pub fn alert_engine(&self) -> &Arc<AlertRuleEngine> {
        &self.alerts
    }

    // ========== Lease contract ==========

    /// Lease the best matching resource of `kind`.
    pub fn lease(
        &self,
        kind: ResourceKind,
        requirements: &LeaseRequirements,
    ) -> Result<Lease, OrchestratorError> {
        self.pool(kind)?.lease(requirements)
    }

    /// Return a resource by id.
    pub fn release(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        outcome: ReleaseOutcome,
    ) -> Result<ResourceRecord, OrchestratorError> {
        self.pool(kind)?.release(id, outcome)
    }

    /// Return a resource, checking that `lease` is still the outstanding one.
    pub fn release_lease(
        &self,
        lease: &Lease,
        outcome: ReleaseOutcome,
    ) -> Result<ResourceRecord, OrchestratorError> {
        self.pool(lease.kind)?.release_lease(lease, outcome)
    }

    // ========== Admin CRUD ==========

    /// Add a resource to the pool matching its kind.
    pub fn add_resource(&self, input: NewResource) -> Result<ResourceRecord, OrchestratorError> {
        self.pool(input.details.kind())?.add_resource(input)
    }

    /// Update config fields of a resource.
    pub fn update_resource(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        update: ResourceUpdate,
    ) -> Result<ResourceRecord, OrchestratorError> {
        self.pool(kind)?.update_resource(id, update)
    }

    /// Apply one config update to several resources of a kind, all or nothing.
    pub fn bulk_update(
        &self,
        kind: ResourceKind,
        ids: &[ResourceId],
        update: &ResourceUpdate,
    ) -> Result<Vec<ResourceRecord>, OrchestratorError> {
        self.pool(kind)?.bulk_update(ids, update)
    }

    /// Remove an unleased resource.
    pub fn remove_resource(
        &self,
        kind: ResourceKind,
        id: ResourceId,
    ) -> Result<ResourceRecord, OrchestratorError> {
        self.pool(kind)?.remove_resource(id)
    }

    /// Snapshot of one resource.
    pub fn get_resource(
        &self,
        kind: ResourceKind,
        id: ResourceId,
    ) -> Result<ResourceRecord, OrchestratorError> {
        self.pool(kind)?.get(id)
    }

    /// Resources of `kind` matching `filter`.
    pub fn list_resources(
        &self,
        kind: ResourceKind,
        filter: &ResourceFilter,
    ) -> Result<Vec<ResourceRecord>, OrchestratorError> {
        Ok(self.pool(kind)?.list(filter))
    }

    /// Quarantine a resource.
    pub fn quarantine(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        reason: impl Into<String>,
    ) -> Result<ResourceRecord, OrchestratorError> {
        self.pool(kind)?.quarantine(id, reason)
    }

    /// Reactivate a resource; `force` is required to lift a ban.
    pub fn reactivate(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        force: bool,
    ) -> Result<ResourceRecord, OrchestratorError> {
        self.pool(kind)?.reactivate(id, force)
    }

    /// Ban a resource on an external signal.
    pub fn ban(
        &self,
        kind: ResourceKind,
        id: ResourceId,
        reason: impl Into<String>,
    ) -> Result<ResourceRecord, OrchestratorError> {
        self.pool(kind)?.ban(id, reason)
    }

    // ========== Metrics ==========

    /// Metrics of one pool.
    pub fn metrics(&self, kind: ResourceKind) -> Result<PoolMetrics, OrchestratorError> {
        Ok(self.pool(kind)?.metrics())
    }

    /// Metrics of every pool, captured together.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::capture(
            self.units.values().map(|u| u.pool.as_ref()),
            Clock::now(self.clock.as_ref()),
        )
    }

    // ========== Alert rules ==========

    /// Register a rule.
    pub fn add_rule(&self, rule: AlertRule) -> Result<(), OrchestratorError> {
        self.alerts.add_rule(rule)
    }

    /// Replace a rule definition.
    pub async fn update_rule(
        &self,
        rule: AlertRule,
    ) -> Result<Option<AlertEvent>, OrchestratorError> {
        self.alerts.update_rule(rule, Clock::now(self.clock.as_ref())).await
    }

    /// Delete a rule, suppressing its open instance.
    pub async fn remove_rule(&self, rule_id: &str) -> Result<AlertRule, OrchestratorError> {
        self.alerts.remove_rule(rule_id, Clock::now(self.clock.as_ref())).await
    }

    /// Enable a rule.
    pub fn enable_rule(&self, rule_id: &str) -> Result<(), OrchestratorError> {
        self.alerts.enable_rule(rule_id)
    }

    /// Disable a rule, suppressing its open instance.
    pub async fn disable_rule(
        &self,
        rule_id: &str,
    ) -> Result<Option<AlertEvent>, OrchestratorError> {
        self.alerts.disable_rule(rule_id, Clock::now(self.clock.as_ref())).await
    }

    /// Rules with their evaluation state.
    pub fn rule_states(&self) -> Vec<RuleState> {
        self.alerts.rule_states()
    }

    /// Open alert instances.
    pub fn open_alerts(&self) -> Vec<AlertInstance> {
        self.alerts.open_instances()
    }

    /// Closed alert instances.
    pub fn alert_history(&self) -> Vec<AlertInstance> {
        self.alerts.history()
    }

    /// Evaluate all rules against a fresh snapshot now.
    pub async fn evaluate_alerts(&self) -> Vec<AlertEvent> {
        let snapshot = self.metrics_snapshot();
        self.alerts.evaluate(&snapshot).await
    }

    // ========== Maintenance ==========

    /// Run one health check cycle for `kind` outside the background loop.
    pub async fn run_health_cycle(
        &self,
        kind: ResourceKind,
    ) -> Result<CycleReport, OrchestratorError> {
        Ok(self.unit(kind)?.health.run_cycle().await)
    }

    /// Run one sweep for `kind` outside the background loop.
    pub fn run_sweep(&self, kind: ResourceKind) -> Result<SweepReport, OrchestratorError> {
        Ok(self.unit(kind)?.sweeper.run_once())
    }

    // ========== Lifecycle ==========

    /// Whether background loops are running.
    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    /// Launch the health checker and sweeper of every pool, plus the alert
    /// evaluator. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), OrchestratorError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(OrchestratorError::InvalidRequest(
                "start() requires a tokio runtime".into(),
            ));
        }
        let mut guard = self.tasks.lock();
        if guard.is_some() {
            return Err(OrchestratorError::AlreadyRunning);
        }
        let mut tasks = BackgroundTasks::new();
        for (kind, unit) in &self.units {
            let handle = Arc::clone(&unit.health)
                .start_with_shutdown(tasks.subscribe(), self.shutdown_grace);
            tasks.push(format!("health:{kind}"), handle);
            let handle = Arc::clone(&unit.sweeper).start_with_shutdown(tasks.subscribe());
            tasks.push(format!("sweeper:{kind}"), handle);
        }
        let handle = Arc::clone(&self.alerts).start_with_shutdown(
            self.units.values().map(|u| Arc::clone(&u.pool)).collect(),
            Arc::clone(&self.clock),
            self.alert_interval,
            tasks.subscribe(),
        );
        tasks.push("alerts", handle);
        info!(pools = self.units.len(), "orchestrator started");
        *guard = Some(tasks);
        Ok(())
    }

    /// Stop all background loops. In-flight probes get the configured grace
    /// period to finish, then everything still running is aborted. Calling
    /// `stop` when nothing runs is a no-op.
    pub async fn stop(&self) -> ShutdownReport {
        let tasks = self.tasks.lock().take();
        match tasks {
            Some(tasks) => {
                let report = tasks.shutdown(self.shutdown_grace).await;
                info!("orchestrator stopped");
                report
            }
            None => ShutdownReport::default(),
        }
    }
}
