//! Resource pool: lease, release, quarantine and admin operations.
//!
//! A pool owns every [`ResourceRecord`] of one kind behind a single
//! `parking_lot::Mutex`. All mutation goes through pool methods, so per-record
//! updates are linearized and "leased" and "being probed" are checked at one
//! choke point. The lock is never held across an `.await`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::audit::{build_audit_event, AuditAction, AuditEvent, AuditSink};
use crate::core::error::{OrchestratorError, ProbeError};
use crate::core::health::{ProbeReport, ProbeTarget};
use crate::core::record::{
    ActiveLease, Lease, LeaseRequirements, NewResource, ProxyProtocol, ReleaseOutcome,
    ResourceDetails, ResourceFilter, ResourceRecord, ResourceStatus, ResourceUpdate,
};
use crate::core::scoring::{select_best, ScoringWeights};
use crate::util::clock::{Clock, SharedClock, SystemClock};
use crate::util::serde::{LeaseToken, ResourceId, ResourceKind};

/// Ban reason used when probing gives up on a quarantined resource.
pub const HEALTH_CHECK_EXHAUSTED: &str = "health-check exhausted";

/// Behavioural knobs of one pool.
#[derive(Debug, Clone)]
pub struct PoolPolicy {
    /// Scoring weights for selection.
    pub weights: ScoringWeights,
    /// Smoothing factor of the success-rate EMA, in `(0, 1]`.
    pub ema_alpha: f64,
    /// Success rate below which consecutive failures quarantine a resource.
    pub failure_floor: f64,
    /// Consecutive failures (while below the floor) that trigger quarantine.
    pub quarantine_after_failures: u32,
    /// Consecutive failed probes while inactive that escalate to a ban.
    pub ban_after_probe_failures: u32,
    /// Success rate assigned to new records.
    pub initial_success_rate: f64,
    /// Longest a caller may hold a lease before it is reclaimed.
    pub max_lease: Duration,
    /// New records start in `testing` and wait for a passing probe.
    pub health_check_on_add: bool,
    /// How long expired records are kept before being purged.
    pub expired_retention: Duration,
}

impl PoolPolicy {
    /// Defaults for a kind.
    pub const fn for_kind(kind: ResourceKind) -> Self {
        Self {
            weights: ScoringWeights::for_kind(kind),
            ema_alpha: 0.1,
            failure_floor: 30.0,
            quarantine_after_failures: 3,
            ban_after_probe_failures: 5,
            initial_success_rate: 100.0,
            max_lease: Duration::from_secs(300),
            health_check_on_add: true,
            expired_retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Record counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Awaiting first probe.
    pub testing: usize,
    /// Selectable.
    pub active: usize,
    /// Quarantined.
    pub inactive: usize,
    /// Banned.
    pub banned: usize,
    /// Expired, awaiting purge.
    pub expired: usize,
}

impl StatusCounts {
    fn bump(&mut self, status: ResourceStatus) {
        match status {
            ResourceStatus::Testing => self.testing += 1,
            ResourceStatus::Active => self.active += 1,
            ResourceStatus::Inactive => self.inactive += 1,
            ResourceStatus::Banned => self.banned += 1,
            ResourceStatus::Expired => self.expired += 1,
        }
    }

    /// Count for one status.
    pub const fn get(&self, status: ResourceStatus) -> usize {
        match status {
            ResourceStatus::Testing => self.testing,
            ResourceStatus::Active => self.active,
            ResourceStatus::Inactive => self.inactive,
            ResourceStatus::Banned => self.banned,
            ResourceStatus::Expired => self.expired,
        }
    }
}

/// Point-in-time snapshot of a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    /// Pool kind.
    pub kind: ResourceKind,
    /// Total records.
    pub total: usize,
    /// Records per status.
    pub by_status: StatusCounts,
    /// Records currently leased.
    pub leased: usize,
    /// Records a `lease` with no requirements could return right now.
    pub available: usize,
    /// Mean success rate over non-expired records.
    pub avg_success_rate: Option<f64>,
    /// Records behind `avg_success_rate`.
    #[serde(default)]
    pub rate_samples: usize,
    /// Mean known latency.
    pub avg_latency_ms: Option<f64>,
    /// Records with a known latency.
    #[serde(default)]
    pub latency_samples: usize,
    /// Mean known cost per use.
    pub avg_cost_per_use: Option<f64>,
    /// Records with a known cost.
    #[serde(default)]
    pub cost_samples: usize,
    /// Sum of daily usage.
    pub daily_usage_total: u64,
    /// Sum of monthly usage.
    pub monthly_usage_total: u64,
    /// Proxy count per protocol.
    pub by_protocol: BTreeMap<ProxyProtocol, usize>,
    /// Distinct proxy exit countries.
    pub distinct_countries: usize,
    /// Snapshot time.
    pub captured_at: DateTime<Utc>,
}

impl PoolMetrics {
    /// `banned / total`, zero for an empty pool.
    #[allow(clippy::cast_precision_loss)]
    pub fn banned_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.by_status.banned as f64 / self.total as f64
        }
    }

    /// `inactive / total`, zero for an empty pool.
    #[allow(clippy::cast_precision_loss)]
    pub fn inactive_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.by_status.inactive as f64 / self.total as f64
        }
    }
}

type StatusChange = (ResourceStatus, ResourceStatus, Option<String>);

fn ema(current: f64, target: f64, alpha: f64) -> f64 {
    current.mul_add(1.0 - alpha, target * alpha).clamp(0.0, 100.0)
}

#[derive(Default)]
struct PoolState {
    records: BTreeMap<ResourceId, ResourceRecord>,
}

/// Pool of resources of a single kind.
pub struct ResourcePool {
    kind: ResourceKind,
    policy: PoolPolicy,
    state: Mutex<PoolState>,
    ids: Arc<AtomicU64>,
    clock: SharedClock,
    audit: Option<Arc<Mutex<Box<dyn AuditSink>>>>,
}

impl ResourcePool {
    /// Create an empty pool using the system clock.
    pub fn new(kind: ResourceKind, policy: PoolPolicy) -> Self {
        Self {
            kind,
            policy,
            state: Mutex::new(PoolState::default()),
            ids: Arc::new(AtomicU64::new(1)),
            clock: Arc::new(SystemClock),
            audit: None,
        }
    }

    /// Read time from `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Share an id allocator with other pools so ids are globally unique.
    #[must_use]
    pub fn with_id_allocator(mut self, ids: Arc<AtomicU64>) -> Self {
        self.ids = ids;
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<Mutex<Box<dyn AuditSink>>>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Kind of every record in this pool.
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Active policy.
    pub const fn policy(&self) -> &PoolPolicy {
        &self.policy
    }

    /// Current time according to the pool clock.
    pub fn now(&self) -> DateTime<Utc> {
        Clock::now(self.clock.as_ref())
    }

    fn event(&self, id: ResourceId, action: AuditAction, at: DateTime<Utc>) -> AuditEvent {
        build_audit_event(id, self.kind, action, at)
    }

    fn transition_events(
        &self,
        id: ResourceId,
        changes: Vec<StatusChange>,
        at: DateTime<Utc>,
        events: &mut Vec<AuditEvent>,
    ) {
        for (from, to, reason) in changes {
            tracing::info!(
                kind = %self.kind,
                resource_id = %id,
                %from,
                %to,
                reason = reason.as_deref().unwrap_or(""),
                "resource status changed"
            );
            events.push(self.event(id, AuditAction::Transition { from, to, reason }, at));
        }
    }

    /// Record audit events after the state lock has been released.
    fn flush(&self, events: Vec<AuditEvent>) {
        if events.is_empty() {
            return;
        }
        if let Some(audit) = &self.audit {
            let mut sink = audit.lock();
            for event in events {
                sink.record(event);
            }
        }
    }

    fn check_kind(&self, details: &ResourceDetails) -> Result<(), OrchestratorError> {
        if details.kind() == self.kind {
            Ok(())
        } else {
            Err(OrchestratorError::KindMismatch {
                expected: self.kind,
                actual: details.kind(),
            })
        }
    }

    // ========== Admin ==========

    /// Add a record. It starts in `testing` when the policy health-checks new
    /// arrivals, otherwise in `active`.
    pub fn add_resource(&self, input: NewResource) -> Result<ResourceRecord, OrchestratorError> {
        self.check_kind(&input.details)?;
        let now = self.now();
        let id = ResourceId(self.ids.fetch_add(1, Ordering::Relaxed));
        let status = if self.policy.health_check_on_add {
            ResourceStatus::Testing
        } else {
            ResourceStatus::Active
        };
        let record =
            ResourceRecord::new(id, input, status, self.policy.initial_success_rate, now);
        {
            let mut state = self.state.lock();
            state.records.insert(id, record.clone());
        }
        tracing::info!(kind = %self.kind, resource_id = %id, %status, "resource added");
        self.flush(vec![self.event(id, AuditAction::Added, now)]);
        Ok(record)
    }

    /// Apply a config-only update. Derived fields are rejected.
    pub fn update_resource(
        &self,
        id: ResourceId,
        update: ResourceUpdate,
    ) -> Result<ResourceRecord, OrchestratorError> {
        update.check_mutable()?;
        if let Some(details) = &update.details {
            self.check_kind(details)?;
        }
        let now = self.now();
        let updated = {
            let mut state = self.state.lock();
            let record = state
                .records
                .get_mut(&id)
                .ok_or(OrchestratorError::ResourceNotFound(id))?;
            check_quota_update(record, &update)?;
            apply_update(record, update);
            record.clone()
        };
        self.flush(vec![self.event(id, AuditAction::Updated, now)]);
        Ok(updated)
    }

    /// Apply the same config-only update to several records.
    ///
    /// All ids are validated before any record changes, so either every record
    /// is updated or none is. Replacing `details` is rejected: it carries the
    /// identity of a single resource.
    pub fn bulk_update(
        &self,
        ids: &[ResourceId],
        update: &ResourceUpdate,
    ) -> Result<Vec<ResourceRecord>, OrchestratorError> {
        update.check_mutable()?;
        if update.details.is_some() {
            return Err(OrchestratorError::InvalidRequest(
                "details cannot be bulk-updated".into(),
            ));
        }
        let ids: BTreeSet<ResourceId> = ids.iter().copied().collect();
        let now = self.now();
        let updated = {
            let mut state = self.state.lock();
            for id in &ids {
                let record = state
                    .records
                    .get(id)
                    .ok_or(OrchestratorError::ResourceNotFound(*id))?;
                check_quota_update(record, update)?;
            }
            state
                .records
                .iter_mut()
                .filter(|(id, _)| ids.contains(id))
                .map(|(_, record)| record)
                .map(|record| {
                    apply_update(record, update.clone());
                    record.clone()
                })
                .collect::<Vec<_>>()
        };
        tracing::info!(kind = %self.kind, count = updated.len(), "bulk update applied");
        self.flush(
            ids.iter()
                .map(|id| self.event(*id, AuditAction::Updated, now))
                .collect(),
        );
        Ok(updated)
    }

    /// Delete a record. Fails while it is leased.
    pub fn remove_resource(&self, id: ResourceId) -> Result<ResourceRecord, OrchestratorError> {
        let now = self.now();
        let removed = {
            let mut state = self.state.lock();
            match state.records.get(&id) {
                None => return Err(OrchestratorError::ResourceNotFound(id)),
                Some(record) if record.is_leased() => {
                    return Err(OrchestratorError::ResourceLeased(id))
                }
                Some(_) => {}
            }
            state
                .records
                .remove(&id)
                .ok_or(OrchestratorError::ResourceNotFound(id))?
        };
        tracing::info!(kind = %self.kind, resource_id = %id, "resource removed");
        self.flush(vec![self.event(id, AuditAction::Removed, now)]);
        Ok(removed)
    }

    /// Snapshot of one record.
    pub fn get(&self, id: ResourceId) -> Result<ResourceRecord, OrchestratorError> {
        self.state
            .lock()
            .records
            .get(&id)
            .cloned()
            .ok_or(OrchestratorError::ResourceNotFound(id))
    }

    /// Records matching `filter`, ordered by id.
    pub fn list(&self, filter: &ResourceFilter) -> Vec<ResourceRecord> {
        self.state
            .lock()
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Whether the pool holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move a record to `inactive`. Banned and expired records are left alone;
    /// use [`Self::reactivate`] with `force` to lift a ban.
    pub fn quarantine(
        &self,
        id: ResourceId,
        reason: impl Into<String>,
    ) -> Result<ResourceRecord, OrchestratorError> {
        let reason = reason.into();
        let now = self.now();
        let mut events = Vec::new();
        let record = {
            let mut state = self.state.lock();
            let record = state
                .records
                .get_mut(&id)
                .ok_or(OrchestratorError::ResourceNotFound(id))?;
            let from = record.status;
            if from.is_terminal() {
                return Err(OrchestratorError::InvalidTransition {
                    id,
                    from,
                    to: ResourceStatus::Inactive,
                });
            }
            record.status_reason = Some(reason.clone());
            if from != ResourceStatus::Inactive {
                record.set_status(ResourceStatus::Inactive, now);
                self.transition_events(
                    id,
                    vec![(from, ResourceStatus::Inactive, Some(reason))],
                    now,
                    &mut events,
                );
            }
            record.clone()
        };
        self.flush(events);
        Ok(record)
    }

    /// Return a record to `active`.
    ///
    /// Lifting a ban requires `force`. An expired record can only come back
    /// once its `expire_at` has been moved into the future or cleared.
    pub fn reactivate(
        &self,
        id: ResourceId,
        force: bool,
    ) -> Result<ResourceRecord, OrchestratorError> {
        let now = self.now();
        let mut events = Vec::new();
        let record = {
            let mut state = self.state.lock();
            let record = state
                .records
                .get_mut(&id)
                .ok_or(OrchestratorError::ResourceNotFound(id))?;
            let from = record.status;
            let blocked = match from {
                ResourceStatus::Banned => !force,
                ResourceStatus::Expired => record.is_expiry_due(now),
                _ => false,
            };
            if blocked {
                return Err(OrchestratorError::InvalidTransition {
                    id,
                    from,
                    to: ResourceStatus::Active,
                });
            }
            record.consecutive_failures = 0;
            record.probe_failures = 0;
            record.status_reason = None;
            if from != ResourceStatus::Active {
                record.set_status(ResourceStatus::Active, now);
                let reason = if from == ResourceStatus::Banned {
                    "forced reactivation"
                } else {
                    "manual reactivation"
                };
                self.transition_events(
                    id,
                    vec![(from, ResourceStatus::Active, Some(reason.to_string()))],
                    now,
                    &mut events,
                );
            }
            record.clone()
        };
        self.flush(events);
        Ok(record)
    }

    /// Ban a record on an external detector's signal. An outstanding lease is
    /// left in place; the record is unselectable immediately and stays banned
    /// after release.
    pub fn ban(
        &self,
        id: ResourceId,
        reason: impl Into<String>,
    ) -> Result<ResourceRecord, OrchestratorError> {
        let reason = reason.into();
        let now = self.now();
        let mut events = Vec::new();
        let record = {
            let mut state = self.state.lock();
            let record = state
                .records
                .get_mut(&id)
                .ok_or(OrchestratorError::ResourceNotFound(id))?;
            let from = record.status;
            if from == ResourceStatus::Expired {
                return Err(OrchestratorError::InvalidTransition {
                    id,
                    from,
                    to: ResourceStatus::Banned,
                });
            }
            if from != ResourceStatus::Banned {
                record.set_status(ResourceStatus::Banned, now);
                self.transition_events(
                    id,
                    vec![(from, ResourceStatus::Banned, Some(reason.clone()))],
                    now,
                    &mut events,
                );
            }
            record.ban_reason = Some(reason);
            record.clone()
        };
        self.flush(events);
        Ok(record)
    }

    // ========== Lease / release ==========

    /// Lease the best selectable record matching `requirements`.
    pub fn lease(&self, requirements: &LeaseRequirements) -> Result<Lease, OrchestratorError> {
        let now = self.now();
        let deadline = now
            + ChronoDuration::from_std(self.policy.max_lease)
                .unwrap_or_else(|_| ChronoDuration::days(1));
        let token = LeaseToken::generate();

        let lease = {
            let mut state = self.state.lock();
            let candidates: Vec<&ResourceRecord> = state
                .records
                .values()
                .filter(|r| r.is_selectable(now) && requirements.matches(&r.details))
                .collect();
            let chosen = select_best(&candidates, &self.policy.weights).map(|c| c.record.id);
            let Some(id) = chosen else {
                tracing::debug!(kind = %self.kind, "no resource available");
                return Err(OrchestratorError::NoResourceAvailable { kind: self.kind });
            };
            let record = state
                .records
                .get_mut(&id)
                .ok_or(OrchestratorError::NoResourceAvailable { kind: self.kind })?;
            record.lease = Some(ActiveLease {
                token,
                leased_at: now,
                deadline,
            });
            record.touch_used(now);
            Lease {
                resource_id: id,
                kind: self.kind,
                token,
                leased_at: now,
                expires_at: deadline,
                connection: record.details.connection_details(),
            }
        };
        tracing::debug!(kind = %self.kind, resource_id = %lease.resource_id, "resource leased");
        self.flush(vec![self.event(lease.resource_id, AuditAction::Leased, now)]);
        Ok(lease)
    }

    /// Return a leased record and apply the outcome.
    ///
    /// The lease is always cleared, whatever the outcome.
    pub fn release(
        &self,
        id: ResourceId,
        outcome: ReleaseOutcome,
    ) -> Result<ResourceRecord, OrchestratorError> {
        self.release_inner(id, None, outcome, false)
    }

    /// Like [`Self::release`], but only if `lease` is still the outstanding
    /// lease. A caller whose lease was reclaimed gets `NotLeased`.
    pub fn release_lease(
        &self,
        lease: &Lease,
        outcome: ReleaseOutcome,
    ) -> Result<ResourceRecord, OrchestratorError> {
        self.release_with_token(lease.resource_id, lease.token, outcome)
    }

    /// Release `id` only if `token` matches its outstanding lease.
    pub fn release_with_token(
        &self,
        id: ResourceId,
        token: LeaseToken,
        outcome: ReleaseOutcome,
    ) -> Result<ResourceRecord, OrchestratorError> {
        self.release_inner(id, Some(token), outcome, false)
    }

    fn release_inner(
        &self,
        id: ResourceId,
        token: Option<LeaseToken>,
        outcome: ReleaseOutcome,
        reclaimed: bool,
    ) -> Result<ResourceRecord, OrchestratorError> {
        let now = self.now();
        let mut events = Vec::new();
        let record = {
            let mut state = self.state.lock();
            let record = state
                .records
                .get_mut(&id)
                .ok_or(OrchestratorError::NotLeased(id))?;
            match (record.lease, token) {
                (None, _) => return Err(OrchestratorError::NotLeased(id)),
                (Some(active), Some(token)) if active.token != token => {
                    return Err(OrchestratorError::NotLeased(id))
                }
                _ => {}
            }
            record.lease = None;
            let changes = Self::apply_outcome(record, &outcome, &self.policy, now);
            let action = if reclaimed {
                AuditAction::LeaseReclaimed
            } else {
                AuditAction::Released {
                    outcome: outcome.to_string(),
                }
            };
            events.push(self.event(id, action, now));
            self.transition_events(id, changes, now, &mut events);
            record.clone()
        };
        tracing::debug!(
            kind = %self.kind,
            resource_id = %id,
            %outcome,
            success_rate = record.success_rate,
            "resource released"
        );
        self.flush(events);
        Ok(record)
    }

    fn apply_outcome(
        record: &mut ResourceRecord,
        outcome: &ReleaseOutcome,
        policy: &PoolPolicy,
        now: DateTime<Utc>,
    ) -> Vec<StatusChange> {
        let mut changes = Vec::new();
        match outcome {
            ReleaseOutcome::Success => {
                record.success_rate = ema(record.success_rate, 100.0, policy.ema_alpha);
                record.success_count += 1;
                record.consecutive_failures = 0;
                record.probe_failures = 0;
                record.daily_usage += 1;
                record.monthly_usage += 1;
            }
            ReleaseOutcome::Failure => {
                record.success_rate = ema(record.success_rate, 0.0, policy.ema_alpha);
                record.failure_count += 1;
                record.consecutive_failures += 1;
                if record.status == ResourceStatus::Active
                    && record.success_rate < policy.failure_floor
                    && record.consecutive_failures >= policy.quarantine_after_failures
                {
                    let reason = format!(
                        "{} consecutive failures, success rate {:.1} below floor {:.1}",
                        record.consecutive_failures, record.success_rate, policy.failure_floor
                    );
                    record.set_status(ResourceStatus::Inactive, now);
                    record.status_reason = Some(reason.clone());
                    changes.push((ResourceStatus::Active, ResourceStatus::Inactive, Some(reason)));
                }
            }
            ReleaseOutcome::Banned { reason } => {
                record.success_rate = ema(record.success_rate, 0.0, policy.ema_alpha);
                record.failure_count += 1;
                record.consecutive_failures += 1;
                let reason = reason
                    .clone()
                    .unwrap_or_else(|| "banned by target".to_string());
                let from = record.status;
                if from != ResourceStatus::Banned && from != ResourceStatus::Expired {
                    record.set_status(ResourceStatus::Banned, now);
                    changes.push((from, ResourceStatus::Banned, Some(reason.clone())));
                }
                if record.status == ResourceStatus::Banned {
                    record.ban_reason = Some(reason);
                }
            }
        }
        if !record.status.is_terminal() && record.is_expiry_due(now) {
            let from = record.status;
            record.set_status(ResourceStatus::Expired, now);
            changes.push((from, ResourceStatus::Expired, Some("expired".to_string())));
        }
        changes
    }

    // ========== Health checker hooks ==========

    /// Claim probeable records (testing/inactive, not leased, not already being
    /// probed). Claimed records cannot be leased until the claim is released.
    pub(crate) fn checkout_probe_targets(&self) -> Vec<ProbeTarget> {
        let mut state = self.state.lock();
        state
            .records
            .values_mut()
            .filter(|r| r.status.is_probeable() && !r.is_leased() && !r.probing)
            .map(|r| {
                r.probing = true;
                ProbeTarget {
                    id: r.id,
                    status: r.status,
                    details: r.details.clone(),
                }
            })
            .collect()
    }

    /// Drop probe claims that were never resolved (cancelled cycle).
    pub(crate) fn release_probe_claims(&self, ids: impl IntoIterator<Item = ResourceId>) {
        let mut state = self.state.lock();
        for id in ids {
            if let Some(record) = state.records.get_mut(&id) {
                record.probing = false;
            }
        }
    }

    /// Apply a probe result. Returns the resulting status, or `None` if the
    /// record moved on (removed, leased, reactivated) while the probe ran.
    pub(crate) fn apply_probe_result(
        &self,
        id: ResourceId,
        result: Result<ProbeReport, ProbeError>,
    ) -> Option<ResourceStatus> {
        let now = self.now();
        let mut events = Vec::new();
        let status = {
            let mut state = self.state.lock();
            let record = state.records.get_mut(&id)?;
            record.probing = false;
            if record.is_leased() || !record.status.is_probeable() {
                return None;
            }
            record.touch_checked(now);
            let from = record.status;
            let mut changes = Vec::new();
            match result {
                Ok(report) => {
                    if let Some(latency) = report.latency_ms {
                        record.details.set_latency_ms(latency);
                    }
                    record.consecutive_failures = 0;
                    record.probe_failures = 0;
                    record.status_reason = None;
                    record.set_status(ResourceStatus::Active, now);
                    changes.push((from, ResourceStatus::Active, Some("health check passed".into())));
                }
                Err(err) => {
                    record.consecutive_failures += 1;
                    if from == ResourceStatus::Testing {
                        record.set_status(ResourceStatus::Inactive, now);
                        record.status_reason = Some(err.to_string());
                        changes.push((from, ResourceStatus::Inactive, Some(err.to_string())));
                    } else {
                        record.probe_failures += 1;
                        if record.probe_failures >= self.policy.ban_after_probe_failures {
                            record.set_status(ResourceStatus::Banned, now);
                            record.ban_reason = Some(HEALTH_CHECK_EXHAUSTED.to_string());
                            changes.push((
                                from,
                                ResourceStatus::Banned,
                                Some(HEALTH_CHECK_EXHAUSTED.to_string()),
                            ));
                        } else {
                            tracing::debug!(
                                kind = %self.kind,
                                resource_id = %id,
                                probe_failures = record.probe_failures,
                                error = %err,
                                "probe failed"
                            );
                        }
                    }
                }
            }
            self.transition_events(id, changes, now, &mut events);
            record.status
        };
        self.flush(events);
        Some(status)
    }

    // ========== Sweeper hooks ==========

    /// Zero `daily_usage` on every record. Returns how many were non-zero.
    pub(crate) fn reset_daily_usage(&self) -> usize {
        let mut state = self.state.lock();
        let mut touched = 0;
        for record in state.records.values_mut() {
            if record.daily_usage > 0 {
                touched += 1;
                record.daily_usage = 0;
            }
        }
        touched
    }

    /// Zero `monthly_usage` on every record. Returns how many were non-zero.
    pub(crate) fn reset_monthly_usage(&self) -> usize {
        let mut state = self.state.lock();
        let mut touched = 0;
        for record in state.records.values_mut() {
            if record.monthly_usage > 0 {
                touched += 1;
                record.monthly_usage = 0;
            }
        }
        touched
    }

    /// Expire unleased records whose `expire_at` has passed. Leased records
    /// are expired by `release` instead.
    pub(crate) fn expire_due(&self, now: DateTime<Utc>) -> Vec<ResourceId> {
        let mut events = Vec::new();
        let expired = {
            let mut state = self.state.lock();
            let mut expired = Vec::new();
            for record in state.records.values_mut() {
                if record.is_leased() || record.status.is_terminal() || !record.is_expiry_due(now)
                {
                    continue;
                }
                let from = record.status;
                record.set_status(ResourceStatus::Expired, now);
                expired.push((record.id, from));
            }
            for (id, from) in &expired {
                self.transition_events(
                    *id,
                    vec![(*from, ResourceStatus::Expired, Some("expired".to_string()))],
                    now,
                    &mut events,
                );
            }
            expired.into_iter().map(|(id, _)| id).collect()
        };
        self.flush(events);
        expired
    }

    /// Force-release leases past their deadline with a failure outcome.
    pub(crate) fn reclaim_overdue_leases(&self, now: DateTime<Utc>) -> Vec<ResourceId> {
        let overdue: Vec<ResourceId> = {
            let state = self.state.lock();
            state
                .records
                .values()
                .filter(|r| r.lease.is_some_and(|l| l.deadline <= now))
                .map(|r| r.id)
                .collect()
        };
        let mut reclaimed = Vec::with_capacity(overdue.len());
        for id in overdue {
            // Re-checked under the lock; the caller may have released meanwhile.
            let lease = {
                let state = self.state.lock();
                state
                    .records
                    .get(&id)
                    .and_then(|r| r.lease)
                    .filter(|l| l.deadline <= now)
            };
            let Some(lease) = lease else { continue };
            if self
                .release_inner(id, Some(lease.token), ReleaseOutcome::Failure, true)
                .is_ok()
            {
                tracing::warn!(
                    kind = %self.kind,
                    resource_id = %id,
                    held_secs = (now - lease.leased_at).num_seconds(),
                    "lease reclaimed after deadline"
                );
                reclaimed.push(id);
            }
        }
        reclaimed
    }

    /// Delete records that have been expired for longer than the retention window.
    pub(crate) fn purge_retired(&self, now: DateTime<Utc>) -> Vec<ResourceId> {
        let retention = ChronoDuration::from_std(self.policy.expired_retention)
            .unwrap_or_else(|_| ChronoDuration::days(3650));
        let purged: Vec<ResourceId> = {
            let mut state = self.state.lock();
            let ids: BTreeSet<ResourceId> = state
                .records
                .values()
                .filter(|r| {
                    r.status == ResourceStatus::Expired
                        && !r.is_leased()
                        && r.status_changed_at + retention <= now
                })
                .map(|r| r.id)
                .collect();
            state.records.retain(|id, _| !ids.contains(id));
            ids.into_iter().collect()
        };
        let events = purged
            .iter()
            .map(|id| self.event(*id, AuditAction::Removed, now))
            .collect();
        self.flush(events);
        purged
    }

    // ========== Metrics ==========

    /// Snapshot of counts and averages.
    #[allow(clippy::cast_precision_loss)]
    pub fn metrics(&self) -> PoolMetrics {
        let now = self.now();
        let state = self.state.lock();
        let mut by_status = StatusCounts::default();
        let mut by_protocol = BTreeMap::new();
        let mut countries = BTreeSet::new();
        let (mut leased, mut available) = (0, 0);
        let (mut rate_sum, mut rate_n) = (0.0, 0usize);
        let (mut latency_sum, mut latency_n) = (0.0, 0usize);
        let (mut cost_sum, mut cost_n) = (0.0, 0usize);
        let (mut daily, mut monthly) = (0u64, 0u64);

        for record in state.records.values() {
            by_status.bump(record.status);
            leased += usize::from(record.is_leased());
            available += usize::from(record.is_selectable(now));
            daily += record.daily_usage;
            monthly += record.monthly_usage;
            if record.status != ResourceStatus::Expired {
                rate_sum += record.success_rate;
                rate_n += 1;
            }
            if let Some(latency) = record.details.latency_ms() {
                latency_sum += f64::from(latency);
                latency_n += 1;
            }
            if let Some(cost) = record.details.cost_per_use() {
                cost_sum += cost;
                cost_n += 1;
            }
            if let ResourceDetails::Proxy(p) = &record.details {
                *by_protocol.entry(p.protocol).or_insert(0) += 1;
                if let Some(country) = &p.country {
                    countries.insert(country.to_ascii_uppercase());
                }
            }
        }

        let mean = |sum: f64, n: usize| (n > 0).then(|| sum / n as f64);
        PoolMetrics {
            kind: self.kind,
            total: state.records.len(),
            by_status,
            leased,
            available,
            avg_success_rate: mean(rate_sum, rate_n),
            rate_samples: rate_n,
            avg_latency_ms: mean(latency_sum, latency_n),
            latency_samples: latency_n,
            avg_cost_per_use: mean(cost_sum, cost_n),
            cost_samples: cost_n,
            daily_usage_total: daily,
            monthly_usage_total: monthly,
            by_protocol,
            distinct_countries: countries.len(),
            captured_at: now,
        }
    }
}

/// Reject a quota below what the record has already used today.
fn check_quota_update(
    record: &ResourceRecord,
    update: &ResourceUpdate,
) -> Result<(), OrchestratorError> {
    if let Some(Some(quota)) = update.daily_quota {
        let in_use = record.daily_usage + u64::from(record.is_leased());
        if quota < in_use {
            return Err(OrchestratorError::InvalidRequest(format!(
                "daily quota {quota} is below current usage {in_use} of resource {}",
                record.id
            )));
        }
    }
    Ok(())
}

fn apply_update(record: &mut ResourceRecord, update: ResourceUpdate) {
    if let Some(details) = update.details {
        record.details = details;
    }
    if let Some(quota) = update.daily_quota {
        record.daily_quota = quota;
    }
    if let Some(expire_at) = update.expire_at {
        record.expire_at = expire_at;
    }
    if let Some(notes) = update.notes {
        record.notes = notes;
    }
}
