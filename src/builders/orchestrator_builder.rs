//! Builders to construct the orchestrator from configuration.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{OrchestratorConfig, PoolConfig};
use crate::core::alerts::{AlertRuleEngine, Notifier};
use crate::core::audit::AuditSink;
use crate::core::error::OrchestratorError;
use crate::core::health::{HealthChecker, Prober};
use crate::core::orchestrator::{Orchestrator, PoolUnit};
use crate::core::resource_pool::ResourcePool;
use crate::core::sweeper::Sweeper;
use crate::infra::prober::AlwaysHealthyProber;
use crate::util::clock::{SharedClock, SystemClock};
use crate::util::serde::ResourceKind;

/// Shared audit sink handle.
pub type SharedAuditSink = Arc<Mutex<Box<dyn AuditSink>>>;

/// Build one pool unit per configured kind, using `prober_factory` to pick
/// each pool's prober. Pools share an id allocator so ids are unique across
/// kinds.
pub fn build_pools<FP>(
    cfg: &OrchestratorConfig,
    clock: &SharedClock,
    audit: Option<&SharedAuditSink>,
    mut prober_factory: FP,
) -> Result<BTreeMap<ResourceKind, PoolUnit>, OrchestratorError>
where
    FP: FnMut(ResourceKind, &PoolConfig) -> Arc<dyn Prober>,
{
    cfg.validate().map_err(OrchestratorError::InvalidConfig)?;

    let ids = Arc::new(AtomicU64::new(1));
    let mut units = BTreeMap::new();
    for (&kind, pool_cfg) in &cfg.pools {
        let mut pool = ResourcePool::new(kind, pool_cfg.policy(kind))
            .with_clock(Arc::clone(clock))
            .with_id_allocator(Arc::clone(&ids));
        if let Some(audit) = audit {
            pool = pool.with_audit(Arc::clone(audit));
        }
        let pool = Arc::new(pool);
        let health = HealthChecker::new(
            Arc::clone(&pool),
            prober_factory(kind, pool_cfg),
            &pool_cfg.health,
        );
        let sweeper = Sweeper::new(Arc::clone(&pool), &pool_cfg.sweeper);
        units.insert(
            kind,
            PoolUnit {
                pool,
                health: Arc::new(health),
                sweeper: Arc::new(sweeper),
            },
        );
    }
    Ok(units)
}

/// Fluent construction of an [`Orchestrator`].
///
/// ```rust,ignore
/// let orchestrator = OrchestratorBuilder::new()
///     .with_config(OrchestratorConfig::load("orchestrator.json")?)
///     .with_prober(ResourceKind::Proxy, Arc::new(my_http_prober))
///     .with_notifier(Arc::new(TracingNotifier))
///     .build()?;
/// orchestrator.start()?;
/// ```
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    clock: Option<SharedClock>,
    probers: BTreeMap<ResourceKind, Arc<dyn Prober>>,
    default_prober: Option<Arc<dyn Prober>>,
    notifier: Option<Arc<dyn Notifier>>,
    audit: Option<SharedAuditSink>,
}

impl OrchestratorBuilder {
    /// Builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config`.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Read time from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Probe `kind` with `prober`.
    #[must_use]
    pub fn with_prober(mut self, kind: ResourceKind, prober: Arc<dyn Prober>) -> Self {
        self.probers.insert(kind, prober);
        self
    }

    /// Prober for kinds without a specific one. Defaults to
    /// [`AlwaysHealthyProber`].
    #[must_use]
    pub fn with_default_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.default_prober = Some(prober);
        self
    }

    /// Deliver alert events to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Record pool activity to `sink`.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: SharedAuditSink) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Validate the configuration and assemble the orchestrator. Background
    /// loops are not started.
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock) as SharedClock);
        let default_prober = self
            .default_prober
            .unwrap_or_else(|| Arc::new(AlwaysHealthyProber) as Arc<dyn Prober>);
        let probers = self.probers;
        let units = build_pools(&self.config, &clock, self.audit.as_ref(), |kind, _| {
            probers
                .get(&kind)
                .map_or_else(|| Arc::clone(&default_prober), Arc::clone)
        })?;

        let mut engine =
            AlertRuleEngine::new().with_history_limit(self.config.alerts.history_limit);
        if let Some(notifier) = self.notifier {
            engine = engine.with_notifier(notifier);
        }
        for rule in &self.config.rules {
            engine.add_rule(rule.clone())?;
        }

        Ok(Orchestrator::from_parts(
            units,
            Arc::new(engine),
            clock,
            Duration::from_secs(self.config.alerts.interval_secs),
            self.config.shutdown_grace(),
        ))
    }
}
