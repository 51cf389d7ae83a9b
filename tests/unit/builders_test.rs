//! Tests for builder modules

use std::sync::Arc;

use prometheus_pool_orchestrator::builders::{build_pools, OrchestratorBuilder};
use prometheus_pool_orchestrator::config::{OrchestratorConfig, PoolConfig};
use prometheus_pool_orchestrator::core::alerts::{
    AlertMetric, AlertRule, AlertSeverity, AlertTarget, Comparator,
};
use prometheus_pool_orchestrator::core::{
    AccountSpec, AccountType, NewResource, OrchestratorError, Prober, ResourceDetails,
    ResourceStatus,
};
use prometheus_pool_orchestrator::infra::{AlwaysHealthyProber, ScriptedProbe, StaticProber};
use prometheus_pool_orchestrator::util::clock::{SharedClock, SystemClock};
use prometheus_pool_orchestrator::util::serde::{ResourceId, ResourceKind};

fn account(name: &str) -> NewResource {
    NewResource::new(ResourceDetails::Account(AccountSpec {
        username: name.into(),
        platform: "shop".into(),
        account_type: AccountType::Personal,
        credential: "pw".into(),
        email: None,
    }))
}

#[test]
fn test_build_pools_shares_id_space() {
    let cfg = OrchestratorConfig::default();
    let clock: SharedClock = Arc::new(SystemClock);
    let units = build_pools(&cfg, &clock, None, |_, _| {
        Arc::new(AlwaysHealthyProber) as Arc<dyn Prober>
    })
    .unwrap();
    assert_eq!(units.len(), 3);

    let a = units[&ResourceKind::Account].pool.add_resource(account("a")).unwrap();
    let b = units[&ResourceKind::Account].pool.add_resource(account("b")).unwrap();
    assert_eq!((a.id, b.id), (ResourceId(1), ResourceId(2)));
}

#[test]
fn test_build_pools_applies_pool_policy() {
    let mut cfg = OrchestratorConfig::default();
    cfg.pools.insert(
        ResourceKind::Account,
        PoolConfig {
            health_check_on_add: false,
            quarantine_after_failures: 7,
            ..PoolConfig::default()
        },
    );
    let clock: SharedClock = Arc::new(SystemClock);
    let units = build_pools(&cfg, &clock, None, |_, _| {
        Arc::new(AlwaysHealthyProber) as Arc<dyn Prober>
    })
    .unwrap();
    let pool = &units[&ResourceKind::Account].pool;
    assert_eq!(pool.policy().quarantine_after_failures, 7);
    assert_eq!(pool.add_resource(account("a")).unwrap().status, ResourceStatus::Active);
}

#[test]
fn test_build_pools_rejects_invalid_config() {
    let mut cfg = OrchestratorConfig::default();
    cfg.alerts.interval_secs = 0;
    let clock: SharedClock = Arc::new(SystemClock);
    let result = build_pools(&cfg, &clock, None, |_, _| {
        Arc::new(AlwaysHealthyProber) as Arc<dyn Prober>
    });
    assert!(matches!(result, Err(OrchestratorError::InvalidConfig(_))));
}

#[test]
fn test_builder_registers_configured_rules() {
    let mut cfg = OrchestratorConfig::default();
    cfg.rules.push(AlertRule::new(
        "proxy-bans",
        AlertTarget::Kind(ResourceKind::Proxy),
        AlertMetric::BannedRatio,
        Comparator::Gt,
        0.5,
        AlertSeverity::Critical,
    ));
    let orchestrator = OrchestratorBuilder::new().with_config(cfg).build().unwrap();
    assert_eq!(orchestrator.rule_states().len(), 1);
    assert_eq!(orchestrator.kinds(), ResourceKind::ALL.to_vec());
}

#[test]
fn test_builder_with_only_some_pools() {
    let cfg = OrchestratorConfig::from_json_str(r#"{"pools": {"proxy": {}}}"#).unwrap();
    let orchestrator = OrchestratorBuilder::new()
        .with_config(cfg)
        .with_prober(
            ResourceKind::Proxy,
            Arc::new(StaticProber::new(ScriptedProbe::Pass(Some(80)))),
        )
        .build()
        .unwrap();
    assert_eq!(orchestrator.kinds(), vec![ResourceKind::Proxy]);
    assert!(matches!(
        orchestrator.add_resource(account("a")),
        Err(OrchestratorError::UnknownKind(ResourceKind::Account))
    ));
}
