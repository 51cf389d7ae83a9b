//! Tests for the alert rule engine

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use prometheus_pool_orchestrator::core::alerts::{
    AlertEventKind, AlertMetric, AlertRule, AlertRuleEngine, AlertSeverity, AlertTarget,
    Comparator, MetricsSnapshot,
};
use prometheus_pool_orchestrator::core::{
    AccountSpec, AccountType, Anonymity, CaptchaProviderSpec, CaptchaType, NewResource,
    OrchestratorError, PoolPolicy, ProxyProtocol, ProxySpec, ResourceDetails, ResourcePool,
};
use prometheus_pool_orchestrator::infra::InMemoryNotifier;
use prometheus_pool_orchestrator::util::clock::{Clock, ManualClock};
use prometheus_pool_orchestrator::util::serde::{ResourceId, ResourceKind};

struct Fixture {
    pool: ResourcePool,
    clock: ManualClock,
    ids: Vec<ResourceId>,
}

impl Fixture {
    fn accounts(n: usize) -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        let mut policy = PoolPolicy::for_kind(ResourceKind::Account);
        policy.health_check_on_add = false;
        let pool = ResourcePool::new(ResourceKind::Account, policy)
            .with_clock(Arc::new(clock.clone()));
        let ids = (0..n)
            .map(|i| {
                pool.add_resource(NewResource::new(ResourceDetails::Account(AccountSpec {
                    username: format!("user{i}"),
                    platform: "shop".into(),
                    account_type: AccountType::Personal,
                    credential: "pw".into(),
                    email: None,
                })))
                .unwrap()
                .id
            })
            .collect();
        Self { pool, clock, ids }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot::capture([&self.pool], self.clock.now())
    }
}

fn banned_ratio_rule() -> AlertRule {
    AlertRule::new(
        "accounts-banned",
        AlertTarget::Kind(ResourceKind::Account),
        AlertMetric::BannedRatio,
        Comparator::Gt,
        0.5,
        AlertSeverity::Critical,
    )
}

#[tokio::test]
async fn test_rule_fires_once_while_condition_holds() {
    let fx = Fixture::accounts(3);
    let notifier = Arc::new(InMemoryNotifier::new());
    let engine = AlertRuleEngine::new().with_notifier(notifier.clone());
    engine.add_rule(banned_ratio_rule().with_channels(["email"])).unwrap();

    fx.pool.ban(fx.ids[0], "captcha wall").unwrap();
    fx.pool.ban(fx.ids[1], "captcha wall").unwrap();

    let events = engine.evaluate(&fx.snapshot()).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AlertEventKind::Fired);
    assert_eq!(events[0].channels, vec!["email".to_string()]);
    assert_eq!(engine.open_instances().len(), 1);

    assert!(engine.evaluate(&fx.snapshot()).await.is_empty());
    assert_eq!(notifier.events().len(), 1);
    assert_eq!(engine.rule_states()[0].trigger_count, 1);
}

#[tokio::test]
async fn test_rule_clears_when_condition_stops() {
    let fx = Fixture::accounts(3);
    let engine = AlertRuleEngine::new();
    engine.add_rule(banned_ratio_rule()).unwrap();

    fx.pool.ban(fx.ids[0], "x").unwrap();
    fx.pool.ban(fx.ids[1], "x").unwrap();
    engine.evaluate(&fx.snapshot()).await;

    fx.pool.reactivate(fx.ids[0], true).unwrap();
    fx.clock.advance(Duration::from_secs(30));
    let events = engine.evaluate(&fx.snapshot()).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AlertEventKind::Cleared);
    assert!(engine.open_instances().is_empty());

    let history = engine.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].dedupe_key(), "accounts-banned");
    assert!(!history[0].is_open());
}

#[tokio::test]
async fn test_cooldown_blocks_refire() {
    let fx = Fixture::accounts(2);
    let engine = AlertRuleEngine::new();
    engine
        .add_rule(
            AlertRule::new(
                "any-banned",
                AlertTarget::Kind(ResourceKind::Account),
                AlertMetric::BannedCount,
                Comparator::Ge,
                1.0,
                AlertSeverity::Warning,
            )
            .with_cooldown(600),
        )
        .unwrap();

    fx.pool.ban(fx.ids[0], "x").unwrap();
    assert_eq!(engine.evaluate(&fx.snapshot()).await.len(), 1);

    fx.pool.reactivate(fx.ids[0], true).unwrap();
    fx.clock.advance(Duration::from_secs(60));
    let cleared = engine.evaluate(&fx.snapshot()).await;
    assert_eq!(cleared[0].kind, AlertEventKind::Cleared);

    fx.pool.ban(fx.ids[1], "x").unwrap();
    fx.clock.advance(Duration::from_secs(60));
    assert!(engine.evaluate(&fx.snapshot()).await.is_empty());

    fx.clock.advance(Duration::from_secs(600));
    let refired = engine.evaluate(&fx.snapshot()).await;
    assert_eq!(refired.len(), 1);
    assert_eq!(refired[0].kind, AlertEventKind::Fired);
    assert_eq!(engine.rule_states()[0].trigger_count, 2);
}

#[tokio::test]
async fn test_disable_and_remove_suppress_open_instance() {
    let fx = Fixture::accounts(1);
    let notifier = Arc::new(InMemoryNotifier::new());
    let engine = AlertRuleEngine::new().with_notifier(notifier.clone());
    engine.add_rule(banned_ratio_rule()).unwrap();
    fx.pool.ban(fx.ids[0], "x").unwrap();
    engine.evaluate(&fx.snapshot()).await;

    let suppressed = engine
        .disable_rule("accounts-banned", fx.clock.now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(suppressed.kind, AlertEventKind::Suppressed);
    assert!(engine.evaluate(&fx.snapshot()).await.is_empty());

    engine.enable_rule("accounts-banned").unwrap();
    assert_eq!(engine.evaluate(&fx.snapshot()).await.len(), 1);

    let removed = engine
        .remove_rule("accounts-banned", fx.clock.now())
        .await
        .unwrap();
    assert_eq!(removed.id, "accounts-banned");
    let kinds: Vec<_> = notifier.events().into_iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            AlertEventKind::Fired,
            AlertEventKind::Suppressed,
            AlertEventKind::Fired,
            AlertEventKind::Suppressed,
        ]
    );
    assert!(engine.rules().is_empty());
    assert_eq!(engine.history().len(), 2);
}

#[tokio::test]
async fn test_update_to_disabled_suppresses() {
    let fx = Fixture::accounts(1);
    let engine = AlertRuleEngine::new();
    engine.add_rule(banned_ratio_rule()).unwrap();
    fx.pool.ban(fx.ids[0], "x").unwrap();
    engine.evaluate(&fx.snapshot()).await;

    let mut rule = banned_ratio_rule();
    rule.enabled = false;
    let event = engine.update_rule(rule, fx.clock.now()).await.unwrap();
    assert_eq!(event.map(|e| e.kind), Some(AlertEventKind::Suppressed));
    assert!(!engine.rule("accounts-banned").unwrap().enabled);
}

#[tokio::test]
async fn test_notifier_failure_does_not_block_evaluation() {
    let fx = Fixture::accounts(1);
    let notifier = Arc::new(InMemoryNotifier::new());
    notifier.set_failing(true);
    let engine = AlertRuleEngine::new().with_notifier(notifier.clone());
    engine.add_rule(banned_ratio_rule()).unwrap();
    fx.pool.ban(fx.ids[0], "x").unwrap();

    let events = engine.evaluate(&fx.snapshot()).await;
    assert_eq!(events.len(), 1);
    assert!(notifier.events().is_empty());
    assert_eq!(engine.open_instances().len(), 1);
}

#[tokio::test]
async fn test_undefined_metric_is_skipped() {
    let fx = Fixture::accounts(2);
    let engine = AlertRuleEngine::new();
    engine
        .add_rule(AlertRule::new(
            "slow-accounts",
            AlertTarget::Kind(ResourceKind::Account),
            AlertMetric::AvgLatencyMs,
            Comparator::Lt,
            1_000_000.0,
            AlertSeverity::Info,
        ))
        .unwrap();
    assert!(engine.evaluate(&fx.snapshot()).await.is_empty());
    assert_eq!(engine.rule_states()[0].last_value, None);
}

#[tokio::test]
async fn test_missing_pool_target_is_skipped() {
    let fx = Fixture::accounts(1);
    let engine = AlertRuleEngine::new();
    engine
        .add_rule(AlertRule::new(
            "no-proxies",
            AlertTarget::Kind(ResourceKind::Proxy),
            AlertMetric::TotalCount,
            Comparator::Eq,
            0.0,
            AlertSeverity::Info,
        ))
        .unwrap();
    assert!(engine.evaluate(&fx.snapshot()).await.is_empty());
}

#[tokio::test]
async fn test_global_ratio_is_recomputed_from_counts() {
    let accounts = Fixture::accounts(1);
    let mut policy = PoolPolicy::for_kind(ResourceKind::CaptchaProvider);
    policy.health_check_on_add = false;
    let solvers = ResourcePool::new(ResourceKind::CaptchaProvider, policy);
    for i in 0..3 {
        solvers
            .add_resource(NewResource::new(ResourceDetails::CaptchaProvider(
                CaptchaProviderSpec {
                    name: format!("solver{i}"),
                    captcha_type: CaptchaType::Image,
                    platform: "acme".into(),
                    api_key: "k".into(),
                    avg_response_ms: None,
                    cost_per_use: 0.001,
                },
            )))
            .unwrap();
    }
    accounts.pool.ban(accounts.ids[0], "x").unwrap();

    let snapshot = MetricsSnapshot::capture([&accounts.pool, &solvers], accounts.clock.now());
    // One banned out of four records overall, while the account pool alone is 100% banned.
    let global = snapshot
        .value(AlertTarget::Global, AlertMetric::BannedRatio)
        .unwrap();
    assert!((global - 0.25).abs() < 1e-9);
    assert_eq!(
        snapshot.value(AlertTarget::Global, AlertMetric::TotalCount),
        Some(4.0)
    );
}

#[tokio::test]
async fn test_global_average_ignores_records_without_a_value() {
    let mut policy = PoolPolicy::for_kind(ResourceKind::Proxy);
    policy.health_check_on_add = false;
    let proxies = ResourcePool::new(ResourceKind::Proxy, policy);
    for i in 0..10_u32 {
        proxies
            .add_resource(NewResource::new(ResourceDetails::Proxy(ProxySpec {
                host: format!("10.0.0.{i}"),
                port: 8080,
                protocol: ProxyProtocol::Http,
                country: None,
                region: None,
                isp: None,
                anonymity: Anonymity::Elite,
                speed_ms: (i == 0).then_some(1_000),
            })))
            .unwrap();
    }
    let mut policy = PoolPolicy::for_kind(ResourceKind::CaptchaProvider);
    policy.health_check_on_add = false;
    let solvers = ResourcePool::new(ResourceKind::CaptchaProvider, policy);
    solvers
        .add_resource(NewResource::new(ResourceDetails::CaptchaProvider(
            CaptchaProviderSpec {
                name: "fast".into(),
                captcha_type: CaptchaType::Slider,
                platform: "acme".into(),
                api_key: "k".into(),
                avg_response_ms: Some(100),
                cost_per_use: 0.002,
            },
        )))
        .unwrap();

    let snapshot = MetricsSnapshot::capture([&proxies, &solvers], proxies.now());
    assert_eq!(snapshot.pools[&ResourceKind::Proxy].latency_samples, 1);
    let latency = snapshot
        .value(AlertTarget::Global, AlertMetric::AvgLatencyMs)
        .unwrap();
    assert!((latency - 550.0).abs() < 1e-9);
    // Only the solver has a cost.
    let cost = snapshot
        .value(AlertTarget::Global, AlertMetric::AvgCostPerUse)
        .unwrap();
    assert!((cost - 0.002).abs() < 1e-12);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let fx = Fixture::accounts(1);
    let engine = AlertRuleEngine::new().with_history_limit(2);
    engine.add_rule(banned_ratio_rule()).unwrap();
    for _ in 0..3 {
        fx.pool.ban(fx.ids[0], "x").unwrap();
        engine.evaluate(&fx.snapshot()).await;
        fx.pool.reactivate(fx.ids[0], true).unwrap();
        fx.clock.advance(Duration::from_secs(1));
        engine.evaluate(&fx.snapshot()).await;
    }
    assert_eq!(engine.history().len(), 2);
    assert_eq!(engine.rule_states()[0].trigger_count, 3);
}

#[test]
fn test_rule_registration_errors() {
    let engine = AlertRuleEngine::new();
    engine.add_rule(banned_ratio_rule()).unwrap();
    assert_eq!(
        engine.add_rule(banned_ratio_rule()),
        Err(OrchestratorError::DuplicateRule("accounts-banned".into()))
    );

    let mut bad = banned_ratio_rule();
    bad.id = "nan".into();
    bad.threshold = f64::NAN;
    assert!(matches!(
        engine.add_rule(bad),
        Err(OrchestratorError::InvalidRequest(_))
    ));
    assert_eq!(
        engine.enable_rule("missing"),
        Err(OrchestratorError::RuleNotFound("missing".into()))
    );
}

#[test]
fn test_rule_condition_text() {
    assert_eq!(banned_ratio_rule().condition(), "banned_ratio > 0.5");
}
