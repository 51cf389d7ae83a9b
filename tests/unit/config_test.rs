//! Tests for configuration loading and validation

use std::io::Write;
use std::time::Duration;

use prometheus_pool_orchestrator::config::{OrchestratorConfig, PoolConfig};
use prometheus_pool_orchestrator::core::alerts::{AlertMetric, AlertTarget, Comparator};
use prometheus_pool_orchestrator::util::serde::ResourceKind;

#[test]
fn test_default_config_is_valid() {
    let cfg = OrchestratorConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.shutdown_grace(), Duration::from_secs(5));
    assert!(cfg.pools[&ResourceKind::Account].health.max_concurrent_probes >= 1);
}

#[test]
fn test_rules_parse_with_symbolic_comparators() {
    let cfg = OrchestratorConfig::from_json_str(
        r#"{
            "rules": [{
                "id": "proxy-bans",
                "target": {"kind": "proxy"},
                "metric": "banned_ratio",
                "comparator": ">",
                "threshold": 0.5,
                "severity": "critical",
                "cooldown_seconds": 600,
                "channels": ["email"]
            }, {
                "id": "global-success",
                "target": "global",
                "metric": "pool_success_rate_avg",
                "comparator": "lt",
                "threshold": 60,
                "severity": "warning"
            }]
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.rules.len(), 2);
    assert_eq!(cfg.rules[0].target, AlertTarget::Kind(ResourceKind::Proxy));
    assert_eq!(cfg.rules[0].metric, AlertMetric::BannedRatio);
    assert_eq!(cfg.rules[0].comparator, Comparator::Gt);
    assert!(cfg.rules[1].enabled);
    assert_eq!(cfg.rules[1].comparator, Comparator::Lt);
    assert_eq!(cfg.rules[1].target, AlertTarget::Global);
}

#[test]
fn test_duplicate_rule_ids_rejected() {
    let rule = r#"{"id":"r","target":"global","metric":"total_count","comparator":"<","threshold":1,"severity":"info"}"#;
    let err = OrchestratorConfig::from_json_str(&format!(r#"{{"rules":[{rule},{rule}]}}"#))
        .unwrap_err();
    assert!(err.contains("defined twice"));
}

#[test]
fn test_empty_pool_map_rejected() {
    let err = OrchestratorConfig::from_json_str(r#"{"pools": {}}"#).unwrap_err();
    assert!(err.contains("at least one pool"));
}

#[test]
fn test_pool_validation_errors_name_the_pool() {
    let mut cfg = OrchestratorConfig::default();
    cfg.pools.insert(
        ResourceKind::Proxy,
        PoolConfig {
            max_lease_secs: 0,
            ..PoolConfig::default()
        },
    );
    let err = cfg.validate().unwrap_err();
    assert!(err.contains("proxy"));
    assert!(err.contains("max_lease_secs"));
}

#[test]
fn test_load_from_file() {
    let path = std::env::temp_dir().join(format!(
        "pool-orchestrator-config-{}.json",
        std::process::id()
    ));
    {
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"shutdown_grace_ms": 250, "pools": {{"account": {{}}}}}}"#).unwrap();
    }
    let cfg = OrchestratorConfig::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(cfg.shutdown_grace(), Duration::from_millis(250));
    assert_eq!(cfg.pools.keys().copied().collect::<Vec<_>>(), vec![ResourceKind::Account]);
}

#[test]
fn test_load_missing_file_reports_path() {
    let err = OrchestratorConfig::load("/nonexistent/orchestrator.json").unwrap_err();
    assert!(format!("{err:#}").contains("/nonexistent/orchestrator.json"));
}
