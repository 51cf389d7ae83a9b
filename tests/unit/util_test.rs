//! Tests for utility functions

use chrono::{TimeZone, Utc};
use prometheus_pool_orchestrator::util::clock::{Clock, ManualClock};
use prometheus_pool_orchestrator::util::serde::{LeaseToken, ResourceId, ResourceKind};

#[test]
fn test_resource_kind_names() {
    assert_eq!(ResourceKind::Proxy.to_string(), "proxy");
    assert_eq!(ResourceKind::CaptchaProvider.as_str(), "captcha_provider");
    assert_eq!(ResourceKind::ALL.len(), 3);
}

#[test]
fn test_resource_kind_serde_matches_display() {
    for kind in ResourceKind::ALL {
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, format!("\"{kind}\""));
    }
}

#[test]
fn test_resource_id_is_transparent() {
    let id: ResourceId = serde_json::from_str("42").unwrap();
    assert_eq!(id, ResourceId(42));
    assert_eq!(id.to_string(), "42");
}

#[test]
fn test_lease_tokens_are_unique() {
    let a = LeaseToken::generate();
    let b = LeaseToken::generate();
    assert_ne!(a, b);
}

#[test]
fn test_manual_clock_steps() {
    let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let clock = ManualClock::new(start);
    clock.advance(std::time::Duration::from_secs(3600));
    assert_eq!(clock.now(), Utc.with_ymd_and_hms(2024, 6, 1, 1, 0, 0).unwrap());
}
