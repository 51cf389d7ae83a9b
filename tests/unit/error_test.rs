//! Tests for error types

use std::time::Duration;

use prometheus_pool_orchestrator::core::{NotifyError, OrchestratorError, ProbeError, ResourceStatus};
use prometheus_pool_orchestrator::util::serde::{ResourceId, ResourceKind};

#[test]
fn test_no_resource_available_display() {
    let err = OrchestratorError::NoResourceAvailable {
        kind: ResourceKind::CaptchaProvider,
    };
    assert_eq!(err.to_string(), "no captcha_provider available");
    assert!(err.is_retryable());
}

#[test]
fn test_invalid_transition_display() {
    let err = OrchestratorError::InvalidTransition {
        id: ResourceId(9),
        from: ResourceStatus::Banned,
        to: ResourceStatus::Active,
    };
    assert_eq!(err.to_string(), "resource 9: cannot move from banned to active");
    assert!(!err.is_retryable());
}

#[test]
fn test_kind_mismatch_display() {
    let err = OrchestratorError::KindMismatch {
        expected: ResourceKind::Proxy,
        actual: ResourceKind::Account,
    };
    assert_eq!(err.to_string(), "expected proxy resource, got account");
}

#[test]
fn test_probe_error_display() {
    let err = ProbeError::Timeout(Duration::from_millis(500));
    assert!(err.to_string().contains("500ms"));
    let err = ProbeError::Failure("tls handshake".into());
    assert_eq!(err.to_string(), "probe failed: tls handshake");
}

#[test]
fn test_notify_error_display() {
    let err = NotifyError::DeliveryFailure("smtp down".into());
    assert_eq!(err.to_string(), "notifier delivery failure: smtp down");
}
