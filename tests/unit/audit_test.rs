//! Tests for audit sink

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use prometheus_pool_orchestrator::core::{
    build_audit_event, AccountSpec, AccountType, AuditAction, AuditSink, InMemoryAuditSink,
    LeaseRequirements, NewResource, PoolPolicy, ReleaseOutcome, ResourceDetails, ResourcePool,
    ResourceStatus,
};
use prometheus_pool_orchestrator::util::serde::{ResourceId, ResourceKind};

/// Sink that forwards into a shared buffer the test can inspect.
struct SharedSink(Arc<Mutex<InMemoryAuditSink>>);

impl AuditSink for SharedSink {
    fn record(&mut self, event: prometheus_pool_orchestrator::core::AuditEvent) {
        self.0.lock().record(event);
    }
}

fn account(name: &str) -> NewResource {
    NewResource::new(ResourceDetails::Account(AccountSpec {
        username: name.into(),
        platform: "shop".into(),
        account_type: AccountType::Email,
        credential: "pw".into(),
        email: None,
    }))
}

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);
    let event = build_audit_event(
        ResourceId(1),
        ResourceKind::Proxy,
        AuditAction::Released {
            outcome: "success".into(),
        },
        Utc::now(),
    );
    sink.record(event.clone());
    assert_eq!(sink.events(), vec![event]);
}

#[test]
fn test_zero_capacity_sink_keeps_nothing() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(build_audit_event(
        ResourceId(1),
        ResourceKind::Account,
        AuditAction::Added,
        Utc::now(),
    ));
    assert!(sink.events().is_empty());
}

#[test]
fn test_audit_action_serializes_with_tag() {
    let action = AuditAction::Transition {
        from: ResourceStatus::Active,
        to: ResourceStatus::Banned,
        reason: Some("captcha wall".into()),
    };
    let json = serde_json::to_value(&action).unwrap();
    assert_eq!(json["action"], "transition");
    assert_eq!(json["from"], "active");
    assert_eq!(json["to"], "banned");
}

#[test]
fn test_pool_records_lease_lifecycle() {
    let buffer = Arc::new(Mutex::new(InMemoryAuditSink::new(64)));
    let sink: Box<dyn AuditSink> = Box::new(SharedSink(Arc::clone(&buffer)));
    let mut policy = PoolPolicy::for_kind(ResourceKind::Account);
    policy.health_check_on_add = false;
    let pool = ResourcePool::new(ResourceKind::Account, policy).with_audit(Arc::new(Mutex::new(sink)));

    let id = pool.add_resource(account("a")).unwrap().id;
    pool.lease(&LeaseRequirements::any()).unwrap();
    pool.release(id, ReleaseOutcome::banned("login challenge")).unwrap();

    let buffer = buffer.lock();
    let actions: Vec<_> = buffer.events().into_iter().map(|e| e.action).collect();
    assert_eq!(actions[0], AuditAction::Added);
    assert_eq!(actions[1], AuditAction::Leased);
    assert_eq!(
        actions[2],
        AuditAction::Released {
            outcome: "banned".into()
        }
    );
    assert_eq!(
        buffer.transitions_for(id),
        vec![(ResourceStatus::Active, ResourceStatus::Banned)]
    );
}
