//! Tests for the API surface and background task lifecycle

use std::time::Duration;

use prometheus_pool_orchestrator::builders::OrchestratorBuilder;
use prometheus_pool_orchestrator::config::{OrchestratorConfig, PoolConfig};
use prometheus_pool_orchestrator::core::{
    Anonymity, ConnectionDetails, NewResource, OrchestratorError, ProxyProtocol, ProxySpec,
    ReleaseOutcome, ResourceDetails, ResourceFilter, ResourceStatus,
};
use prometheus_pool_orchestrator::core::Orchestrator;
use prometheus_pool_orchestrator::runtime::api::{
    self, ApiError, BulkUpdateRequest, LeaseRequest, ReleaseRequest,
};
use prometheus_pool_orchestrator::runtime::BackgroundTasks;
use prometheus_pool_orchestrator::util::serde::ResourceKind;

fn orchestrator() -> Orchestrator {
    let cfg = OrchestratorConfig {
        pools: [(
            ResourceKind::Proxy,
            PoolConfig {
                health_check_on_add: false,
                ..PoolConfig::default()
            },
        )]
        .into_iter()
        .collect(),
        ..OrchestratorConfig::default()
    };
    OrchestratorBuilder::new().with_config(cfg).build().unwrap()
}

fn proxy(host: &str, protocol: ProxyProtocol) -> NewResource {
    NewResource::new(ResourceDetails::Proxy(ProxySpec {
        host: host.into(),
        port: 1080,
        protocol,
        country: Some("DE".into()),
        region: None,
        isp: None,
        anonymity: Anonymity::Elite,
        speed_ms: None,
    }))
}

#[test]
fn test_lease_and_release_through_api() {
    let orchestrator = orchestrator();
    orchestrator
        .add_resource(proxy("10.1.0.1", ProxyProtocol::Socks5))
        .unwrap();

    let req: LeaseRequest =
        serde_json::from_str(r#"{"kind":"proxy","protocol":"socks5","country":"de"}"#).unwrap();
    let granted = api::lease(&orchestrator, &req).unwrap();
    assert_eq!(
        granted.connection,
        ConnectionDetails::Proxy {
            url: "socks5://10.1.0.1:1080".into(),
            protocol: ProxyProtocol::Socks5,
        }
    );

    let release = ReleaseRequest {
        kind: ResourceKind::Proxy,
        resource_id: granted.resource_id,
        token: Some(granted.token),
        outcome: ReleaseOutcome::Success,
    };
    let record = api::release(&orchestrator, release).unwrap();
    assert_eq!(record.success_count, 1);
    assert!(!record.is_leased());
}

#[test]
fn test_exhausted_pool_maps_to_503() {
    let orchestrator = orchestrator();
    let req = LeaseRequest {
        kind: ResourceKind::Proxy,
        requirements: Default::default(),
    };
    let err = api::lease(&orchestrator, &req).unwrap_err();
    assert_eq!(err.code, "no_resource_available");
    assert_eq!(err.http_status(), 503);
}

#[test]
fn test_stale_token_is_rejected() {
    let orchestrator = orchestrator();
    orchestrator
        .add_resource(proxy("10.1.0.2", ProxyProtocol::Http))
        .unwrap();
    let req = LeaseRequest {
        kind: ResourceKind::Proxy,
        requirements: Default::default(),
    };
    let first = api::lease(&orchestrator, &req).unwrap();
    orchestrator
        .release(ResourceKind::Proxy, first.resource_id, ReleaseOutcome::Success)
        .unwrap();
    let _second = api::lease(&orchestrator, &req).unwrap();

    let stale = ReleaseRequest {
        kind: ResourceKind::Proxy,
        resource_id: first.resource_id,
        token: Some(first.token),
        outcome: ReleaseOutcome::Failure,
    };
    let err = api::release(&orchestrator, stale).unwrap_err();
    assert_eq!(err.code, "not_leased");
    assert_eq!(err.http_status(), 409);
}

#[test]
fn test_list_resources_filters_by_status() {
    let orchestrator = orchestrator();
    let a = orchestrator
        .add_resource(proxy("10.1.0.3", ProxyProtocol::Http))
        .unwrap();
    orchestrator
        .add_resource(proxy("10.1.0.4", ProxyProtocol::Http))
        .unwrap();
    orchestrator
        .quarantine(ResourceKind::Proxy, a.id, "slow exit")
        .unwrap();

    let filter = ResourceFilter {
        status: Some(ResourceStatus::Inactive),
        ..ResourceFilter::default()
    };
    let list = api::list_resources(&orchestrator, ResourceKind::Proxy, &filter).unwrap();
    assert_eq!(list.total, 1);
    assert_eq!(list.items[0].status_reason.as_deref(), Some("slow exit"));
}

#[test]
fn test_bulk_update_through_api() {
    let orchestrator = orchestrator();
    let a = orchestrator
        .add_resource(proxy("10.1.0.6", ProxyProtocol::Http))
        .unwrap();
    let b = orchestrator
        .add_resource(proxy("10.1.0.7", ProxyProtocol::Http))
        .unwrap();

    let req: BulkUpdateRequest = serde_json::from_str(&format!(
        r#"{{"kind":"proxy","ids":[{},{}],"update":{{"daily_quota":50,"notes":"rotating"}}}}"#,
        a.id, b.id
    ))
    .unwrap();
    let list = api::bulk_update(&orchestrator, &req).unwrap();
    assert_eq!(list.total, 2);
    assert!(list
        .items
        .iter()
        .all(|r| r.daily_quota == Some(50) && r.notes.as_deref() == Some("rotating")));

    let derived: BulkUpdateRequest = serde_json::from_str(&format!(
        r#"{{"kind":"proxy","ids":[{}],"update":{{"status":"active"}}}}"#,
        a.id
    ))
    .unwrap();
    let err = api::bulk_update(&orchestrator, &derived).unwrap_err();
    assert_eq!(err.code, "immutable_field");
    assert_eq!(err.http_status(), 400);
}

#[test]
fn test_metrics_overview_and_health() {
    let orchestrator = orchestrator();
    orchestrator
        .add_resource(proxy("10.1.0.5", ProxyProtocol::Https))
        .unwrap();
    let overview = api::metrics_overview(&orchestrator);
    assert_eq!(overview.pools.len(), 1);
    assert_eq!(overview.pools[0].by_status.active, 1);
    assert!(overview.rules.is_empty());

    let health = api::health(&orchestrator);
    assert!(health.ok);
    assert!(!health.running);
}

#[test]
fn test_api_error_from_unknown_kind() {
    let err = ApiError::from(OrchestratorError::UnknownKind(ResourceKind::Account));
    assert_eq!(err.code, "unknown_kind");
    assert_eq!(err.http_status(), 404);
    assert!(!err.retryable);
}

#[test]
fn test_start_outside_runtime_is_rejected() {
    let orchestrator = orchestrator();
    assert!(matches!(
        orchestrator.start(),
        Err(OrchestratorError::InvalidRequest(_))
    ));
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn test_background_tasks_shutdown_without_tasks() {
    let tasks = BackgroundTasks::new();
    assert!(tasks.is_empty());
    let report = tasks.shutdown(Duration::from_millis(10)).await;
    assert!(report.completed.is_empty());
    assert!(report.aborted.is_empty());
}
