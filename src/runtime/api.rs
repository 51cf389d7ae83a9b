//! API-facing request/response models for the admin UI and lease callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::OrchestratorError;
use crate::core::orchestrator::Orchestrator;
use crate::core::record::{
    ConnectionDetails, Lease, LeaseRequirements, ReleaseOutcome, ResourceFilter, ResourceRecord,
    ResourceUpdate,
};
use crate::core::resource_pool::PoolMetrics;
use crate::util::serde::{LeaseToken, ResourceId, ResourceKind};

/// Error payload with a stable machine-readable code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Stable error code, e.g. `no_resource_available`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Whether the same request may succeed later.
    pub retryable: bool,
}

impl ApiError {
    /// HTTP status a transport should use for this error.
    pub fn http_status(&self) -> u16 {
        match self.code.as_str() {
            "no_resource_available" => 503,
            "not_leased" | "resource_leased" | "invalid_transition" | "already_running"
            | "duplicate_rule" => 409,
            "resource_not_found" | "rule_not_found" | "unknown_kind" => 404,
            _ => 400,
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let code = match &err {
            OrchestratorError::NoResourceAvailable { .. } => "no_resource_available",
            OrchestratorError::NotLeased(_) => "not_leased",
            OrchestratorError::ResourceLeased(_) => "resource_leased",
            OrchestratorError::ImmutableField(_) => "immutable_field",
            OrchestratorError::ResourceNotFound(_) => "resource_not_found",
            OrchestratorError::InvalidTransition { .. } => "invalid_transition",
            OrchestratorError::KindMismatch { .. } => "kind_mismatch",
            OrchestratorError::UnknownKind(_) => "unknown_kind",
            OrchestratorError::RuleNotFound(_) => "rule_not_found",
            OrchestratorError::DuplicateRule(_) => "duplicate_rule",
            OrchestratorError::InvalidRequest(_) => "invalid_request",
            OrchestratorError::InvalidConfig(_) => "invalid_config",
            OrchestratorError::AlreadyRunning => "already_running",
        };
        Self {
            code: code.to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Lease request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRequest {
    /// Pool to lease from.
    pub kind: ResourceKind,
    /// Attribute constraints.
    #[serde(flatten)]
    pub requirements: LeaseRequirements,
}

/// Lease grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseResponse {
    /// Leased resource.
    pub resource_id: ResourceId,
    /// Its kind.
    pub kind: ResourceKind,
    /// Token to present on release.
    pub token: LeaseToken,
    /// Forced-release deadline.
    pub expires_at: DateTime<Utc>,
    /// How to use the resource.
    pub connection: ConnectionDetails,
}

impl From<Lease> for LeaseResponse {
    fn from(lease: Lease) -> Self {
        Self {
            resource_id: lease.resource_id,
            kind: lease.kind,
            token: lease.token,
            expires_at: lease.expires_at,
            connection: lease.connection,
        }
    }
}

/// Release request. Without a token the release is accepted for whoever
/// holds the lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRequest {
    /// Pool of the resource.
    pub kind: ResourceKind,
    /// Resource to return.
    pub resource_id: ResourceId,
    /// Token from the lease grant.
    #[serde(default)]
    pub token: Option<LeaseToken>,
    /// How the use went.
    #[serde(flatten)]
    pub outcome: ReleaseOutcome,
}

/// One config update applied to several resources of a kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkUpdateRequest {
    /// Pool of the resources.
    pub kind: ResourceKind,
    /// Resources to update.
    pub ids: Vec<ResourceId>,
    /// Fields to change.
    pub update: ResourceUpdate,
}

/// Resource listing.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceList {
    /// Pool listed.
    pub kind: ResourceKind,
    /// Number of items.
    pub total: usize,
    /// Matching records.
    pub items: Vec<ResourceRecord>,
}

/// Current value of one alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleValue {
    /// Rule id.
    pub rule_id: String,
    /// Metric value at the last evaluation.
    pub value: Option<f64>,
    /// Whether an instance is open.
    pub firing: bool,
    /// Times fired.
    pub trigger_count: u64,
}

/// Metrics surface polled by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsOverview {
    /// Per-pool metrics.
    pub pools: Vec<PoolMetrics>,
    /// Per-rule values.
    pub rules: Vec<RuleValue>,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Background loops running.
    pub running: bool,
}

/// Serve a lease request.
pub fn lease(orchestrator: &Orchestrator, req: &LeaseRequest) -> Result<LeaseResponse, ApiError> {
    Ok(orchestrator.lease(req.kind, &req.requirements)?.into())
}

/// Serve a release request.
pub fn release(
    orchestrator: &Orchestrator,
    req: ReleaseRequest,
) -> Result<ResourceRecord, ApiError> {
    let record = match req.token {
        Some(token) => orchestrator
            .pool(req.kind)?
            .release_with_token(req.resource_id, token, req.outcome)?,
        None => orchestrator.release(req.kind, req.resource_id, req.outcome)?,
    };
    Ok(record)
}

/// List resources of one kind.
pub fn list_resources(
    orchestrator: &Orchestrator,
    kind: ResourceKind,
    filter: &ResourceFilter,
) -> Result<ResourceList, ApiError> {
    let items = orchestrator.list_resources(kind, filter)?;
    Ok(ResourceList {
        kind,
        total: items.len(),
        items,
    })
}

/// Apply a bulk update; the response lists the updated records.
pub fn bulk_update(
    orchestrator: &Orchestrator,
    req: &BulkUpdateRequest,
) -> Result<ResourceList, ApiError> {
    let items = orchestrator.bulk_update(req.kind, &req.ids, &req.update)?;
    Ok(ResourceList {
        kind: req.kind,
        total: items.len(),
        items,
    })
}

/// Build the metrics overview.
pub fn metrics_overview(orchestrator: &Orchestrator) -> MetricsOverview {
    let snapshot = orchestrator.metrics_snapshot();
    MetricsOverview {
        pools: snapshot.pools.into_values().collect(),
        rules: orchestrator
            .rule_states()
            .into_iter()
            .map(|s| RuleValue {
                rule_id: s.rule.id,
                value: s.last_value,
                firing: s.open.is_some(),
                trigger_count: s.trigger_count,
            })
            .collect(),
    }
}

/// Return a health payload.
pub fn health(orchestrator: &Orchestrator) -> Health {
    Health {
        ok: true,
        running: orchestrator.is_running(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_maps_to_retryable_503() {
        let err = ApiError::from(OrchestratorError::NoResourceAvailable {
            kind: ResourceKind::Proxy,
        });
        assert_eq!(err.code, "no_resource_available");
        assert!(err.retryable);
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn immutable_field_is_a_validation_error() {
        let err = ApiError::from(OrchestratorError::ImmutableField("success_rate"));
        assert_eq!(err.http_status(), 400);
        assert!(err.message.contains("success_rate"));
    }

    #[test]
    fn release_request_flattens_outcome() {
        let req: ReleaseRequest = serde_json::from_str(
            r#"{"kind":"account","resource_id":3,"outcome":"banned","reason":"captcha wall"}"#,
        )
        .unwrap();
        assert_eq!(req.outcome, ReleaseOutcome::banned("captcha wall"));
        assert!(req.token.is_none());
    }
}
