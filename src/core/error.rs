//! Error types for orchestrator operations.

use std::time::Duration;

use thiserror::Error;

use crate::core::record::ResourceStatus;
use crate::util::serde::{ResourceId, ResourceKind};

/// Errors surfaced to orchestrator callers.
///
/// Transient resource-level failures never appear here; they are absorbed into
/// state transitions. What remains are pool exhaustion, caller protocol
/// violations and invalid admin/configuration requests.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrchestratorError {
    /// No selectable resource matched the request.
    #[error("no {kind} available")]
    NoResourceAvailable {
        /// Pool that was exhausted.
        kind: ResourceKind,
    },
    /// Release of a resource that has no matching outstanding lease.
    #[error("resource {0} is not leased")]
    NotLeased(ResourceId),
    /// Operation requires the resource to be free.
    #[error("resource {0} is currently leased")]
    ResourceLeased(ResourceId),
    /// Admin update touched a derived field.
    #[error("field `{0}` is derived and cannot be updated")]
    ImmutableField(&'static str),
    /// Unknown resource id.
    #[error("resource {0} not found")]
    ResourceNotFound(ResourceId),
    /// Administrative transition not permitted from the current status.
    #[error("resource {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        /// Resource concerned.
        id: ResourceId,
        /// Current status.
        from: ResourceStatus,
        /// Requested status.
        to: ResourceStatus,
    },
    /// Payload kind does not match the pool kind.
    #[error("expected {expected} resource, got {actual}")]
    KindMismatch {
        /// Kind of the target pool.
        expected: ResourceKind,
        /// Kind carried by the request.
        actual: ResourceKind,
    },
    /// No pool configured for this kind.
    #[error("no pool configured for {0}")]
    UnknownKind(ResourceKind),
    /// Unknown alert rule id.
    #[error("alert rule `{0}` not found")]
    RuleNotFound(String),
    /// Alert rule id already registered.
    #[error("alert rule `{0}` already exists")]
    DuplicateRule(String),
    /// Malformed admin request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// `start()` called while background loops are running.
    #[error("background tasks already running")]
    AlreadyRunning,
}

impl OrchestratorError {
    /// Whether the caller may retry the same request later.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NoResourceAvailable { .. })
    }
}

/// Outcome of a failed health probe. Internal to the health checker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Probe exceeded its deadline.
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    /// Probe completed and reported the resource unhealthy.
    #[error("probe failed: {0}")]
    Failure(String),
}

/// Notification delivery failure reported by a [`crate::core::alerts::Notifier`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Transport rejected or dropped the event.
    #[error("notifier delivery failure: {0}")]
    DeliveryFailure(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exhaustion_is_retryable() {
        assert!(OrchestratorError::NoResourceAvailable {
            kind: ResourceKind::Proxy
        }
        .is_retryable());
        assert!(!OrchestratorError::NotLeased(ResourceId(1)).is_retryable());
        assert!(!OrchestratorError::ImmutableField("success_rate").is_retryable());
    }
}
