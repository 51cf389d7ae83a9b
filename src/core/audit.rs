//! Audit sink implementations.
//!
//! Pools report every lease, release and status transition to an optional
//! [`AuditSink`]. The in-memory sink keeps a bounded buffer for tests and the
//! admin UI's recent-activity view.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::record::ResourceStatus;
use crate::util::serde::{ResourceId, ResourceKind};

/// What happened to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AuditAction {
    /// Record created.
    Added,
    /// Record removed by an admin or by retention purge.
    Removed,
    /// Config fields updated.
    Updated,
    /// Checked out by a caller.
    Leased,
    /// Returned by a caller.
    Released {
        /// Outcome reported by the caller.
        outcome: String,
    },
    /// Lease reclaimed after its deadline.
    LeaseReclaimed,
    /// Status changed.
    Transition {
        /// Previous status.
        from: ResourceStatus,
        /// New status.
        to: ResourceStatus,
        /// Why.
        reason: Option<String>,
    },
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Resource concerned.
    pub resource_id: ResourceId,
    /// Pool kind.
    pub kind: ResourceKind,
    /// Action taken.
    pub action: AuditAction,
    /// When it happened.
    pub at: DateTime<Utc>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// Status transitions recorded for one resource, oldest first.
    pub fn transitions_for(&self, id: ResourceId) -> Vec<(ResourceStatus, ResourceStatus)> {
        self.events
            .iter()
            .filter(|e| e.resource_id == id)
            .filter_map(|e| match e.action {
                AuditAction::Transition { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Audit sink that forwards events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) {
        tracing::debug!(
            resource_id = %event.resource_id,
            kind = %event.kind,
            action = ?event.action,
            "audit"
        );
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    resource_id: ResourceId,
    kind: ResourceKind,
    action: AuditAction,
    at: DateTime<Utc>,
) -> AuditEvent {
    AuditEvent {
        resource_id,
        kind,
        action,
        at,
    }
}
