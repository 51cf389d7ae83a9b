//! Resource records, pools and the loops that maintain them.

pub mod alerts;
pub mod audit;
pub mod error;
pub mod health;
pub mod orchestrator;
pub mod record;
pub mod resource_pool;
pub mod scoring;
pub mod sweeper;

pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use error::{AppResult, NotifyError, OrchestratorError, ProbeError};
pub use health::{CycleReport, HealthChecker, ProbeReport, ProbeTarget, Prober};
pub use orchestrator::{Orchestrator, PoolUnit};
pub use record::{
    AccountSpec, AccountType, Anonymity, CaptchaProviderSpec, CaptchaType, ConnectionDetails,
    Lease, LeaseRequirements, NewResource, ProxyProtocol, ProxySpec, ReleaseOutcome,
    ResourceDetails, ResourceFilter, ResourceRecord, ResourceStatus, ResourceUpdate,
};
pub use resource_pool::{PoolMetrics, PoolPolicy, ResourcePool, StatusCounts};
pub use scoring::{select_best, ScoringWeights};
pub use sweeper::{SweepReport, Sweeper};
