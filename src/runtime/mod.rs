//! Background task lifecycle and the API surface.

pub mod api;
pub mod lifecycle;

pub use api::{
    ApiError, BulkUpdateRequest, LeaseRequest, LeaseResponse, MetricsOverview, ReleaseRequest,
};
pub use lifecycle::{BackgroundTasks, ShutdownReport};
