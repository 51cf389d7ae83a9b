//! Configuration models for pools, background loops and alerting.

pub mod pool;

pub use pool::{AlertEngineConfig, HealthCheckConfig, OrchestratorConfig, PoolConfig, SweeperConfig};
