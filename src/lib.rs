//! # Prometheus Pool Orchestrator
//!
//! Lease orchestration for pools of perishable, rate-limited resources used by
//! crawl workers: proxies, platform accounts and captcha-solving providers.
//!
//! Crawl tasks lease a resource, use it externally, and release it with an
//! outcome. The orchestrator keeps each pool healthy in between.
//!
//! ## Core Problem Solved
//!
//! - **Exclusive use**: an identity (proxy exit, account) must never be used by
//!   two workers at once, or the target service flags it
//! - **Degradation**: resources fail, get banned and expire; failing ones are
//!   quarantined and re-probed instead of being handed out
//! - **Quotas**: accounts and providers have daily caps that reset at the pool's
//!   local midnight
//! - **Visibility**: pool health is watched by threshold alert rules with
//!   de-duplication and cooldowns
//!
//! ## Components
//!
//! - [`core::ResourcePool`]: lease/release/quarantine behind one lock per pool,
//!   with score-based selection ([`core::scoring`])
//! - [`core::HealthChecker`]: bounded-concurrency probing of `testing` and
//!   `inactive` resources
//! - [`core::Sweeper`]: daily/monthly usage resets, expiry, lease reclamation
//! - [`core::alerts::AlertRuleEngine`]: rule evaluation over pool metrics
//! - [`core::Orchestrator`]: the facade binding all of the above per kind
//!
//! ```rust,ignore
//! use prometheus_pool_orchestrator::builders::OrchestratorBuilder;
//! use prometheus_pool_orchestrator::core::{LeaseRequirements, ProxyProtocol, ReleaseOutcome};
//! use prometheus_pool_orchestrator::util::serde::ResourceKind;
//!
//! let orchestrator = OrchestratorBuilder::new().build()?;
//! orchestrator.start()?;
//!
//! let lease = orchestrator.lease(
//!     ResourceKind::Proxy,
//!     &LeaseRequirements { protocol: Some(ProxyProtocol::Socks5), ..Default::default() },
//! )?;
//! // ... crawl through lease.connection ...
//! orchestrator.release_lease(&lease, ReleaseOutcome::Success)?;
//!
//! orchestrator.stop().await;
//! ```
//!
//! For complete scenarios, see `tests/orchestrator_scenarios_test.rs`.

#![deny(unsafe_code)]
#![deny(warnings)]
#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Resource records, pools, health checking, sweeping and alerting.
pub mod core;
/// Configuration models for pools, background loops and alerting.
pub mod config;
/// Builders to construct the orchestrator from configuration.
pub mod builders;
/// Notifier and prober adapters.
pub mod infra;
/// Background task lifecycle and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
