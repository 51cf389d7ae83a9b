//! Pool, background loop and alert engine configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::alerts::AlertRule;
use crate::core::error::AppResult;
use crate::core::resource_pool::PoolPolicy;
use crate::core::scoring::ScoringWeights;
use crate::util::serde::ResourceKind;

/// Health checker settings for one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Seconds between probe cycles.
    pub interval_secs: u64,
    /// Upper bound on simultaneous probes.
    pub max_concurrent_probes: usize,
    /// Per-probe deadline in milliseconds.
    pub probe_timeout_ms: u64,
    /// Consecutive failures while inactive before a ban.
    pub ban_after_failures: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            max_concurrent_probes: num_cpus::get(),
            probe_timeout_ms: 5_000,
            ban_after_failures: 5,
        }
    }
}

/// Quota and expiry sweeper settings for one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Seconds between expiry scans.
    pub interval_secs: u64,
    /// Offset from UTC, in minutes, of the pool's day boundary.
    pub utc_offset_minutes: i32,
    /// Seconds an expired record is kept before being purged.
    pub retention_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            utc_offset_minutes: 0,
            retention_secs: 7 * 24 * 3600,
        }
    }
}

/// Per-kind pool configuration. `{}` is valid and yields the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Scoring weights; kind defaults when absent.
    pub weights: Option<ScoringWeights>,
    /// Quarantine floor for the success rate.
    pub failure_floor: f64,
    /// Consecutive failures below the floor before quarantine.
    pub quarantine_after_failures: u32,
    /// EMA smoothing factor.
    pub ema_alpha: f64,
    /// Success rate of new records.
    pub initial_success_rate: f64,
    /// Maximum lease duration before forced release.
    pub max_lease_secs: u64,
    /// Start new records in `testing`.
    pub health_check_on_add: bool,
    /// Health checker settings.
    pub health: HealthCheckConfig,
    /// Sweeper settings.
    pub sweeper: SweeperConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            weights: None,
            failure_floor: 30.0,
            quarantine_after_failures: 3,
            ema_alpha: 0.1,
            initial_success_rate: 100.0,
            max_lease_secs: 300,
            health_check_on_add: true,
            health: HealthCheckConfig::default(),
            sweeper: SweeperConfig::default(),
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(weights) = &self.weights {
            weights.validate()?;
        }
        if !(0.0..=100.0).contains(&self.failure_floor) {
            return Err("failure_floor must be within [0, 100]".into());
        }
        if self.quarantine_after_failures == 0 {
            return Err("quarantine_after_failures must be greater than 0".into());
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err("ema_alpha must be within (0, 1]".into());
        }
        if !(0.0..=100.0).contains(&self.initial_success_rate) {
            return Err("initial_success_rate must be within [0, 100]".into());
        }
        if self.max_lease_secs == 0 {
            return Err("max_lease_secs must be greater than 0".into());
        }
        if self.health.interval_secs == 0 {
            return Err("health.interval_secs must be greater than 0".into());
        }
        if self.health.max_concurrent_probes == 0 {
            return Err("health.max_concurrent_probes must be greater than 0".into());
        }
        if self.health.probe_timeout_ms == 0 {
            return Err("health.probe_timeout_ms must be greater than 0".into());
        }
        if self.health.ban_after_failures == 0 {
            return Err("health.ban_after_failures must be greater than 0".into());
        }
        if self.sweeper.interval_secs == 0 {
            return Err("sweeper.interval_secs must be greater than 0".into());
        }
        if self.sweeper.utc_offset_minutes.abs() >= 24 * 60 {
            return Err("sweeper.utc_offset_minutes must be within one day".into());
        }
        Ok(())
    }

    /// Behavioural policy for a pool of `kind`.
    pub fn policy(&self, kind: ResourceKind) -> PoolPolicy {
        PoolPolicy {
            weights: self.weights.unwrap_or_else(|| ScoringWeights::for_kind(kind)),
            ema_alpha: self.ema_alpha,
            failure_floor: self.failure_floor,
            quarantine_after_failures: self.quarantine_after_failures,
            ban_after_probe_failures: self.health.ban_after_failures,
            initial_success_rate: self.initial_success_rate,
            max_lease: Duration::from_secs(self.max_lease_secs),
            health_check_on_add: self.health_check_on_add,
            expired_retention: Duration::from_secs(self.sweeper.retention_secs),
        }
    }
}

/// Alert engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertEngineConfig {
    /// Seconds between rule evaluations.
    pub interval_secs: u64,
    /// Closed instances kept in history.
    pub history_limit: usize,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            history_limit: 1_000,
        }
    }
}

fn default_pools() -> BTreeMap<ResourceKind, PoolConfig> {
    ResourceKind::ALL
        .into_iter()
        .map(|kind| (kind, PoolConfig::default()))
        .collect()
}

const fn default_shutdown_grace_ms() -> u64 {
    5_000
}

/// Root orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// One entry per pool to create. Defaults to all three kinds.
    #[serde(default = "default_pools")]
    pub pools: BTreeMap<ResourceKind, PoolConfig>,
    /// Alert engine settings.
    #[serde(default)]
    pub alerts: AlertEngineConfig,
    /// Rules registered at startup.
    #[serde(default)]
    pub rules: Vec<AlertRule>,
    /// How long `stop()` waits for background loops before aborting them.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pools: default_pools(),
            alerts: AlertEngineConfig::default(),
            rules: Vec::new(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl OrchestratorConfig {
    /// Validate all pools, the alert engine and the startup rules.
    pub fn validate(&self) -> Result<(), String> {
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        for (kind, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{kind}` invalid: {e}"))?;
        }
        if self.alerts.interval_secs == 0 {
            return Err("alerts.interval_secs must be greater than 0".into());
        }
        let mut seen = std::collections::BTreeSet::new();
        for rule in &self.rules {
            rule.validate()
                .map_err(|e| format!("rule `{}` invalid: {e}", rule.id))?;
            if !seen.insert(rule.id.as_str()) {
                return Err(format!("rule `{}` defined twice", rule.id));
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json_str(&raw)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading config file {}", path.display()))
    }

    /// Grace period for `stop()`.
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_all_default_pools() {
        let cfg = OrchestratorConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg.pools.len(), 3);
        assert_eq!(cfg.pools[&ResourceKind::Proxy], PoolConfig::default());
    }

    #[test]
    fn partial_pool_config_keeps_defaults() {
        let cfg = OrchestratorConfig::from_json_str(
            r#"{"pools": {"proxy": {"failure_floor": 40.0, "health": {"ban_after_failures": 2}}}}"#,
        )
        .unwrap();
        let proxy = &cfg.pools[&ResourceKind::Proxy];
        assert!((proxy.failure_floor - 40.0).abs() < f64::EPSILON);
        assert_eq!(proxy.health.ban_after_failures, 2);
        assert_eq!(proxy.quarantine_after_failures, 3);
        assert_eq!(cfg.pools.len(), 1);
    }

    #[test]
    fn policy_falls_back_to_kind_weights() {
        let policy = PoolConfig::default().policy(ResourceKind::CaptchaProvider);
        assert_eq!(policy.weights, ScoringWeights::for_kind(ResourceKind::CaptchaProvider));
        assert_eq!(policy.max_lease, Duration::from_secs(300));
    }

    #[test]
    fn out_of_range_alpha_rejected() {
        let err = OrchestratorConfig::from_json_str(r#"{"pools": {"account": {"ema_alpha": 0.0}}}"#)
            .unwrap_err();
        assert!(err.contains("ema_alpha"));
    }
}
