//! Alert type definitions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::NotifyError;
use crate::core::resource_pool::{PoolMetrics, ResourcePool};
use crate::util::serde::ResourceKind;

/// Severity level of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Critical alert requiring immediate attention.
    Critical,
    /// Warning alert indicating potential issues.
    Warning,
    /// Informational alert for awareness.
    Info,
}

/// Scope a rule's metric is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertTarget {
    /// All pools combined.
    Global,
    /// A single pool.
    Kind(ResourceKind),
}

/// Pool metric a rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    /// Mean success rate of non-expired records.
    PoolSuccessRateAvg,
    /// Records in `active`.
    ActiveCount,
    /// Records in `inactive`.
    InactiveCount,
    /// Records in `banned`.
    BannedCount,
    /// `banned / total`.
    BannedRatio,
    /// `inactive / total`.
    InactiveRatio,
    /// Records a lease could be served from right now.
    AvailableCount,
    /// Records currently leased.
    LeasedCount,
    /// All records.
    TotalCount,
    /// Mean known latency in milliseconds.
    AvgLatencyMs,
    /// Mean known cost per use.
    AvgCostPerUse,
    /// Sum of daily usage.
    DailyUsageTotal,
}

impl AlertMetric {
    /// Value of this metric for one pool. `None` when undefined (an average
    /// over no records).
    #[allow(clippy::cast_precision_loss)]
    pub fn value(self, m: &PoolMetrics) -> Option<f64> {
        Some(match self {
            Self::PoolSuccessRateAvg => return m.avg_success_rate,
            Self::ActiveCount => m.by_status.active as f64,
            Self::InactiveCount => m.by_status.inactive as f64,
            Self::BannedCount => m.by_status.banned as f64,
            Self::BannedRatio => m.banned_ratio(),
            Self::InactiveRatio => m.inactive_ratio(),
            Self::AvailableCount => m.available as f64,
            Self::LeasedCount => m.leased as f64,
            Self::TotalCount => m.total as f64,
            Self::AvgLatencyMs => return m.avg_latency_ms,
            Self::AvgCostPerUse => return m.avg_cost_per_use,
            Self::DailyUsageTotal => m.daily_usage_total as f64,
        })
    }

    /// Records behind an averaged metric, used to weight pools against each
    /// other. Zero for metrics that are not averages.
    pub const fn samples(self, m: &PoolMetrics) -> usize {
        match self {
            Self::PoolSuccessRateAvg => m.rate_samples,
            Self::AvgLatencyMs => m.latency_samples,
            Self::AvgCostPerUse => m.cost_samples,
            _ => 0,
        }
    }
}

/// Comparison between a metric value and a rule threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    /// `>`
    #[serde(rename = ">", alias = "gt")]
    Gt,
    /// `>=`
    #[serde(rename = ">=", alias = "ge")]
    Ge,
    /// `<`
    #[serde(rename = "<", alias = "lt")]
    Lt,
    /// `<=`
    #[serde(rename = "<=", alias = "le")]
    Le,
    /// `==`, within `1e-9`.
    #[serde(rename = "==", alias = "eq")]
    Eq,
}

impl Comparator {
    /// Whether `value <op> threshold` holds.
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Ge => value >= threshold,
            Self::Lt => value < threshold,
            Self::Le => value <= threshold,
            Self::Eq => (value - threshold).abs() < 1e-9,
        }
    }

    /// Operator symbol.
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
        }
    }
}

const fn default_enabled() -> bool {
    true
}

/// A rule defining when to raise an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique identifier; also the dedupe key of its instances.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Scope of the metric.
    pub target: AlertTarget,
    /// Metric watched.
    pub metric: AlertMetric,
    /// Comparison applied to the metric.
    pub comparator: Comparator,
    /// Threshold compared against.
    pub threshold: f64,
    /// Severity of raised instances.
    pub severity: AlertSeverity,
    /// Minimum seconds between two firings.
    #[serde(default)]
    pub cooldown_seconds: u64,
    /// Disabled rules are not evaluated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Notification channels (e.g. `email`, `sms`), passed through to the notifier.
    #[serde(default)]
    pub channels: Vec<String>,
}

impl AlertRule {
    /// Creates an enabled rule with no cooldown.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        target: AlertTarget,
        metric: AlertMetric,
        comparator: Comparator,
        threshold: f64,
        severity: AlertSeverity,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            target,
            metric,
            comparator,
            threshold,
            severity,
            cooldown_seconds: 0,
            enabled: true,
            channels: Vec::new(),
        }
    }

    /// Set the cooldown.
    #[must_use]
    pub const fn with_cooldown(mut self, seconds: u64) -> Self {
        self.cooldown_seconds = seconds;
        self
    }

    /// Set the notification channels.
    #[must_use]
    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    /// Reject rules that can never be evaluated meaningfully.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id must not be empty".into());
        }
        if !self.threshold.is_finite() {
            return Err("threshold must be finite".into());
        }
        Ok(())
    }

    /// Human-readable condition, e.g. `banned_ratio > 0.5`.
    pub fn condition(&self) -> String {
        format!(
            "{} {} {}",
            serde_json::to_value(self.metric)
                .ok()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default(),
            self.comparator.symbol(),
            self.threshold
        )
    }
}

/// An open or closed alert instance. At most one is open per rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertInstance {
    /// Rule that raised it; the dedupe key.
    pub rule_id: String,
    /// Severity copied from the rule.
    pub severity: AlertSeverity,
    /// When it fired.
    pub fired_at: DateTime<Utc>,
    /// When it was cleared or suppressed.
    pub cleared_at: Option<DateTime<Utc>>,
    /// Metric value that fired it.
    pub trigger_value: f64,
    /// Description of the condition.
    pub message: String,
}

impl AlertInstance {
    /// De-duplication key.
    pub fn dedupe_key(&self) -> &str {
        &self.rule_id
    }

    /// Whether the instance is still open.
    pub const fn is_open(&self) -> bool {
        self.cleared_at.is_none()
    }
}

/// Lifecycle change reported to the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertEventKind {
    /// Condition started holding.
    Fired,
    /// Condition stopped holding.
    Cleared,
    /// Instance closed because its rule was disabled or removed.
    Suppressed,
}

/// Notification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// What happened.
    pub kind: AlertEventKind,
    /// Rule concerned.
    pub rule_id: String,
    /// Rule name.
    pub rule_name: String,
    /// Rule severity.
    pub severity: AlertSeverity,
    /// Metric value at the time of the event, when known.
    pub value: Option<f64>,
    /// Rule threshold.
    pub threshold: f64,
    /// Channels the notifier should deliver to.
    pub channels: Vec<String>,
    /// Event time.
    pub at: DateTime<Utc>,
    /// Description of the condition.
    pub message: String,
}

/// Rule plus its evaluation state, for the admin surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleState {
    /// Rule definition.
    pub rule: AlertRule,
    /// Open instance, if firing.
    pub open: Option<AlertInstance>,
    /// Times the rule has fired.
    pub trigger_count: u64,
    /// Last fire time.
    pub last_triggered: Option<DateTime<Utc>>,
    /// Metric value at the last evaluation.
    pub last_value: Option<f64>,
}

/// Per-pool metrics captured together, input to rule evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Metrics per configured pool.
    pub pools: BTreeMap<ResourceKind, PoolMetrics>,
    /// Capture time.
    pub captured_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Capture metrics of every pool at `now`.
    pub fn capture<'a>(
        pools: impl IntoIterator<Item = &'a ResourcePool>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            pools: pools.into_iter().map(|p| (p.kind(), p.metrics())).collect(),
            captured_at: now,
        }
    }

    /// Value of `metric` over `target`. `None` when the target pool does not
    /// exist or the metric is undefined for it.
    ///
    /// Global counts are sums, ratios are recomputed from the summed counts and
    /// averages are weighted by the records behind each pool's average.
    #[allow(clippy::cast_precision_loss)]
    pub fn value(&self, target: AlertTarget, metric: AlertMetric) -> Option<f64> {
        match target {
            AlertTarget::Kind(kind) => self.pools.get(&kind).and_then(|m| metric.value(m)),
            AlertTarget::Global => {
                let total: usize = self.pools.values().map(|m| m.total).sum();
                match metric {
                    AlertMetric::BannedRatio | AlertMetric::InactiveRatio => {
                        let count: usize = self
                            .pools
                            .values()
                            .map(|m| {
                                if metric == AlertMetric::BannedRatio {
                                    m.by_status.banned
                                } else {
                                    m.by_status.inactive
                                }
                            })
                            .sum();
                        Some(if total == 0 {
                            0.0
                        } else {
                            count as f64 / total as f64
                        })
                    }
                    AlertMetric::PoolSuccessRateAvg
                    | AlertMetric::AvgLatencyMs
                    | AlertMetric::AvgCostPerUse => {
                        let (sum, weight) = self
                            .pools
                            .values()
                            .filter_map(|m| {
                                metric.value(m).map(|v| (v, metric.samples(m) as f64))
                            })
                            .fold((0.0, 0.0), |(s, w), (v, n)| (v.mul_add(n, s), w + n));
                        (weight > 0.0).then(|| sum / weight)
                    }
                    _ => Some(
                        self.pools
                            .values()
                            .filter_map(|m| metric.value(m))
                            .sum(),
                    ),
                }
            }
        }
    }
}

/// Delivers alert events to an external transport.
///
/// Called once per event; retrying with backoff is the implementation's job.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one event.
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError>;
}
