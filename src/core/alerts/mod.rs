//! Threshold alerting over pool metrics.

pub mod engine;
pub mod types;

pub use engine::{AlertRuleEngine, MAX_HISTORY};
pub use types::{
    AlertEvent, AlertEventKind, AlertInstance, AlertMetric, AlertRule, AlertSeverity, AlertTarget,
    Comparator, MetricsSnapshot, Notifier, RuleState,
};
