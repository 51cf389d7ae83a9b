//! Alert rule storage and evaluation.
//!
//! State lives behind a `parking_lot::Mutex`; events are computed under the
//! lock and dispatched to the notifier after it is released.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::types::{
    AlertEvent, AlertEventKind, AlertInstance, AlertRule, MetricsSnapshot, Notifier, RuleState,
};
use crate::core::error::OrchestratorError;
use crate::core::resource_pool::ResourcePool;
use crate::util::clock::{Clock, SharedClock};

/// Default number of closed instances kept in memory.
pub const MAX_HISTORY: usize = 1000;

struct RuleEntry {
    rule: AlertRule,
    open: Option<AlertInstance>,
    last_fired: Option<DateTime<Utc>>,
    trigger_count: u64,
    last_value: Option<f64>,
}

impl RuleEntry {
    const fn new(rule: AlertRule) -> Self {
        Self {
            rule,
            open: None,
            last_fired: None,
            trigger_count: 0,
            last_value: None,
        }
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_fired else {
            return false;
        };
        let secs = i64::try_from(self.rule.cooldown_seconds).unwrap_or(i64::MAX);
        ChronoDuration::try_seconds(secs)
            .and_then(|cooldown| last.checked_add_signed(cooldown))
            .is_none_or(|end| now < end)
    }

    fn event(&self, kind: AlertEventKind, value: Option<f64>, at: DateTime<Utc>) -> AlertEvent {
        AlertEvent {
            kind,
            rule_id: self.rule.id.clone(),
            rule_name: self.rule.name.clone(),
            severity: self.rule.severity,
            value,
            threshold: self.rule.threshold,
            channels: self.rule.channels.clone(),
            at,
            message: self.rule.condition(),
        }
    }

    /// Close the open instance, if any, and describe it as `kind`.
    fn close(
        &mut self,
        kind: AlertEventKind,
        value: Option<f64>,
        at: DateTime<Utc>,
    ) -> Option<(AlertInstance, AlertEvent)> {
        let mut instance = self.open.take()?;
        instance.cleared_at = Some(at);
        Some((instance, self.event(kind, value, at)))
    }
}

#[derive(Default)]
struct EngineState {
    rules: Vec<RuleEntry>,
    history: VecDeque<AlertInstance>,
}

impl EngineState {
    fn entry_mut(&mut self, rule_id: &str) -> Result<&mut RuleEntry, OrchestratorError> {
        self.rules
            .iter_mut()
            .find(|e| e.rule.id == rule_id)
            .ok_or_else(|| OrchestratorError::RuleNotFound(rule_id.to_string()))
    }

    fn archive(&mut self, instance: AlertInstance, limit: usize) {
        if limit == 0 {
            return;
        }
        while self.history.len() >= limit {
            self.history.pop_front();
        }
        self.history.push_back(instance);
    }
}

/// Evaluates alert rules against metrics snapshots and manages the lifecycle
/// of their instances.
pub struct AlertRuleEngine {
    state: Mutex<EngineState>,
    notifier: Option<Arc<dyn Notifier>>,
    history_limit: usize,
}

impl Default for AlertRuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertRuleEngine {
    /// Engine with no notifier and the default history bound.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            notifier: None,
            history_limit: MAX_HISTORY,
        }
    }

    /// Send events to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Keep at most `limit` closed instances.
    #[must_use]
    pub const fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    // ========== Rule management ==========

    /// Register a rule.
    pub fn add_rule(&self, rule: AlertRule) -> Result<(), OrchestratorError> {
        rule.validate().map_err(OrchestratorError::InvalidRequest)?;
        let mut state = self.state.lock();
        if state.rules.iter().any(|e| e.rule.id == rule.id) {
            return Err(OrchestratorError::DuplicateRule(rule.id));
        }
        info!(rule_id = %rule.id, condition = %rule.condition(), "alert rule added");
        state.rules.push(RuleEntry::new(rule));
        Ok(())
    }

    /// Replace a rule definition. Its open instance and counters are kept,
    /// unless the new definition is disabled, which suppresses the instance.
    pub async fn update_rule(
        &self,
        rule: AlertRule,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertEvent>, OrchestratorError> {
        rule.validate().map_err(OrchestratorError::InvalidRequest)?;
        let event = {
            let mut state = self.state.lock();
            let limit = self.history_limit;
            let entry = state.entry_mut(&rule.id)?;
            entry.rule = rule;
            let closed = if entry.rule.enabled {
                None
            } else {
                entry.close(AlertEventKind::Suppressed, None, now)
            };
            closed.map(|(instance, event)| {
                state.archive(instance, limit);
                event
            })
        };
        self.dispatch(event.iter()).await;
        Ok(event)
    }

    /// Remove a rule, suppressing its open instance.
    pub async fn remove_rule(
        &self,
        rule_id: &str,
        now: DateTime<Utc>,
    ) -> Result<AlertRule, OrchestratorError> {
        let (rule, event) = {
            let mut state = self.state.lock();
            let pos = state
                .rules
                .iter()
                .position(|e| e.rule.id == rule_id)
                .ok_or_else(|| OrchestratorError::RuleNotFound(rule_id.to_string()))?;
            let mut entry = state.rules.remove(pos);
            let event = entry
                .close(AlertEventKind::Suppressed, None, now)
                .map(|(instance, event)| {
                    state.archive(instance, self.history_limit);
                    event
                });
            (entry.rule, event)
        };
        info!(rule_id = %rule.id, "alert rule removed");
        self.dispatch(event.iter()).await;
        Ok(rule)
    }

    /// Enable a rule. It is evaluated from the next evaluation on.
    pub fn enable_rule(&self, rule_id: &str) -> Result<(), OrchestratorError> {
        let mut state = self.state.lock();
        state.entry_mut(rule_id)?.rule.enabled = true;
        Ok(())
    }

    /// Disable a rule. An open instance is closed with a `suppressed` event,
    /// never `cleared`, since the condition may still hold.
    pub async fn disable_rule(
        &self,
        rule_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertEvent>, OrchestratorError> {
        let event = {
            let mut state = self.state.lock();
            let entry = state.entry_mut(rule_id)?;
            entry.rule.enabled = false;
            let closed = entry.close(AlertEventKind::Suppressed, None, now);
            closed.map(|(instance, event)| {
                state.archive(instance, self.history_limit);
                event
            })
        };
        self.dispatch(event.iter()).await;
        Ok(event)
    }

    /// All rule definitions, in registration order.
    pub fn rules(&self) -> Vec<AlertRule> {
        self.state.lock().rules.iter().map(|e| e.rule.clone()).collect()
    }

    /// One rule definition.
    pub fn rule(&self, rule_id: &str) -> Option<AlertRule> {
        self.state
            .lock()
            .rules
            .iter()
            .find(|e| e.rule.id == rule_id)
            .map(|e| e.rule.clone())
    }

    /// Rules with their evaluation state.
    pub fn rule_states(&self) -> Vec<RuleState> {
        self.state
            .lock()
            .rules
            .iter()
            .map(|e| RuleState {
                rule: e.rule.clone(),
                open: e.open.clone(),
                trigger_count: e.trigger_count,
                last_triggered: e.last_fired,
                last_value: e.last_value,
            })
            .collect()
    }

    /// Currently open instances.
    pub fn open_instances(&self) -> Vec<AlertInstance> {
        self.state
            .lock()
            .rules
            .iter()
            .filter_map(|e| e.open.clone())
            .collect()
    }

    /// Closed instances, oldest first.
    pub fn history(&self) -> Vec<AlertInstance> {
        self.state.lock().history.iter().cloned().collect()
    }

    // ========== Evaluation ==========

    /// Evaluate every enabled rule against `snapshot` and notify the resulting
    /// events. Evaluating an unchanged snapshot again yields no events.
    pub async fn evaluate(&self, snapshot: &MetricsSnapshot) -> Vec<AlertEvent> {
        let events = self.transition(snapshot);
        self.dispatch(events.iter()).await;
        events
    }

    fn transition(&self, snapshot: &MetricsSnapshot) -> Vec<AlertEvent> {
        let now = snapshot.captured_at;
        let mut events = Vec::new();
        let mut closed = Vec::new();
        let mut state = self.state.lock();

        for entry in state.rules.iter_mut().filter(|e| e.rule.enabled) {
            let Some(value) = snapshot.value(entry.rule.target, entry.rule.metric) else {
                debug!(rule_id = %entry.rule.id, "metric undefined, rule skipped");
                continue;
            };
            entry.last_value = Some(value);
            let holds = entry.rule.comparator.holds(value, entry.rule.threshold);

            match (holds, entry.open.is_some()) {
                (true, false) => {
                    if entry.in_cooldown(now) {
                        debug!(rule_id = %entry.rule.id, value, "alert suppressed by cooldown");
                        continue;
                    }
                    entry.open = Some(AlertInstance {
                        rule_id: entry.rule.id.clone(),
                        severity: entry.rule.severity,
                        fired_at: now,
                        cleared_at: None,
                        trigger_value: value,
                        message: entry.rule.condition(),
                    });
                    entry.last_fired = Some(now);
                    entry.trigger_count += 1;
                    warn!(
                        rule_id = %entry.rule.id,
                        severity = ?entry.rule.severity,
                        value,
                        threshold = entry.rule.threshold,
                        "alert fired"
                    );
                    events.push(entry.event(AlertEventKind::Fired, Some(value), now));
                }
                (false, true) => {
                    if let Some((instance, event)) =
                        entry.close(AlertEventKind::Cleared, Some(value), now)
                    {
                        info!(rule_id = %entry.rule.id, value, "alert cleared");
                        closed.push(instance);
                        events.push(event);
                    }
                }
                _ => {}
            }
        }

        for instance in closed {
            state.archive(instance, self.history_limit);
        }
        events
    }

    /// Evaluate rules against `pools` on a fixed interval until `shutdown_rx`
    /// fires.
    #[must_use]
    pub fn start_with_shutdown(
        self: Arc<Self>,
        pools: Vec<Arc<ResourcePool>>,
        clock: SharedClock,
        every: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = every.as_secs(), "alert evaluator started");
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = MetricsSnapshot::capture(
                            pools.iter().map(AsRef::as_ref),
                            Clock::now(clock.as_ref()),
                        );
                        self.evaluate(&snapshot).await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!("alert evaluator shutting down");
        })
    }

    /// Deliver events one by one. Failures are logged and not retried.
    async fn dispatch<'a>(&self, events: impl Iterator<Item = &'a AlertEvent>) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        for event in events {
            if let Err(e) = notifier.notify(event).await {
                warn!(rule_id = %event.rule_id, kind = ?event.kind, error = %e, "alert notification failed");
            }
        }
    }
}
