//! Notifier backends.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::alerts::{AlertEvent, Notifier};
use crate::core::error::NotifyError;

/// Delivered notification container.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredAlert {
    /// Event as received.
    pub event: AlertEvent,
    /// Delivery timestamp in milliseconds.
    pub delivered_at_ms: u128,
}

/// In-memory notifier for development/testing.
///
/// Can be switched into a failing mode to exercise delivery errors.
#[derive(Default)]
pub struct InMemoryNotifier {
    delivered: Mutex<Vec<DeliveredAlert>>,
    failing: AtomicBool,
}

impl InMemoryNotifier {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent deliveries fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Events delivered so far, oldest first.
    pub fn events(&self) -> Vec<AlertEvent> {
        self.delivered.lock().iter().map(|d| d.event.clone()).collect()
    }

    /// Deliveries with their timestamps.
    pub fn deliveries(&self) -> Vec<DeliveredAlert> {
        self.delivered.lock().clone()
    }

    /// Drop recorded deliveries.
    pub fn clear(&self) {
        self.delivered.lock().clear();
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::DeliveryFailure(format!(
                "transport down, dropped {:?} for rule `{}`",
                event.kind, event.rule_id
            )));
        }
        self.delivered.lock().push(DeliveredAlert {
            event: event.clone(),
            delivered_at_ms: crate::util::clock::now_ms(),
        });
        Ok(())
    }
}

/// Notifier that writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: &AlertEvent) -> Result<(), NotifyError> {
        tracing::info!(
            rule_id = %event.rule_id,
            kind = ?event.kind,
            severity = ?event.severity,
            value = ?event.value,
            channels = ?event.channels,
            "{}",
            event.message
        );
        Ok(())
    }
}
