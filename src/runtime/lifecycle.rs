//! Background task ownership and graceful shutdown.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Slack added to the grace period when joining loops, so a loop that spends
/// the whole grace period draining probes can still exit on its own.
const JOIN_SLACK: Duration = Duration::from_millis(250);

/// How background loops ended during shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Loops that exited on their own.
    pub completed: Vec<String>,
    /// Loops aborted after the grace period.
    pub aborted: Vec<String>,
    /// Loops that had panicked.
    pub failed: Vec<String>,
}

/// Named background loops sharing one shutdown signal.
pub struct BackgroundTasks {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    /// Create an empty task set.
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Receiver to hand to a new loop. Subscribe before spawning.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Track a spawned loop.
    pub fn push(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        let name = name.into();
        debug!(task = %name, "background task started");
        self.handles.push((name, handle));
    }

    /// Number of tracked loops.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no loops are tracked.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every loop, wait up to `grace` for them to exit, then abort the rest.
    pub async fn shutdown(self, grace: Duration) -> ShutdownReport {
        info!(tasks = self.handles.len(), "stopping background tasks");
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!(error = %e, "failed to send shutdown signal (no receivers)");
        }

        let deadline = Instant::now() + grace + JOIN_SLACK;
        let mut report = ShutdownReport::default();
        for (name, mut handle) in self.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.completed.push(name),
                Ok(Err(e)) => {
                    error!(task = %name, error = %e, "background task failed");
                    report.failed.push(name);
                }
                Err(_) => {
                    handle.abort();
                    // Wait for the abort to land so nothing outlives shutdown.
                    let _ = handle.await;
                    warn!(task = %name, "background task aborted after grace period");
                    report.aborted.push(name);
                }
            }
        }
        info!(
            completed = report.completed.len(),
            aborted = report.aborted.len(),
            "background tasks stopped"
        );
        report
    }
}
