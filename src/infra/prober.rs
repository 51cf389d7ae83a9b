//! Prober backends that need no network access.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::error::ProbeError;
use crate::core::health::{ProbeReport, ProbeTarget, Prober};
use crate::util::serde::ResourceId;

/// Prober that reports every resource healthy.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysHealthyProber;

#[async_trait]
impl Prober for AlwaysHealthyProber {
    async fn probe(&self, _target: &ProbeTarget) -> Result<ProbeReport, ProbeError> {
        Ok(ProbeReport::healthy())
    }
}

/// Scripted outcome for [`StaticProber`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedProbe {
    /// Report healthy with an optional latency.
    Pass(Option<u32>),
    /// Report unhealthy.
    Fail(String),
    /// Sleep before reporting healthy; used to trigger probe timeouts.
    Hang(Duration),
}

/// Prober replaying scripted outcomes per resource.
///
/// Each resource has a queue of outcomes; once it is drained the default
/// outcome applies.
pub struct StaticProber {
    scripts: Mutex<HashMap<ResourceId, VecDeque<ScriptedProbe>>>,
    default: ScriptedProbe,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StaticProber {
    /// Create a prober whose unscripted outcome is `default`.
    pub fn new(default: ScriptedProbe) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Queue outcomes for one resource.
    #[must_use]
    pub fn with_script(
        self,
        id: ResourceId,
        outcomes: impl IntoIterator<Item = ScriptedProbe>,
    ) -> Self {
        self.scripts
            .lock()
            .entry(id)
            .or_default()
            .extend(outcomes);
        self
    }

    /// Probes performed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of probes observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, id: ResourceId) -> ScriptedProbe {
        self.scripts
            .lock()
            .get_mut(&id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default.clone())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Prober for StaticProber {
    async fn probe(&self, target: &ProbeTarget) -> Result<ProbeReport, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        // Yield so concurrently spawned probes overlap.
        tokio::task::yield_now().await;
        match self.next_outcome(target.id) {
            ScriptedProbe::Pass(latency) => Ok(ProbeReport {
                latency_ms: latency,
            }),
            ScriptedProbe::Fail(reason) => Err(ProbeError::Failure(reason)),
            ScriptedProbe::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Ok(ProbeReport::healthy())
            }
        }
    }
}
