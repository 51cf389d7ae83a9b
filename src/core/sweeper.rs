//! Quota resets, expiry and lease reclamation.
//!
//! The sweeper is the only writer that lowers usage counters. Each tick:
//! 1. resets `daily_usage` when the local calendar day has changed since the
//!    last reset (and `monthly_usage` when the month has changed),
//! 2. reclaims leases held past their deadline as failures,
//! 3. expires unleased records whose `expire_at` has passed,
//! 4. purges records that have stayed expired past the retention window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Offset, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::SweeperConfig;
use crate::core::resource_pool::ResourcePool;
use crate::util::serde::ResourceId;

/// What one tick changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// A day boundary was crossed and daily usage was reset.
    pub daily_reset: bool,
    /// A month boundary was crossed and monthly usage was reset.
    pub monthly_reset: bool,
    /// Records whose counters were non-zero at reset time.
    pub counters_cleared: usize,
    /// Leases force-released after their deadline.
    pub reclaimed: Vec<ResourceId>,
    /// Records moved to `expired`.
    pub expired: Vec<ResourceId>,
    /// Records deleted after retention.
    pub purged: Vec<ResourceId>,
}

impl SweepReport {
    /// Whether the tick changed anything.
    pub fn is_noop(&self) -> bool {
        !self.daily_reset
            && !self.monthly_reset
            && self.reclaimed.is_empty()
            && self.expired.is_empty()
            && self.purged.is_empty()
    }
}

/// Periodic maintenance for one pool.
pub struct Sweeper {
    pool: Arc<ResourcePool>,
    offset: FixedOffset,
    sweep_interval: Duration,
    last_reset: Mutex<NaiveDate>,
}

impl Sweeper {
    /// Create a sweeper for `pool`.
    #[must_use]
    pub fn new(pool: Arc<ResourcePool>, config: &SweeperConfig) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix());
        let today = pool.now().with_timezone(&offset).date_naive();
        Self {
            pool,
            offset,
            sweep_interval: Duration::from_secs(config.interval_secs),
            last_reset: Mutex::new(today),
        }
    }

    /// Local calendar date of `now` in the pool's time zone.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    /// Run one sweep at `now`.
    ///
    /// Counters are reset on the first tick that observes a later day than the
    /// last reset, counting the day the sweeper was created as a reset.
    pub fn tick(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let today = self.local_date(now);
        {
            let mut last = self.last_reset.lock();
            let prev = *last;
            if prev != today {
                report.daily_reset = true;
                report.counters_cleared = self.pool.reset_daily_usage();
                if (prev.year(), prev.month()) != (today.year(), today.month()) {
                    report.monthly_reset = true;
                    report.counters_cleared =
                        report.counters_cleared.max(self.pool.reset_monthly_usage());
                }
                *last = today;
            }
        }

        report.reclaimed = self.pool.reclaim_overdue_leases(now);
        report.expired = self.pool.expire_due(now);
        report.purged = self.pool.purge_retired(now);

        if report.daily_reset {
            info!(
                kind = %self.pool.kind(),
                date = %today,
                monthly = report.monthly_reset,
                "usage counters reset"
            );
        }
        if !report.is_noop() {
            debug!(
                kind = %self.pool.kind(),
                reclaimed = report.reclaimed.len(),
                expired = report.expired.len(),
                purged = report.purged.len(),
                "sweep finished"
            );
        }
        report
    }

    /// Sweep at the pool clock's current time.
    pub fn run_once(&self) -> SweepReport {
        self.tick(self.pool.now())
    }

    /// Run sweeps on a fixed interval until `shutdown_rx` fires.
    #[must_use]
    pub fn start_with_shutdown(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                kind = %self.pool.kind(),
                interval_secs = self.sweep_interval.as_secs(),
                "sweeper started"
            );
            let mut ticker = interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once();
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!(kind = %self.pool.kind(), "sweeper shutting down");
        })
    }
}
