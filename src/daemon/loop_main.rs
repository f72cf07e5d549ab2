//! Scheduler loop: one reconciliation tick, then a fixed-delay sleep, until stopped.
//!
//! Single-threaded: a tick always finishes before the next one starts and the
//! only suspension point is the inter-tick wait. The wait is split into short
//! slices so a shutdown or sync-now request is noticed promptly.
//!
//! A tick can fail in three ways, none of which stops the loop:
//! - the reconciler reports an aborted pass (source or replica root unusable)
//! - individual entries fail (Error actions)
//! - reconciliation panics (caught and reported as an `RSY-3900` Error action)

#![allow(missing_docs)]

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::core::config::{Config, interval_from_secs};
use crate::core::errors::{Result, SyncError};
use crate::daemon::signals::SignalHandler;
use crate::logger::sink::{ActionSink, LogEvent};
use crate::mirror::action::{TickReport, TickSummary};
use crate::mirror::reconcile::{ReconcileOptions, Reconciler};

/// Granularity of the inter-tick wait.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Shutdown requested through the signal handle.
    Shutdown,
    /// The configured tick limit was reached.
    TickLimit,
}

impl StopReason {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown requested",
            Self::TickLimit => "tick limit reached",
        }
    }
}

/// Totals over a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    /// Create/Update/Delete actions across all ticks.
    pub changes: usize,
    /// Error actions across all ticks.
    pub errors: usize,
    /// Ticks that aborted before the forward pass.
    pub aborted_ticks: u64,
    pub stop_reason: StopReason,
}

/// Inputs for a [`Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub source: PathBuf,
    pub replica: PathBuf,
    pub interval: Duration,
    pub options: ReconcileOptions,
    /// Stop after this many ticks; `None` runs until shutdown.
    pub max_ticks: Option<u64>,
}

impl SchedulerConfig {
    /// Interval given in seconds; rejects zero, negative and non-finite values.
    pub fn new(
        source: impl Into<PathBuf>,
        replica: impl Into<PathBuf>,
        interval_secs: f64,
    ) -> Result<Self> {
        Ok(Self {
            source: source.into(),
            replica: replica.into(),
            interval: interval_from_secs(interval_secs)?,
            options: ReconcileOptions::default(),
            max_ticks: None,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            source: config.source()?.to_path_buf(),
            replica: config.replica()?.to_path_buf(),
            interval: config.interval()?,
            options: config.reconcile_options(),
            max_ticks: None,
        })
    }

    #[must_use]
    pub const fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub const fn with_max_ticks(mut self, max_ticks: Option<u64>) -> Self {
        self.max_ticks = max_ticks;
        self
    }
}

/// Owns the loop: reconciler, stop handle and tick counter.
pub struct Scheduler {
    config: SchedulerConfig,
    reconciler: Reconciler,
    signals: SignalHandler,
    ticks: u64,
}

impl Scheduler {
    /// Fails with `InvalidConfig` when the interval is zero.
    pub fn new(config: SchedulerConfig, signals: SignalHandler) -> Result<Self> {
        if config.interval.is_zero() {
            return Err(SyncError::InvalidConfig {
                details: "scheduler interval must be positive".to_string(),
            });
        }
        Ok(Self {
            reconciler: Reconciler::new(config.options),
            config,
            signals,
            ticks: 0,
        })
    }

    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Handle that stops or wakes this scheduler.
    pub fn signals(&self) -> SignalHandler {
        self.signals.clone()
    }

    /// Run a single tick and forward everything it produced to `sink`.
    pub fn run_once(&mut self, sink: &mut dyn ActionSink) -> TickReport {
        self.ticks += 1;
        let tick = self.ticks;
        sink.event(LogEvent::TickStarted { tick });

        let report = self.reconcile_guarded();
        for action in &report.actions {
            sink.record(action.clone());
        }

        sink.event(LogEvent::TickCompleted {
            tick,
            summary: report.summary(),
            duration_ms: u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            aborted: report.aborted,
        });
        sink.flush();
        report
    }

    /// Tick, wait, repeat until shutdown or the tick limit.
    pub fn run(&mut self, sink: &mut dyn ActionSink) -> RunSummary {
        let mut totals = TickSummary::default();
        let mut aborted_ticks = 0;
        let first_tick = self.ticks;

        let stop_reason = loop {
            if self.signals.should_shutdown() {
                break StopReason::Shutdown;
            }

            let report = self.run_once(sink);
            let summary = report.summary();
            totals.created += summary.created;
            totals.updated += summary.updated;
            totals.deleted += summary.deleted;
            totals.errors += summary.errors;
            if report.aborted {
                aborted_ticks += 1;
            }

            if self
                .config
                .max_ticks
                .is_some_and(|max| self.ticks - first_tick >= max)
            {
                break StopReason::TickLimit;
            }
            if !self.wait_for_next_tick() {
                break StopReason::Shutdown;
            }
        };

        RunSummary {
            ticks: self.ticks - first_tick,
            changes: totals.changes(),
            errors: totals.errors,
            aborted_ticks,
            stop_reason,
        }
    }

    /// Sleep one interval in slices. Returns `false` when shutdown was requested,
    /// `true` when it is time for the next tick (interval elapsed or sync requested).
    fn wait_for_next_tick(&self) -> bool {
        // An interval too large for `Instant` never elapses.
        let deadline = Instant::now().checked_add(self.config.interval);
        loop {
            if self.signals.should_shutdown() {
                return false;
            }
            if self.signals.should_sync() {
                return true;
            }
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return true;
            }
            thread::sleep(deadline.map_or(POLL_SLICE, |d| POLL_SLICE.min(d - now)));
        }
    }

    fn reconcile_guarded(&self) -> TickReport {
        let started = Utc::now();
        let clock = Instant::now();
        let source = &self.config.source;
        let replica = &self.config.replica;

        panic::catch_unwind(AssertUnwindSafe(|| {
            self.reconciler.reconcile(source, replica)
        }))
        .unwrap_or_else(|payload| {
            let err = SyncError::Runtime {
                details: format!("reconciliation panicked: {}", panic_message(&*payload)),
            };
            TickReport::failed(started, clock.elapsed(), &err)
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Full service lifecycle: start line, loop, stop line.
pub fn run_service(
    config: &Config,
    scheduler: &mut Scheduler,
    sink: &mut dyn ActionSink,
) -> RunSummary {
    let started = Instant::now();
    let sched = scheduler.config();
    sink.event(LogEvent::ServiceStarted {
        version: env!("CARGO_PKG_VERSION").to_string(),
        config_hash: config.stable_hash().unwrap_or_default(),
        source: sched.source.display().to_string(),
        replica: sched.replica.display().to_string(),
        interval_secs: format!("{}", sched.interval.as_secs_f64()),
        dry_run: sched.options.dry_run,
    });
    sink.flush();

    let summary = scheduler.run(sink);

    sink.event(LogEvent::ServiceStopped {
        reason: summary.stop_reason.label().to_string(),
        uptime_secs: started.elapsed().as_secs(),
        ticks: summary.ticks,
    });
    sink.flush();
    summary
}
