//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use replica_sync::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, SyncError};

// Mirror
pub use crate::mirror::action::{ActionKind, SyncAction, TickReport, TickSummary};
pub use crate::mirror::comparator::{CompareMode, Comparator, needs_copy};
pub use crate::mirror::reconcile::{
    ReconcileOptions, Reconciler, SpecialFilePolicy, SymlinkPolicy, reconcile,
};

// Logger
pub use crate::logger::line::{LogFormat, LogWriter, LogWriterConfig};
pub use crate::logger::sink::{ActionLogger, ActionSink, LogEvent, MemorySink};

// Daemon
pub use crate::daemon::loop_main::{RunSummary, Scheduler, SchedulerConfig, StopReason};
pub use crate::daemon::signals::SignalHandler;
