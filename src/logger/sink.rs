//! Action sinks: where reconciliation decisions and service lifecycle events go.
//!
//! The scheduler talks to an [`ActionSink`]; [`ActionLogger`] is the durable
//! implementation (file writer plus optional console echo) and [`MemorySink`]
//! keeps everything in memory for library consumers and tests.
//!
//! Sinks never return errors. A failing file degrades inside [`LogWriter`].

#![allow(missing_docs)]

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::logger::line::{EventType, Level, LogEntry, LogWriter, LogWriterConfig, WriterState};
use crate::mirror::action::{ActionKind, SyncAction, TickSummary};

/// Everything the scheduler reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    ServiceStarted {
        version: String,
        config_hash: String,
        source: String,
        replica: String,
        interval_secs: String,
        dry_run: bool,
    },
    TickStarted {
        tick: u64,
    },
    Action(SyncAction),
    TickCompleted {
        tick: u64,
        summary: TickSummary,
        duration_ms: u64,
        aborted: bool,
    },
    ServiceStopped {
        reason: String,
        uptime_secs: u64,
        ticks: u64,
    },
}

/// Receiver of log events, in production order.
pub trait ActionSink {
    fn event(&mut self, event: LogEvent);

    /// Record a single reconciliation decision.
    fn record(&mut self, action: SyncAction) {
        self.event(LogEvent::Action(action));
    }

    /// Push buffered lines to durable storage. Called at the end of each tick.
    fn flush(&mut self) {}
}

impl<S: ActionSink + ?Sized> ActionSink for &mut S {
    fn event(&mut self, event: LogEvent) {
        (**self).event(event);
    }

    fn flush(&mut self) {
        (**self).flush();
    }
}

// ──────────────────── event conversion ────────────────────

/// Build the log line for an event.
pub fn event_to_log_entry(event: &LogEvent) -> LogEntry {
    match event {
        LogEvent::ServiceStarted {
            version,
            config_hash,
            source,
            replica,
            interval_secs,
            dry_run,
        } => {
            let mode = if *dry_run { " (dry run)" } else { "" };
            let mut e = LogEntry::new(
                EventType::ServiceStart,
                Level::Info,
                format!(
                    "Starting replsync {version}: {source} -> {replica} every {interval_secs}s{mode}"
                ),
            );
            e.detail = Some(format!("config_hash={config_hash}"));
            e
        }
        LogEvent::TickStarted { tick } => {
            let mut e = LogEntry::new(
                EventType::TickStart,
                Level::Info,
                "Starting synchronization...",
            );
            e.tick = Some(*tick);
            e
        }
        LogEvent::Action(action) => action_to_log_entry(action),
        LogEvent::TickCompleted {
            tick,
            summary,
            duration_ms,
            aborted,
        } => {
            let (level, message) = if *aborted {
                (
                    Level::Error,
                    format!("Synchronization aborted after {duration_ms}ms: {summary}"),
                )
            } else if summary.changes() == 0 && summary.errors == 0 {
                (Level::Info, "No changes made in synchronization.".to_string())
            } else {
                let level = if summary.errors > 0 {
                    Level::Warning
                } else {
                    Level::Info
                };
                (
                    level,
                    format!("Synchronization completed: {summary} in {duration_ms}ms"),
                )
            };
            let mut e = LogEntry::new(EventType::TickComplete, level, message);
            e.tick = Some(*tick);
            e.counts = Some(*summary);
            e.duration_ms = Some(*duration_ms);
            e
        }
        LogEvent::ServiceStopped {
            reason,
            uptime_secs,
            ticks,
        } => LogEntry::new(
            EventType::ServiceStop,
            Level::Info,
            format!("Stopping replsync ({reason}) after {ticks} ticks, uptime {uptime_secs}s"),
        ),
    }
}

fn action_to_log_entry(action: &SyncAction) -> LogEntry {
    let path = action.path.display().to_string();
    let (event, level, verb) = match action.kind {
        ActionKind::Create => (EventType::Create, Level::Info, "Created"),
        ActionKind::Update => (EventType::Update, Level::Info, "Updated"),
        ActionKind::Delete => (EventType::Delete, Level::Info, "Deleted"),
        ActionKind::Error => (EventType::Error, Level::Error, "Failed"),
    };

    let message = match &action.detail {
        Some(detail) if action.kind == ActionKind::Error => format!("{verb} {path}: {detail}"),
        Some(detail) => format!("{verb} {path} ({detail})"),
        None => format!("{verb} {path}"),
    };

    let mut e = LogEntry::new(event, level, message);
    e.error_code = action.detail.as_deref().and_then(error_code_of);
    e.path = Some(path);
    e.detail.clone_from(&action.detail);
    e
}

/// Extract `RSY-NNNN` from a rendered error message.
fn error_code_of(detail: &str) -> Option<String> {
    let start = detail.find("[RSY-")?;
    let rest = &detail[start + 1..];
    let end = rest.find(']')?;
    Some(rest[..end].to_string())
}

// ──────────────────── durable sink ────────────────────

/// File-backed sink with optional console echo.
///
/// The echo is best-effort: the first failed console write (closed pipe,
/// full disk behind a redirect) turns it off for the rest of the run.
pub struct ActionLogger {
    writer: LogWriter,
    console: Option<Box<dyn Write + Send>>,
}

impl ActionLogger {
    pub fn open(config: LogWriterConfig, console: bool) -> Self {
        let logger = Self {
            writer: LogWriter::open(config),
            console: None,
        };
        if console {
            logger.with_console(Box::new(io::stdout()))
        } else {
            logger
        }
    }

    /// Echo every line to `out` instead of stdout.
    #[must_use]
    pub fn with_console(mut self, out: Box<dyn Write + Send>) -> Self {
        self.console = Some(out);
        self
    }

    pub const fn writer_state(&self) -> WriterState {
        self.writer.state()
    }

    #[cfg(test)]
    const fn console_enabled(&self) -> bool {
        self.console.is_some()
    }

    fn echo(&mut self, entry: &LogEntry) {
        let Some(out) = self.console.as_mut() else {
            return;
        };
        let line = format!(
            "{} - {} - {}",
            entry.ts.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            entry.level.label(),
            entry.message
        );
        #[cfg(feature = "cli")]
        let written = {
            use colored::Colorize;
            match entry.level {
                Level::Info => writeln!(out, "{line}"),
                Level::Warning => writeln!(out, "{}", line.yellow()),
                Level::Error => writeln!(out, "{}", line.red()),
            }
        };
        #[cfg(not(feature = "cli"))]
        let written = writeln!(out, "{line}");

        if let Err(e) = written.and_then(|()| out.flush()) {
            self.console = None;
            let _ = writeln!(io::stderr(), "[RSY-LOG] console echo disabled: {e}");
        }
    }
}

impl ActionSink for ActionLogger {
    fn event(&mut self, event: LogEvent) {
        let entry = event_to_log_entry(&event);
        self.writer.write_entry(&entry);
        self.echo(&entry);
    }

    fn flush(&mut self) {
        self.writer.try_recover();
        self.writer.flush();
    }
}

impl Drop for ActionLogger {
    fn drop(&mut self) {
        self.writer.flush();
        self.writer.fsync();
    }
}

// ──────────────────── in-memory sink ────────────────────

/// Cloneable in-memory sink; all clones share one event list.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LogEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event so far.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// Only the reconciliation decisions, in order.
    pub fn actions(&self) -> Vec<SyncAction> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                LogEvent::Action(action) => Some(action.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ActionSink for MemorySink {
    fn event(&mut self, event: LogEvent) {
        self.events.lock().push(event);
    }
}
