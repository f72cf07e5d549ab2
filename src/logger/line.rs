//! Append-only action log writer: one line per entry, text or JSON.
//!
//! Lines are assembled in memory and written with a single `write_all` so a
//! reader tailing the file never sees a partial line.
//!
//! Four-level fallback chain:
//! 1. Primary file path
//! 2. Fallback path (e.g. on another filesystem)
//! 3. stderr with `[RSY-LOG]` prefix
//! 4. Silent discard (synchronization must never stop for logging failures)

#![allow(missing_docs)]

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SyncError};
use crate::mirror::action::TickSummary;

/// On-disk layout of each log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `YYYY-MM-DD HH:MM:SS - LEVEL - message`, local time.
    #[default]
    Text,
    /// One self-contained JSON object per line, UTC timestamps.
    Jsonl,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "jsonl" | "json" => Ok(Self::Jsonl),
            other => Err(format!("unknown log format {other:?} (expected text|jsonl)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Jsonl => "jsonl",
        })
    }
}

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl Level {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// What a log line is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ServiceStart,
    ServiceStop,
    TickStart,
    TickComplete,
    Create,
    Update,
    Delete,
    Error,
}

/// A single log line before rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub level: Level,
    pub event: EventType,
    /// Human-readable message; the whole text-format payload.
    pub message: String,
    /// Path relative to the tree roots (action events only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// RSY error code for failed actions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<TickSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, level: Level, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            level,
            event,
            message: message.into(),
            path: None,
            detail: None,
            error_code: None,
            tick: None,
            counts: None,
            duration_ms: None,
        }
    }

    /// Render as a single line including the trailing newline.
    pub fn render(&self, format: LogFormat) -> Result<String> {
        match format {
            LogFormat::Text => Ok(format!(
                "{} - {} - {}\n",
                self.ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                self.level.label(),
                single_line(&self.message)
            )),
            LogFormat::Jsonl => Ok(format!("{}\n", serde_json::to_string(self)?)),
        }
    }
}

/// Paths can legally contain newlines; keep one entry per line.
fn single_line(message: &str) -> std::borrow::Cow<'_, str> {
    if message.contains(['\n', '\r']) {
        std::borrow::Cow::Owned(message.replace('\n', "\\n").replace('\r', "\\r"))
    } else {
        std::borrow::Cow::Borrowed(message)
    }
}

/// Degradation state of the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Writing to primary path.
    Normal,
    /// Primary failed, writing to fallback path.
    Fallback,
    /// Both files failed, writing to stderr.
    Stderr,
    /// Everything failed, silently discarding.
    Discard,
}

impl WriterState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Fallback => "fallback",
            Self::Stderr => "stderr",
            Self::Discard => "discard",
        }
    }
}

/// Configuration for the log writer.
#[derive(Debug, Clone)]
pub struct LogWriterConfig {
    /// Primary log file path.
    pub path: PathBuf,
    /// Optional fallback path.
    pub fallback_path: Option<PathBuf>,
    pub format: LogFormat,
    /// Maximum file size before rotation (bytes). Default: 50 MiB.
    pub max_size_bytes: u64,
    /// Number of rotated files to keep. Default: 5.
    pub max_rotated_files: u32,
    /// Seconds between forced fsync calls. Default: 10.
    pub fsync_interval_secs: u64,
}

impl LogWriterConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for LogWriterConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("replsync.log"),
            fallback_path: None,
            format: LogFormat::Text,
            max_size_bytes: 50 * 1024 * 1024,
            max_rotated_files: 5,
            fsync_interval_secs: 10,
        }
    }
}

/// Where lines currently go.
enum Target {
    File {
        stream: BufWriter<File>,
        path: PathBuf,
        is_fallback: bool,
    },
    Stderr,
    Discard,
}

/// Append-only log writer with rotation and multi-level fallback.
pub struct LogWriter {
    config: LogWriterConfig,
    target: Target,
    /// Size of the file behind `target`, including what was there before opening.
    file_len: u64,
    last_sync: Instant,
}

impl LogWriter {
    /// Open the log file. Falls through the degradation chain on failure.
    pub fn open(config: LogWriterConfig) -> Self {
        let mut writer = Self {
            config,
            target: Target::Discard,
            file_len: 0,
            last_sync: Instant::now(),
        };
        let primary = writer.config.path.clone();
        if let Err(e) = writer.attach(&primary, false) {
            let _ = writeln!(io::stderr(), "[RSY-LOG] cannot open log file: {e}");
            writer.fall_back();
        }
        writer
    }

    /// Write a single entry as one line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match entry.render(self.config.format) {
            Ok(line) => self.write_line(&line),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[RSY-LOG] render error: {e}");
            }
        }
    }

    /// Flush buffers.
    pub fn flush(&mut self) {
        if let Target::File { stream, .. } = &mut self.target
            && stream.flush().is_err()
        {
            self.degrade();
        }
    }

    /// Force an fsync on the underlying file.
    pub fn fsync(&mut self) {
        if let Target::File { stream, .. } = &mut self.target {
            let _ = stream.flush();
            let _ = stream.get_ref().sync_data();
        }
        self.last_sync = Instant::now();
    }

    pub const fn state(&self) -> WriterState {
        match &self.target {
            Target::File {
                is_fallback: false,
                ..
            } => WriterState::Normal,
            Target::File { .. } => WriterState::Fallback,
            Target::Stderr => WriterState::Stderr,
            Target::Discard => WriterState::Discard,
        }
    }

    pub const fn format(&self) -> LogFormat {
        self.config.format
    }

    /// Number of bytes in the current file.
    pub const fn bytes_written(&self) -> u64 {
        self.file_len
    }

    /// Reopen the primary path after a degradation. No-op when healthy.
    pub fn try_recover(&mut self) {
        if self.state() == WriterState::Normal {
            return;
        }
        let primary = self.config.path.clone();
        if self.attach(&primary, false).is_ok() {
            let _ = writeln!(
                io::stderr(),
                "[RSY-LOG] recovered to primary path: {}",
                primary.display()
            );
        }
    }

    // ──────────────────────── internals ────────────────────────

    /// Switch output to `path`, flushing whatever was open before.
    fn attach(&mut self, path: &Path, is_fallback: bool) -> Result<()> {
        let (file, len) = open_append(path)?;
        if let Target::File { stream, .. } = &mut self.target {
            let _ = stream.flush();
        }
        self.target = Target::File {
            stream: BufWriter::with_capacity(64 * 1024, file),
            path: path.to_path_buf(),
            is_fallback,
        };
        self.file_len = len;
        Ok(())
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if matches!(self.target, Target::File { .. })
            && self.file_len > 0
            && self.file_len + len > self.config.max_size_bytes
        {
            self.rotate();
        }

        loop {
            match &mut self.target {
                Target::File { stream, .. } => {
                    if stream.write_all(line.as_bytes()).is_ok() {
                        self.file_len += len;
                        if self.last_sync.elapsed().as_secs() >= self.config.fsync_interval_secs {
                            self.fsync();
                        }
                        return;
                    }
                    self.degrade();
                }
                Target::Stderr => {
                    if write!(io::stderr(), "[RSY-LOG] {line}").is_err() {
                        self.degrade();
                    }
                    return;
                }
                Target::Discard => return,
            }
        }
    }

    /// Primary unusable: try the fallback file, else stderr.
    fn fall_back(&mut self) {
        let Some(fallback) = self.config.fallback_path.clone() else {
            self.target = Target::Stderr;
            let _ = writeln!(
                io::stderr(),
                "[RSY-LOG] primary path failed and no fallback configured, using stderr"
            );
            return;
        };
        match self.attach(&fallback, true) {
            Ok(()) => {
                let _ = writeln!(
                    io::stderr(),
                    "[RSY-LOG] primary path failed, using fallback: {}",
                    fallback.display()
                );
            }
            Err(_) => {
                self.target = Target::Stderr;
                let _ = writeln!(
                    io::stderr(),
                    "[RSY-LOG] both primary and fallback paths failed, using stderr"
                );
            }
        }
    }

    /// Move one step down the chain.
    fn degrade(&mut self) {
        match std::mem::replace(&mut self.target, Target::Discard) {
            Target::File {
                is_fallback: false,
                ..
            } => self.fall_back(),
            Target::File { .. } => {
                self.target = Target::Stderr;
                let _ = writeln!(io::stderr(), "[RSY-LOG] fallback write failed, using stderr");
            }
            Target::Stderr | Target::Discard => {}
        }
    }

    fn rotate(&mut self) {
        let Target::File {
            stream,
            path,
            is_fallback,
        } = &mut self.target
        else {
            return;
        };
        let _ = stream.flush();
        let (base, is_fallback) = (path.clone(), *is_fallback);

        // .N-1 -> .N, ..., .1 -> .2, current -> .1; the oldest falls off.
        let keep = self.config.max_rotated_files;
        let _ = fs::remove_file(rotated_name(&base, keep));
        for i in (1..keep).rev() {
            let _ = fs::rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = fs::rename(&base, rotated_name(&base, 1));

        if self.attach(&base, is_fallback).is_err() {
            self.degrade();
        }
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        if let Target::File { stream, .. } = &mut self.target {
            let _ = stream.flush();
        }
    }
}

// ──────────────────────── helpers ────────────────────────

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| SyncError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| SyncError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// Build a rotated filename: `sync.log` → `sync.log.3`.
pub fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

// ──────────────────────── tests ────────────────────────
