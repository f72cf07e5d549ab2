//! Configuration system: TOML file + env var overrides + CLI overrides + validation.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SyncError};
use crate::core::paths::{is_within, strip_trailing_separator, trees_overlap};
use crate::logger::line::{LogFormat, LogWriterConfig};
use crate::mirror::comparator::CompareMode;
use crate::mirror::reconcile::{ReconcileOptions, SpecialFilePolicy, SymlinkPolicy};

/// Full replsync configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
    /// File this config was loaded from (informational).
    #[serde(skip)]
    pub config_file: PathBuf,
}

/// What to mirror and how.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub source: Option<PathBuf>,
    pub replica: Option<PathBuf>,
    /// Delay between the end of one tick and the start of the next. Fractions allowed.
    pub interval_secs: f64,
    pub compare: CompareMode,
    pub symlinks: SymlinkPolicy,
    pub special_files: SpecialFilePolicy,
    pub dry_run: bool,
}

/// Action log destination and rotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub file: PathBuf,
    pub fallback_file: Option<PathBuf>,
    pub format: LogFormat,
    /// Echo every log line to stdout.
    pub console: bool,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source: None,
            replica: None,
            interval_secs: 60.0,
            compare: CompareMode::default(),
            symlinks: SymlinkPolicy::default(),
            special_files: SpecialFilePolicy::default(),
            dry_run: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: home_dir().join(".local/share/replsync/replsync.log"),
            fallback_file: None,
            format: LogFormat::default(),
            console: true,
            max_size_bytes: 50 * 1024 * 1024,
            max_rotated_files: 5,
            fsync_interval_secs: 10,
        }
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        home_dir().join(".config/replsync/config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    /// No value checks happen here: CLI arguments may still replace any of
    /// them, so everything is validated in [`prepare`](Self::prepare).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, env_var)
    }

    /// [`load`](Self::load) with environment variables read through `lookup`.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw =
                fs::read_to_string(&path_buf).map_err(|source| SyncError::io(&path_buf, source))?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(SyncError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.config_file = path_buf;
        cfg.apply_env_overrides_from(lookup)?;
        Ok(cfg)
    }

    /// Normalize paths, then run every check including the filesystem ones.
    /// Call once all overrides are applied.
    pub fn prepare(&mut self) -> Result<()> {
        self.normalize_paths();
        self.validate()
    }

    /// Deterministic hash of the effective config for the service-start log line.
    ///
    /// FNV-1a over canonical JSON, so the value is stable across processes and
    /// Rust releases.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Tick interval as a `Duration`.
    pub fn interval(&self) -> Result<Duration> {
        interval_from_secs(self.sync.interval_secs)
    }

    pub fn source(&self) -> Result<&Path> {
        required_path("sync.source", self.sync.source.as_deref())
    }

    pub fn replica(&self) -> Result<&Path> {
        required_path("sync.replica", self.sync.replica.as_deref())
    }

    pub const fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            compare: self.sync.compare,
            symlinks: self.sync.symlinks,
            special_files: self.sync.special_files,
            dry_run: self.sync.dry_run,
        }
    }

    pub fn log_writer_config(&self) -> LogWriterConfig {
        LogWriterConfig {
            path: self.logging.file.clone(),
            fallback_path: self.logging.fallback_file.clone(),
            format: self.logging.format,
            max_size_bytes: self.logging.max_size_bytes,
            max_rotated_files: self.logging.max_rotated_files,
            fsync_interval_secs: self.logging.fsync_interval_secs,
        }
    }

    /// Apply `REPLSYNC_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("REPLSYNC_SYNC_SOURCE") {
            self.sync.source = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("REPLSYNC_SYNC_REPLICA") {
            self.sync.replica = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("REPLSYNC_SYNC_INTERVAL_SECS") {
            self.sync.interval_secs = parse_env("REPLSYNC_SYNC_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("REPLSYNC_SYNC_COMPARE") {
            self.sync.compare = parse_env("REPLSYNC_SYNC_COMPARE", &raw)?;
        }
        if let Some(raw) = lookup("REPLSYNC_SYNC_SYMLINKS") {
            self.sync.symlinks = parse_env("REPLSYNC_SYNC_SYMLINKS", &raw)?;
        }
        if let Some(raw) = lookup("REPLSYNC_SYNC_SPECIAL_FILES") {
            self.sync.special_files = parse_env("REPLSYNC_SYNC_SPECIAL_FILES", &raw)?;
        }
        if let Some(raw) = lookup("REPLSYNC_SYNC_DRY_RUN") {
            self.sync.dry_run = parse_env("REPLSYNC_SYNC_DRY_RUN", &raw)?;
        }
        if let Some(raw) = lookup("REPLSYNC_LOGGING_FILE") {
            self.logging.file = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("REPLSYNC_LOGGING_FORMAT") {
            self.logging.format = parse_env("REPLSYNC_LOGGING_FORMAT", &raw)?;
        }
        if let Some(raw) = lookup("REPLSYNC_LOGGING_CONSOLE") {
            self.logging.console = parse_env("REPLSYNC_LOGGING_CONSOLE", &raw)?;
        }
        if let Some(raw) = lookup("REPLSYNC_LOGGING_MAX_SIZE_BYTES") {
            self.logging.max_size_bytes = parse_env("REPLSYNC_LOGGING_MAX_SIZE_BYTES", &raw)?;
        }
        Ok(())
    }

    fn normalize_paths(&mut self) {
        for path in [&mut self.sync.source, &mut self.sync.replica]
            .into_iter()
            .flatten()
        {
            *path = strip_trailing_separator(path);
        }
        self.logging.file = strip_trailing_separator(&self.logging.file);
    }

    /// Checks that need no filesystem access.
    fn validate_settings(&self) -> Result<()> {
        interval_from_secs(self.sync.interval_secs)?;
        if self.logging.max_size_bytes == 0 || self.logging.max_rotated_files == 0 {
            return Err(SyncError::InvalidConfig {
                details: "logging.max_size_bytes and logging.max_rotated_files must be > 0"
                    .to_string(),
            });
        }
        if self.logging.file.as_os_str().is_empty() {
            return Err(SyncError::InvalidConfig {
                details: "logging.file must not be empty".to_string(),
            });
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.validate_settings()?;
        let source = self.source()?;
        let replica = self.replica()?;

        match fs::metadata(source) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(SyncError::InvalidConfig {
                    details: format!("source {} is not a directory", source.display()),
                });
            }
            Err(err) => {
                return Err(SyncError::InvalidConfig {
                    details: format!("source {} is not accessible: {err}", source.display()),
                });
            }
        }

        if let Ok(meta) = fs::metadata(replica)
            && !meta.is_dir()
        {
            return Err(SyncError::InvalidConfig {
                details: format!("replica {} exists but is not a directory", replica.display()),
            });
        }

        if trees_overlap(source, replica) {
            return Err(SyncError::InvalidConfig {
                details: format!(
                    "source {} and replica {} must not be the same directory or nested",
                    source.display(),
                    replica.display()
                ),
            });
        }

        let log = &self.logging.file;
        for (name, root) in [("source", source), ("replica", replica)] {
            if is_within(log, root) {
                return Err(SyncError::InvalidConfig {
                    details: format!(
                        "log file {} must not live inside the {name} tree",
                        log.display()
                    ),
                });
            }
        }
        if fs::metadata(log).is_ok_and(|meta| meta.is_dir()) {
            return Err(SyncError::InvalidConfig {
                details: format!("log file {} is a directory", log.display()),
            });
        }

        Ok(())
    }
}

/// Convert seconds to a `Duration`, rejecting zero, negative, NaN and infinite values.
pub fn interval_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(SyncError::InvalidConfig {
            details: format!("sync.interval_secs must be a positive, finite number; got {secs}"),
        });
    }
    Duration::try_from_secs_f64(secs).map_err(|e| SyncError::InvalidConfig {
        details: format!("sync.interval_secs {secs} is out of range: {e}"),
    })
}

fn required_path<'a>(name: &str, path: Option<&'a Path>) -> Result<&'a Path> {
    match path {
        Some(p) if !p.as_os_str().is_empty() => Ok(p),
        _ => Err(SyncError::InvalidConfig {
            details: format!("{name} is required"),
        }),
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| SyncError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
