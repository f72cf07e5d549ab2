//! RSY-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Top-level error type for replica_sync.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("[RSY-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[RSY-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[RSY-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[RSY-2001] source unavailable at {path}: {details}")]
    SourceUnavailable { path: PathBuf, details: String },

    #[error("[RSY-2002] replica unavailable at {path}: {details}")]
    ReplicaUnavailable { path: PathBuf, details: String },

    #[error("[RSY-2003] unsupported entry {path}: {details}")]
    UnsupportedEntry { path: PathBuf, details: String },

    #[error("[RSY-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[RSY-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[RSY-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[RSY-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SyncError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "RSY-1001",
            Self::MissingConfig { .. } => "RSY-1002",
            Self::ConfigParse { .. } => "RSY-1003",
            Self::SourceUnavailable { .. } => "RSY-2001",
            Self::ReplicaUnavailable { .. } => "RSY-2002",
            Self::UnsupportedEntry { .. } => "RSY-2003",
            Self::Serialization { .. } => "RSY-2101",
            Self::PermissionDenied { .. } => "RSY-3001",
            Self::Io { .. } => "RSY-3002",
            Self::Runtime { .. } => "RSY-3900",
        }
    }

    /// Whether the next tick might succeed where this one failed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. }
                | Self::ReplicaUnavailable { .. }
                | Self::Io { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether this error must stop the process before the loop starts.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::MissingConfig { .. } | Self::ConfigParse { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    ///
    /// `PermissionDenied` gets its own variant so logs can tell access
    /// problems apart from device errors.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == ErrorKind::PermissionDenied {
            Self::PermissionDenied { path }
        } else {
            Self::Io { path, source }
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
