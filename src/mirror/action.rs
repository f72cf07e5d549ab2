//! Sync decisions and per-tick reports.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::SyncError;

/// What a single reconciliation decision did to the replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Entry did not exist in the replica and was created.
    Create,
    /// Entry existed in the replica and was overwritten or replaced.
    Update,
    /// Entry existed only in the replica and was removed.
    Delete,
    /// Entry could not be reconciled; the tick moved on.
    Error,
}

impl ActionKind {
    /// Lowercase label used in log lines.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One reconciliation decision, relative to the tree roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAction {
    pub kind: ActionKind,
    /// Path relative to the source/replica root. The roots themselves are `.`.
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SyncAction {
    pub fn new(kind: ActionKind, path: impl Into<PathBuf>, detail: Option<String>) -> Self {
        Self {
            kind,
            path: display_root(path.into()),
            detail,
        }
    }

    pub fn create(path: impl Into<PathBuf>) -> Self {
        Self::new(ActionKind::Create, path, None)
    }

    pub fn update(path: impl Into<PathBuf>) -> Self {
        Self::new(ActionKind::Update, path, None)
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self::new(ActionKind::Delete, path, None)
    }

    /// Error action carrying the error's code and message.
    pub fn error(path: impl Into<PathBuf>, err: &SyncError) -> Self {
        Self::new(ActionKind::Error, path, Some(err.to_string()))
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Whether this action concerns `path` exactly.
    pub fn is_for(&self, path: impl AsRef<Path>) -> bool {
        self.path == path.as_ref()
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.path.display())?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

fn display_root(path: PathBuf) -> PathBuf {
    if path.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        path
    }
}

/// Per-kind action counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub errors: usize,
}

impl TickSummary {
    pub fn from_actions(actions: &[SyncAction]) -> Self {
        let mut summary = Self::default();
        for action in actions {
            match action.kind {
                ActionKind::Create => summary.created += 1,
                ActionKind::Update => summary.updated += 1,
                ActionKind::Delete => summary.deleted += 1,
                ActionKind::Error => summary.errors += 1,
            }
        }
        summary
    }

    /// Number of Create/Update/Delete actions.
    pub const fn changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

impl fmt::Display for TickSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} errors",
            self.created, self.updated, self.deleted, self.errors
        )
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub started: DateTime<Utc>,
    pub duration: Duration,
    /// Actions in the order they were produced.
    pub actions: Vec<SyncAction>,
    /// True when the tick stopped early (source or replica root unusable).
    pub aborted: bool,
}

impl TickReport {
    /// Report for a tick that failed before touching any entry.
    pub fn failed(started: DateTime<Utc>, duration: Duration, err: &SyncError) -> Self {
        Self {
            started,
            duration,
            actions: vec![SyncAction::error(".", err)],
            aborted: true,
        }
    }

    pub fn summary(&self) -> TickSummary {
        TickSummary::from_actions(&self.actions)
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    /// No changes and no errors.
    pub fn is_clean(&self) -> bool {
        self.actions.is_empty()
    }
}
