//! Tree reconciler: makes a replica mirror its source in one pass.
//!
//! Pass structure, per call:
//! 1. Check roots. An unusable source aborts the tick before the replica is
//!    touched; a replica that cannot be created or is not a directory aborts
//!    it too.
//! 2. Forward pass over a snapshot of the source: create directories, copy
//!    new or stale files, recreate symbolic links.
//! 3. Reverse pass over the live replica: remove every entry whose source
//!    counterpart is definitely gone (one removal per top-level orphan).
//!
//! Every per-entry failure becomes an `Error` action and the pass continues.
//! The reconciler keeps no state between calls.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use chrono::Utc;
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::core::errors::{Result, SyncError};
use crate::core::paths::trees_overlap;
use crate::mirror::action::{SyncAction, TickReport};
use crate::mirror::comparator::{CompareMode, Comparator};
use crate::mirror::walker::{EntryKind, FileEntry, TreeSnapshot, list_dir};

const STAGING_SUFFIX: &str = ".replsync-tmp";

// ──────────────────── policies ────────────────────

/// What to do with symbolic links found in the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum SymlinkPolicy {
    /// Recreate the link (same target) in the replica; never follow it.
    #[default]
    Copy,
    /// Leave the link out and report it as an error.
    Skip,
}

/// What to do with sockets, FIFOs and device nodes found in the source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum SpecialFilePolicy {
    /// Skip the entry and report it as an error.
    #[default]
    Report,
    /// Skip the entry silently.
    Ignore,
}

impl FromStr for SymlinkPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "copy" => Ok(Self::Copy),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown symlink policy {other:?} (expected copy|skip)")),
        }
    }
}

impl FromStr for SpecialFilePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "report" => Ok(Self::Report),
            "ignore" => Ok(Self::Ignore),
            other => Err(format!(
                "unknown special-file policy {other:?} (expected report|ignore)"
            )),
        }
    }
}

impl fmt::Display for SymlinkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Copy => "copy",
            Self::Skip => "skip",
        })
    }
}

impl fmt::Display for SpecialFilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Report => "report",
            Self::Ignore => "ignore",
        })
    }
}

/// Knobs for one reconciler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub compare: CompareMode,
    pub symlinks: SymlinkPolicy,
    pub special_files: SpecialFilePolicy,
    /// Report decisions without touching the replica.
    pub dry_run: bool,
}

// ──────────────────── reconciler ────────────────────

/// Stateless reconciler; each [`reconcile`](Self::reconcile) call starts fresh.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    options: ReconcileOptions,
    comparator: Comparator,
}

impl Reconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self {
            options,
            comparator: Comparator::new(options.compare),
        }
    }

    pub const fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Run one full pass and return every decision in production order.
    pub fn reconcile(&self, source_root: &Path, replica_root: &Path) -> TickReport {
        let started = Utc::now();
        let clock = Instant::now();

        let mut pass = Pass {
            reconciler: self,
            source_root,
            replica_root,
            actions: Vec::new(),
            absent_dirs: HashSet::new(),
            skipped_dirs: HashSet::new(),
        };
        let aborted = match pass.run() {
            Ok(()) => false,
            Err(err) => {
                let mut action = SyncAction::error("", &err);
                if err.is_retryable() {
                    action = action.with_detail(format!("{err} (retrying next tick)"));
                }
                pass.actions.push(action);
                true
            }
        };

        TickReport {
            started,
            duration: clock.elapsed(),
            actions: pass.actions,
            aborted,
        }
    }
}

/// Reconcile with default options and return just the actions.
pub fn reconcile(source_root: &Path, replica_root: &Path) -> Vec<SyncAction> {
    Reconciler::default()
        .reconcile(source_root, replica_root)
        .actions
}

// ──────────────────── one pass ────────────────────

struct Pass<'a> {
    reconciler: &'a Reconciler,
    source_root: &'a Path,
    replica_root: &'a Path,
    actions: Vec<SyncAction>,
    /// Replica directories that do not exist yet (dry-run only); everything
    /// below them reads as absent.
    absent_dirs: HashSet<PathBuf>,
    /// Directories whose subtree is left alone for the rest of the pass:
    /// unreadable in the source, or impossible to create in the replica.
    skipped_dirs: HashSet<PathBuf>,
}

impl Pass<'_> {
    fn run(&mut self) -> Result<()> {
        let snapshot = self.capture_source()?;
        self.ensure_replica_root()?;
        self.forward(&snapshot);
        self.reverse()
    }

    const fn dry_run(&self) -> bool {
        self.reconciler.options.dry_run
    }

    // ──────── roots ────────

    fn capture_source(&self) -> Result<TreeSnapshot> {
        let root = self.source_root;
        let unavailable = |details: String| SyncError::SourceUnavailable {
            path: root.to_path_buf(),
            details,
        };

        let meta = fs::metadata(root).map_err(|e| unavailable(e.to_string()))?;
        if !meta.is_dir() {
            return Err(unavailable("not a directory".to_string()));
        }
        TreeSnapshot::capture(root).map_err(|e| unavailable(e.to_string()))
    }

    fn ensure_replica_root(&mut self) -> Result<()> {
        let root = self.replica_root;
        let unavailable = |details: String| SyncError::ReplicaUnavailable {
            path: root.to_path_buf(),
            details,
        };

        if trees_overlap(self.source_root, root) {
            return Err(unavailable(format!(
                "overlaps source tree {}",
                self.source_root.display()
            )));
        }

        match fs::metadata(root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(unavailable("not a directory".to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if self.dry_run() {
                    self.absent_dirs.insert(PathBuf::new());
                } else {
                    fs::create_dir_all(root).map_err(|e| unavailable(e.to_string()))?;
                }
                self.actions.push(SyncAction::create(""));
                Ok(())
            }
            Err(err) => Err(unavailable(err.to_string())),
        }
    }

    // ──────── forward pass ────────

    fn forward(&mut self, snapshot: &TreeSnapshot) {
        for entry in &snapshot.entries {
            if self.under_skipped(&entry.rel_path) {
                continue;
            }

            match entry.kind {
                EntryKind::Dir => self.sync_dir(entry),
                EntryKind::File => {
                    let outcome = self.sync_file(&entry.rel_path);
                    self.push_outcome(&entry.rel_path, outcome);
                }
                EntryKind::Symlink => self.sync_symlink(&entry.rel_path),
                EntryKind::Other => self.sync_special(&entry.rel_path),
            }

            if let Some(err) = snapshot.unreadable.get(&entry.rel_path) {
                self.skipped_dirs.insert(entry.rel_path.clone());
                let err = SyncError::io(
                    self.source_root.join(&entry.rel_path),
                    io::Error::new(err.kind(), err.to_string()),
                );
                self.actions.push(
                    SyncAction::error(&entry.rel_path, &err)
                        .with_detail(format!("{err} (subtree left untouched)")),
                );
            }
        }
    }

    fn sync_dir(&mut self, entry: &FileEntry) {
        let rel = &entry.rel_path;
        let dest = self.replica_root.join(rel);

        let outcome = match self.replica_meta(rel) {
            Err(err) => Err(SyncError::io(&dest, err)),
            Ok(Some(meta)) if meta.is_dir() => Ok(None),
            Ok(None) => self
                .create_dir(rel, &dest)
                .map(|()| Some(SyncAction::create(rel))),
            Ok(Some(meta)) => self
                .clear(&dest, &meta)
                .and_then(|()| self.create_dir(rel, &dest))
                .map(|()| {
                    Some(SyncAction::update(rel).with_detail(format!(
                        "replaced {} with directory",
                        EntryKind::from_file_type(meta.file_type()).label()
                    )))
                }),
        };

        if outcome.is_err() {
            self.skipped_dirs.insert(rel.clone());
        }
        self.push_outcome(rel, outcome);
    }

    fn sync_file(&self, rel: &Path) -> Result<Option<SyncAction>> {
        let src = self.source_root.join(rel);
        let dest = self.replica_root.join(rel);

        match self.replica_meta(rel).map_err(|e| SyncError::io(&dest, e))? {
            None => {
                self.copy_file(&src, &dest)?;
                Ok(Some(SyncAction::create(rel)))
            }
            Some(meta) if meta.is_file() => {
                if !self.reconciler.comparator.needs_copy(&src, &dest) {
                    return Ok(None);
                }
                self.copy_file(&src, &dest)?;
                Ok(Some(SyncAction::update(rel)))
            }
            Some(meta) => {
                self.clear(&dest, &meta)?;
                self.copy_file(&src, &dest)?;
                Ok(Some(SyncAction::update(rel).with_detail(format!(
                    "replaced {} with file",
                    EntryKind::from_file_type(meta.file_type()).label()
                ))))
            }
        }
    }

    fn sync_symlink(&mut self, rel: &Path) {
        match self.reconciler.options.symlinks {
            SymlinkPolicy::Skip => {
                let err = SyncError::UnsupportedEntry {
                    path: self.source_root.join(rel),
                    details: "symbolic link skipped by policy".to_string(),
                };
                self.actions.push(SyncAction::error(rel, &err));
            }
            SymlinkPolicy::Copy => {
                let outcome = self.copy_symlink(rel);
                self.push_outcome(rel, outcome);
            }
        }
    }

    #[cfg(unix)]
    fn copy_symlink(&self, rel: &Path) -> Result<Option<SyncAction>> {
        let src = self.source_root.join(rel);
        let dest = self.replica_root.join(rel);
        let target = fs::read_link(&src).map_err(|e| SyncError::io(&src, e))?;

        match self.replica_meta(rel).map_err(|e| SyncError::io(&dest, e))? {
            None => {
                self.make_symlink(&target, &dest)?;
                Ok(Some(SyncAction::create(rel)))
            }
            Some(meta)
                if meta.file_type().is_symlink()
                    && fs::read_link(&dest).is_ok_and(|current| current == target) =>
            {
                Ok(None)
            }
            Some(meta) => {
                self.clear(&dest, &meta)?;
                self.make_symlink(&target, &dest)?;
                Ok(Some(SyncAction::update(rel)))
            }
        }
    }

    #[cfg(not(unix))]
    fn copy_symlink(&self, rel: &Path) -> Result<Option<SyncAction>> {
        Err(SyncError::UnsupportedEntry {
            path: self.source_root.join(rel),
            details: "symbolic links are not supported on this platform".to_string(),
        })
    }

    fn sync_special(&mut self, rel: &Path) {
        if self.reconciler.options.special_files == SpecialFilePolicy::Ignore {
            return;
        }
        let err = SyncError::UnsupportedEntry {
            path: self.source_root.join(rel),
            details: "special file (socket, FIFO or device) skipped".to_string(),
        };
        self.actions.push(SyncAction::error(rel, &err));
    }

    // ──────── reverse pass ────────

    fn reverse(&mut self) -> Result<()> {
        if self.absent_dirs.contains(Path::new("")) {
            return Ok(());
        }

        let mut stack = vec![PathBuf::new()];
        while let Some(rel_dir) = stack.pop() {
            self.ensure_source_still_present()?;

            let children = match list_dir(self.replica_root, &rel_dir) {
                Ok(children) => children,
                Err(err) => {
                    let err = SyncError::io(self.replica_root.join(&rel_dir), err);
                    self.actions.push(SyncAction::error(&rel_dir, &err));
                    continue;
                }
            };

            let mut descend = Vec::new();
            for entry in children {
                match fs::symlink_metadata(self.source_root.join(&entry.rel_path)) {
                    Ok(src_meta) => {
                        if entry.is_dir()
                            && src_meta.is_dir()
                            && !self.skipped_dirs.contains(&entry.rel_path)
                        {
                            descend.push(entry.rel_path);
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        self.remove_orphan(&entry);
                    }
                    // Source state unknown: keep the replica entry.
                    Err(_) => {}
                }
            }

            descend.reverse();
            stack.extend(descend);
        }
        Ok(())
    }

    /// A source root that vanished mid-pass would make every replica entry
    /// look orphaned.
    fn ensure_source_still_present(&self) -> Result<()> {
        match fs::metadata(self.source_root) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(SyncError::SourceUnavailable {
                path: self.source_root.to_path_buf(),
                details: "no longer a directory; deletion pass stopped".to_string(),
            }),
            Err(err) => Err(SyncError::SourceUnavailable {
                path: self.source_root.to_path_buf(),
                details: format!("{err}; deletion pass stopped"),
            }),
        }
    }

    fn remove_orphan(&mut self, entry: &FileEntry) {
        let path = self.replica_root.join(&entry.rel_path);
        let result = if self.dry_run() {
            Ok(())
        } else if entry.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };

        match result {
            Ok(()) => {
                let mut action = SyncAction::delete(&entry.rel_path);
                if entry.is_dir() {
                    action = action.with_detail("directory and contents");
                }
                self.actions.push(action);
            }
            Err(err) => {
                let err = SyncError::io(&path, err);
                self.actions.push(SyncAction::error(&entry.rel_path, &err));
            }
        }
    }

    // ──────── filesystem helpers ────────

    /// Replica metadata for `rel` without following links; `None` if absent.
    fn replica_meta(&self, rel: &Path) -> io::Result<Option<fs::Metadata>> {
        if self.under_absent(rel) {
            return Ok(None);
        }
        match fs::symlink_metadata(self.replica_root.join(rel)) {
            Ok(meta) => Ok(Some(meta)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn under_absent(&self, rel: &Path) -> bool {
        rel.ancestors()
            .skip(1)
            .any(|ancestor| self.absent_dirs.contains(ancestor))
    }

    fn under_skipped(&self, rel: &Path) -> bool {
        rel.ancestors()
            .skip(1)
            .any(|ancestor| self.skipped_dirs.contains(ancestor))
    }

    fn create_dir(&mut self, rel: &Path, dest: &Path) -> Result<()> {
        if self.dry_run() {
            self.absent_dirs.insert(rel.to_path_buf());
            return Ok(());
        }
        fs::create_dir_all(dest).map_err(|e| SyncError::io(dest, e))
    }

    /// Remove whatever occupies `dest` so an entry of another type can take its place.
    fn clear(&self, dest: &Path, meta: &fs::Metadata) -> Result<()> {
        if self.dry_run() {
            return Ok(());
        }
        if meta.is_dir() {
            fs::remove_dir_all(dest)
        } else {
            fs::remove_file(dest)
        }
        .map_err(|e| SyncError::io(dest, e))
    }

    /// Copy bytes into a uniquely named staging file next to `dest`, stamp it
    /// with the source's modification time and permissions, then rename it
    /// into place.
    ///
    /// The staging file is created exclusively, so it never clobbers a replica
    /// entry, and it is removed on any failure.
    fn copy_file(&self, src: &Path, dest: &Path) -> Result<()> {
        if self.dry_run() {
            return Ok(());
        }
        let staged = stage_copy(src, dest)?;
        staged
            .persist(dest)
            .map_err(|e| SyncError::io(dest, e.error))?;
        Ok(())
    }

    #[cfg(unix)]
    fn make_symlink(&self, target: &Path, dest: &Path) -> Result<()> {
        if self.dry_run() {
            return Ok(());
        }
        std::os::unix::fs::symlink(target, dest).map_err(|e| SyncError::io(dest, e))
    }

    fn push_outcome(&mut self, rel: &Path, outcome: Result<Option<SyncAction>>) {
        match outcome {
            Ok(Some(action)) => self.actions.push(action),
            Ok(None) => {}
            Err(err) => self.actions.push(SyncAction::error(rel, &err)),
        }
    }
}

fn stage_copy(src: &Path, dest: &Path) -> Result<NamedTempFile> {
    let mut reader = File::open(src).map_err(|e| SyncError::io(src, e))?;
    let source_meta = reader.metadata().map_err(|e| SyncError::io(src, e))?;

    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let name = dest
        .file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
    let mut staged = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(STAGING_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| SyncError::io(parent, e))?;

    io::copy(&mut reader, staged.as_file_mut()).map_err(|e| SyncError::io(staged.path(), e))?;
    filetime::set_file_handle_times(
        staged.as_file(),
        None,
        Some(FileTime::from_last_modification_time(&source_meta)),
    )
    .map_err(|e| SyncError::io(staged.path(), e))?;
    staged
        .as_file()
        .set_permissions(source_meta.permissions())
        .map_err(|e| SyncError::io(staged.path(), e))?;
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::action::ActionKind;
    use filetime::set_file_mtime;
    use tempfile::TempDir;

    struct Trees {
        _tmp: TempDir,
        source: PathBuf,
        replica: PathBuf,
    }

    fn trees() -> Trees {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("source");
        let replica = tmp.path().join("replica");
        fs::create_dir(&source).unwrap();
        fs::create_dir(&replica).unwrap();
        Trees {
            _tmp: tmp,
            source,
            replica,
        }
    }

    fn write_at(path: &Path, content: &str, secs: i64) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
        set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    fn mtime_secs(path: &Path) -> i64 {
        FileTime::from_last_modification_time(&fs::metadata(path).unwrap()).unix_seconds()
    }

    fn kinds(actions: &[SyncAction]) -> Vec<(ActionKind, String)> {
        actions
            .iter()
            .map(|a| (a.kind, a.path.to_string_lossy().into_owned()))
            .collect()
    }

    #[test]
    fn new_file_is_created_with_source_mtime() {
        let t = trees();
        write_at(&t.source.join("a.txt"), "hello", 100);

        let actions = reconcile(&t.source, &t.replica);

        assert_eq!(kinds(&actions), vec![(ActionKind::Create, "a.txt".into())]);
        assert_eq!(fs::read_to_string(t.replica.join("a.txt")).unwrap(), "hello");
        assert_eq!(mtime_secs(&t.replica.join("a.txt")), 100);
    }

    #[test]
    fn stale_file_is_updated() {
        let t = trees();
        write_at(&t.source.join("a.txt"), "new", 200);
        write_at(&t.replica.join("a.txt"), "old", 100);

        let actions = reconcile(&t.source, &t.replica);

        assert_eq!(kinds(&actions), vec![(ActionKind::Update, "a.txt".into())]);
        assert_eq!(fs::read_to_string(t.replica.join("a.txt")).unwrap(), "new");
        assert_eq!(mtime_secs(&t.replica.join("a.txt")), 200);
    }

    #[test]
    fn orphan_directory_is_deleted_once() {
        let t = trees();
        write_at(&t.replica.join("old/one.txt"), "1", 100);
        write_at(&t.replica.join("old/deep/two.txt"), "2", 100);

        let actions = reconcile(&t.source, &t.replica);

        assert_eq!(kinds(&actions), vec![(ActionKind::Delete, "old".into())]);
        assert!(!t.replica.join("old").exists());
    }

    #[test]
    fn missing_source_aborts_without_touching_replica() {
        let t = trees();
        write_at(&t.replica.join("keep.txt"), "k", 100);
        fs::remove_dir(&t.source).unwrap();

        let report = Reconciler::default().reconcile(&t.source, &t.replica);

        assert!(report.aborted);
        assert_eq!(report.actions.len(), 1);
        assert_eq!(report.actions[0].kind, ActionKind::Error);
        let detail = report.actions[0].detail.as_deref().unwrap();
        assert!(detail.starts_with("[RSY-2001]"));
        assert!(detail.ends_with("(retrying next tick)"));
        assert!(t.replica.join("keep.txt").exists());
    }

    #[test]
    fn missing_source_does_not_create_replica_root() {
        let t = trees();
        fs::remove_dir(&t.source).unwrap();
        fs::remove_dir(&t.replica).unwrap();

        let report = Reconciler::default().reconcile(&t.source, &t.replica);

        assert!(report.aborted);
        assert!(!t.replica.exists());
    }

    #[test]
    fn missing_replica_root_is_created() {
        let t = trees();
        fs::remove_dir(&t.replica).unwrap();
        write_at(&t.source.join("a.txt"), "a", 100);

        let actions = reconcile(&t.source, &t.replica);

        assert_eq!(
            kinds(&actions),
            vec![
                (ActionKind::Create, ".".into()),
                (ActionKind::Create, "a.txt".into())
            ]
        );
        assert!(t.replica.join("a.txt").is_file());
    }

    #[test]
    fn replica_root_that_is_a_file_aborts() {
        let t = trees();
        fs::remove_dir(&t.replica).unwrap();
        fs::write(&t.replica, "not a dir").unwrap();

        let report = Reconciler::default().reconcile(&t.source, &t.replica);

        assert!(report.aborted);
        assert!(report.actions[0].detail.as_deref().unwrap().contains("RSY-2002"));
    }

    #[test]
    fn nested_replica_is_refused() {
        let t = trees();
        let inner = t.source.join("mirror");

        let report = Reconciler::default().reconcile(&t.source, &inner);

        assert!(report.aborted);
        assert!(!inner.exists());
    }

    #[test]
    fn second_pass_is_idempotent() {
        let t = trees();
        write_at(&t.source.join("a.txt"), "a", 100);
        write_at(&t.source.join("dir/b.txt"), "b", 150);
        write_at(&t.replica.join("stray.txt"), "s", 100);

        let first = reconcile(&t.source, &t.replica);
        assert!(!first.is_empty());
        let second = reconcile(&t.source, &t.replica);
        assert!(second.is_empty(), "unexpected actions: {second:?}");
    }

    #[test]
    fn directories_are_created_before_their_files() {
        let t = trees();
        write_at(&t.source.join("x/y/z.txt"), "z", 100);

        let actions = reconcile(&t.source, &t.replica);

        assert_eq!(
            kinds(&actions),
            vec![
                (ActionKind::Create, "x".into()),
                (ActionKind::Create, "x/y".into()),
                (ActionKind::Create, "x/y/z.txt".into()),
            ]
        );
    }

    #[test]
    fn directory_in_place_of_file_is_replaced() {
        let t = trees();
        write_at(&t.source.join("thing"), "now a file", 100);
        write_at(&t.replica.join("thing/inner.txt"), "i", 100);

        let actions = reconcile(&t.source, &t.replica);

        assert_eq!(kinds(&actions), vec![(ActionKind::Update, "thing".into())]);
        assert_eq!(
            fs::read_to_string(t.replica.join("thing")).unwrap(),
            "now a file"
        );
    }

    #[test]
    fn file_in_place_of_directory_is_replaced() {
        let t = trees();
        write_at(&t.source.join("thing/inner.txt"), "i", 100);
        write_at(&t.replica.join("thing"), "was a file", 100);

        let actions = reconcile(&t.source, &t.replica);

        assert_eq!(
            kinds(&actions),
            vec![
                (ActionKind::Update, "thing".into()),
                (ActionKind::Create, "thing/inner.txt".into()),
            ]
        );
        assert!(t.replica.join("thing/inner.txt").is_file());
    }

    #[test]
    fn dry_run_reports_without_mutation() {
        let t = trees();
        write_at(&t.source.join("new/a.txt"), "a", 100);
        write_at(&t.source.join("b.txt"), "new", 200);
        write_at(&t.replica.join("b.txt"), "old", 100);
        write_at(&t.replica.join("gone.txt"), "g", 100);

        let reconciler = Reconciler::new(ReconcileOptions {
            dry_run: true,
            ..ReconcileOptions::default()
        });
        let report = reconciler.reconcile(&t.source, &t.replica);

        assert_eq!(
            kinds(&report.actions),
            vec![
                (ActionKind::Update, "b.txt".into()),
                (ActionKind::Create, "new".into()),
                (ActionKind::Create, "new/a.txt".into()),
                (ActionKind::Delete, "gone.txt".into()),
            ]
        );
        assert!(!t.replica.join("new").exists());
        assert_eq!(fs::read_to_string(t.replica.join("b.txt")).unwrap(), "old");
        assert!(t.replica.join("gone.txt").exists());
    }

    #[test]
    fn dry_run_with_missing_replica_root_reports_everything_as_create() {
        let t = trees();
        fs::remove_dir(&t.replica).unwrap();
        write_at(&t.source.join("a.txt"), "a", 100);

        let reconciler = Reconciler::new(ReconcileOptions {
            dry_run: true,
            ..ReconcileOptions::default()
        });
        let report = reconciler.reconcile(&t.source, &t.replica);

        assert_eq!(report.count(ActionKind::Create), 2);
        assert!(!t.replica.exists());
    }

    #[test]
    fn checksum_mode_recopies_equal_timestamp_edit() {
        let t = trees();
        write_at(&t.source.join("a.txt"), "edited", 100);
        write_at(&t.replica.join("a.txt"), "stale!", 100);

        assert!(reconcile(&t.source, &t.replica).is_empty());

        let reconciler = Reconciler::new(ReconcileOptions {
            compare: CompareMode::Checksum,
            ..ReconcileOptions::default()
        });
        let report = reconciler.reconcile(&t.source, &t.replica);
        assert_eq!(report.count(ActionKind::Update), 1);
        assert_eq!(fs::read_to_string(t.replica.join("a.txt")).unwrap(), "edited");
    }

    fn leftover_staging_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(STAGING_SUFFIX))
            .collect()
    }

    #[test]
    fn staging_file_does_not_survive_a_copy() {
        let t = trees();
        write_at(&t.source.join("a.txt"), "a", 100);
        reconcile(&t.source, &t.replica);
        assert!(leftover_staging_files(&t.replica).is_empty());
    }

    #[test]
    fn source_names_shaped_like_staging_files_are_mirrored() {
        let t = trees();
        write_at(&t.source.join(".x.replsync-tmp"), "lookalike", 100);
        write_at(&t.source.join("x"), "real", 100);

        let first = reconcile(&t.source, &t.replica);
        assert_eq!(
            kinds(&first),
            vec![
                (ActionKind::Create, ".x.replsync-tmp".to_string()),
                (ActionKind::Create, "x".to_string()),
            ]
        );
        assert_eq!(
            fs::read_to_string(t.replica.join(".x.replsync-tmp")).unwrap(),
            "lookalike"
        );
        assert_eq!(fs::read_to_string(t.replica.join("x")).unwrap(), "real");

        write_at(&t.source.join("x"), "edited", 200);
        let second = reconcile(&t.source, &t.replica);
        assert_eq!(kinds(&second), vec![(ActionKind::Update, "x".to_string())]);
        assert_eq!(
            fs::read_to_string(t.replica.join(".x.replsync-tmp")).unwrap(),
            "lookalike"
        );
        assert!(reconcile(&t.source, &t.replica).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn read_only_replica_file_is_still_updated() {
        use std::os::unix::fs::PermissionsExt;

        let t = trees();
        write_at(&t.source.join("ro.txt"), "v1", 100);
        fs::set_permissions(t.source.join("ro.txt"), fs::Permissions::from_mode(0o444)).unwrap();
        reconcile(&t.source, &t.replica);

        fs::set_permissions(t.source.join("ro.txt"), fs::Permissions::from_mode(0o644)).unwrap();
        write_at(&t.source.join("ro.txt"), "v2", 200);
        let actions = reconcile(&t.source, &t.replica);

        assert_eq!(kinds(&actions), vec![(ActionKind::Update, "ro.txt".into())]);
        assert_eq!(fs::read_to_string(t.replica.join("ro.txt")).unwrap(), "v2");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_is_copied_as_link_and_not_followed() {
        let t = trees();
        write_at(&t.source.join("real/data.txt"), "d", 100);
        std::os::unix::fs::symlink("real", t.source.join("alias")).unwrap();

        let actions = reconcile(&t.source, &t.replica);
        assert!(actions.iter().any(|a| a.kind == ActionKind::Create && a.is_for("alias")));

        let link = t.replica.join("alias");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("real"));

        assert!(reconcile(&t.source, &t.replica).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn retargeted_symlink_is_updated() {
        let t = trees();
        std::os::unix::fs::symlink("one", t.source.join("link")).unwrap();
        reconcile(&t.source, &t.replica);

        fs::remove_file(t.source.join("link")).unwrap();
        std::os::unix::fs::symlink("two", t.source.join("link")).unwrap();
        let actions = reconcile(&t.source, &t.replica);

        assert_eq!(kinds(&actions), vec![(ActionKind::Update, "link".into())]);
        assert_eq!(
            fs::read_link(t.replica.join("link")).unwrap(),
            PathBuf::from("two")
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_skip_policy_reports_error() {
        let t = trees();
        std::os::unix::fs::symlink("anywhere", t.source.join("link")).unwrap();

        let reconciler = Reconciler::new(ReconcileOptions {
            symlinks: SymlinkPolicy::Skip,
            ..ReconcileOptions::default()
        });
        let report = reconciler.reconcile(&t.source, &t.replica);

        assert_eq!(kinds(&report.actions), vec![(ActionKind::Error, "link".into())]);
        assert!(report.actions[0].detail.as_deref().unwrap().contains("RSY-2003"));
        assert!(fs::symlink_metadata(t.replica.join("link")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn replica_symlink_to_outside_dir_is_removed_not_followed() {
        let t = trees();
        let outside = t.source.parent().unwrap().join("outside");
        write_at(&outside.join("precious.txt"), "p", 100);
        std::os::unix::fs::symlink(&outside, t.replica.join("escape")).unwrap();

        let actions = reconcile(&t.source, &t.replica);

        assert_eq!(kinds(&actions), vec![(ActionKind::Delete, "escape".into())]);
        assert!(outside.join("precious.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn special_files_follow_policy() {
        let t = trees();
        let _listener =
            std::os::unix::net::UnixListener::bind(t.source.join("agent.sock")).unwrap();

        let report = Reconciler::default().reconcile(&t.source, &t.replica);
        assert_eq!(
            kinds(&report.actions),
            vec![(ActionKind::Error, "agent.sock".into())]
        );

        let ignoring = Reconciler::new(ReconcileOptions {
            special_files: SpecialFilePolicy::Ignore,
            ..ReconcileOptions::default()
        });
        assert!(ignoring.reconcile(&t.source, &t.replica).is_clean());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_source_dir_keeps_replica_subtree() {
        use std::os::unix::fs::PermissionsExt;

        let t = trees();
        write_at(&t.source.join("locked/a.txt"), "a", 100);
        write_at(&t.source.join("open.txt"), "o", 100);
        reconcile(&t.source, &t.replica);

        fs::set_permissions(t.source.join("locked"), fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(t.source.join("locked")).is_ok() {
            fs::set_permissions(t.source.join("locked"), fs::Permissions::from_mode(0o755))
                .unwrap();
            return;
        }

        let actions = reconcile(&t.source, &t.replica);
        fs::set_permissions(t.source.join("locked"), fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(kinds(&actions), vec![(ActionKind::Error, "locked".into())]);
        assert!(t.replica.join("locked/a.txt").exists());
    }

    #[test]
    fn policies_parse_from_strings() {
        assert_eq!("copy".parse::<SymlinkPolicy>(), Ok(SymlinkPolicy::Copy));
        assert_eq!("SKIP".parse::<SymlinkPolicy>(), Ok(SymlinkPolicy::Skip));
        assert_eq!(
            "ignore".parse::<SpecialFilePolicy>(),
            Ok(SpecialFilePolicy::Ignore)
        );
        assert!("follow".parse::<SymlinkPolicy>().is_err());
    }
}
