//! Iterative, no-follow directory traversal producing relative `FileEntry` snapshots.
//!
//! Traversal uses an explicit stack rather than recursion so deep trees cannot
//! exhaust the thread stack. Symbolic links are reported as links and never
//! descended into, which also rules out loops and escapes from the root.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Filesystem type of an entry, as seen without following links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    /// Sockets, FIFOs, block and character devices.
    Other,
}

impl EntryKind {
    pub fn from_file_type(ft: fs::FileType) -> Self {
        if ft.is_symlink() {
            Self::Symlink
        } else if ft.is_dir() {
            Self::Dir
        } else if ft.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Dir => "directory",
            Self::Symlink => "symbolic link",
            Self::Other => "special file",
        }
    }
}

/// One entry under a tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the tree root.
    pub rel_path: PathBuf,
    pub kind: EntryKind,
    pub modified: Option<SystemTime>,
    pub size: u64,
}

impl FileEntry {
    fn from_metadata(rel_path: PathBuf, meta: &fs::Metadata) -> Self {
        Self {
            rel_path,
            kind: EntryKind::from_file_type(meta.file_type()),
            modified: meta.modified().ok(),
            size: meta.len(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// List the immediate children of `root/rel_dir`, sorted by name.
///
/// Children whose metadata vanished between listing and stat are dropped:
/// they no longer exist, so there is nothing to reconcile.
pub fn list_dir(root: &Path, rel_dir: &Path) -> io::Result<Vec<FileEntry>> {
    let mut children = Vec::new();
    for entry in fs::read_dir(root.join(rel_dir))? {
        let entry = entry?;
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        children.push(FileEntry::from_metadata(
            rel_dir.join(entry.file_name()),
            &meta,
        ));
    }
    children.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(children)
}

/// Read-only view of a tree taken at one moment.
#[derive(Debug, Default)]
pub struct TreeSnapshot {
    pub root: PathBuf,
    /// Depth-first pre-order, lexicographic within each directory.
    pub entries: Vec<FileEntry>,
    /// Directories whose listing failed, keyed by relative path.
    pub unreadable: BTreeMap<PathBuf, io::Error>,
}

impl TreeSnapshot {
    /// Walk `root` without following symbolic links.
    ///
    /// Failing to list the root itself is an error; failures below the root
    /// are recorded in `unreadable` and the walk continues.
    pub fn capture(root: &Path) -> io::Result<Self> {
        let mut snapshot = Self {
            root: root.to_path_buf(),
            ..Self::default()
        };

        let mut stack: Vec<FileEntry> = list_dir(root, Path::new(""))?;
        stack.reverse();

        while let Some(entry) = stack.pop() {
            if entry.is_dir() {
                match list_dir(root, &entry.rel_path) {
                    Ok(mut children) => {
                        children.reverse();
                        stack.extend(children);
                    }
                    Err(err) => {
                        snapshot.unreadable.insert(entry.rel_path.clone(), err);
                    }
                }
            }
            snapshot.entries.push(entry);
        }

        Ok(snapshot)
    }

    pub fn get(&self, rel_path: &Path) -> Option<&FileEntry> {
        self.entries.iter().find(|e| e.rel_path == rel_path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|e| e.rel_path.as_path())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
