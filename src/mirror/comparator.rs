//! Staleness check between a source file and its replica copy.
//!
//! The default rule is timestamp-only: a replica file is stale iff the source's
//! modification time is strictly newer. Filesystems with coarse timestamp
//! resolution, or clocks that skew between writers, can leave an edited file
//! with an equal or older timestamp; `Mtime` mode treats such a file as in
//! sync until its timestamp moves forward. `Checksum` mode closes that gap by
//! also comparing sizes and SHA-256 digests, at the cost of reading both files.

#![allow(missing_docs)]

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const DIGEST_BUFFER_SIZE: usize = 64 * 1024;

/// How the comparator decides a replica file is stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum CompareMode {
    /// Source modification time strictly newer than the replica's.
    #[default]
    Mtime,
    /// `Mtime`, or differing size, or differing content digest.
    Checksum,
}

impl FromStr for CompareMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mtime" => Ok(Self::Mtime),
            "checksum" => Ok(Self::Checksum),
            other => Err(format!("unknown compare mode {other:?} (expected mtime|checksum)")),
        }
    }
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mtime => "mtime",
            Self::Checksum => "checksum",
        })
    }
}

/// Decides whether a destination copy must be (re)written.
#[derive(Debug, Clone, Copy, Default)]
pub struct Comparator {
    mode: CompareMode,
}

impl Comparator {
    pub const fn new(mode: CompareMode) -> Self {
        Self { mode }
    }

    pub const fn mode(&self) -> CompareMode {
        self.mode
    }

    /// True when `dest` is missing or stale relative to `source`.
    ///
    /// Never fails: metadata that cannot be read on either side counts as
    /// "needs copy", so the copy attempt reports the underlying error.
    /// Two directories compare as in sync; directory existence is handled by
    /// the reconciler.
    pub fn needs_copy(&self, source: &Path, dest: &Path) -> bool {
        let Ok(dest_meta) = fs::symlink_metadata(dest) else {
            return true;
        };
        let Ok(source_meta) = fs::symlink_metadata(source) else {
            return true;
        };
        self.is_stale(source, &source_meta, dest, &dest_meta)
    }

    /// Same as [`needs_copy`](Self::needs_copy) with metadata already in hand.
    pub fn is_stale(
        &self,
        source: &Path,
        source_meta: &fs::Metadata,
        dest: &Path,
        dest_meta: &fs::Metadata,
    ) -> bool {
        let (src_ft, dst_ft) = (source_meta.file_type(), dest_meta.file_type());
        if src_ft.is_dir() && dst_ft.is_dir() {
            return false;
        }
        if !(src_ft.is_file() && dst_ft.is_file()) {
            return true;
        }

        if source_is_newer(source_meta, dest_meta) {
            return true;
        }

        match self.mode {
            CompareMode::Mtime => false,
            CompareMode::Checksum => {
                source_meta.len() != dest_meta.len() || !same_content(source, dest)
            }
        }
    }
}

/// Free-function form of [`Comparator::needs_copy`] using `Mtime` mode.
pub fn needs_copy(source: &Path, dest: &Path) -> bool {
    Comparator::default().needs_copy(source, dest)
}

fn source_is_newer(source: &fs::Metadata, dest: &fs::Metadata) -> bool {
    match (source.modified(), dest.modified()) {
        (Ok(src), Ok(dst)) => src > dst,
        _ => true,
    }
}

fn same_content(a: &Path, b: &Path) -> bool {
    match (file_digest(a), file_digest(b)) {
        (Ok(da), Ok(db)) => da == db,
        _ => false,
    }
}

/// SHA-256 of a file's content, streamed.
pub fn file_digest(path: &Path) -> io::Result<[u8; 32]> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}
