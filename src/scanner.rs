//! Directory scanning into keyed snapshots
//!
//! A [`Scanner`] walks one root directory, prunes ignored directories
//! before descent, applies include/ignore glob filters to every file,
//! and yields a [`Snapshot`]: the point-in-time map of relative key to
//! file metadata that the diff engine and the watchers work on.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::Context;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use tracing::trace;
use walkdir::WalkDir;

use crate::error::Result;

/// One file under a watched root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Path relative to the watched root, with `/` separators on every
    /// platform so persisted state stays portable.
    pub key: String,
    /// Resolved location for I/O.
    pub absolute_path: PathBuf,
    /// Relative directory component of `key`, used to recreate the
    /// directory structure on the other side.
    pub parent_dir: String,
    /// Last-modification time in whole seconds since the Unix epoch.
    /// The sole change signal; content is never hashed or compared.
    pub version: u64,
}

/// Point-in-time map of `key -> Resource` for one side.
///
/// Immutable once produced; snapshots of the same root at different
/// times are compared, never mutated.
pub type Snapshot = BTreeMap<String, Resource>;

/// Include/ignore filtering for one scan configuration.
#[derive(Clone)]
pub struct ScanFilter {
    include: Gitignore,
    ignore: Gitignore,
    ignore_dirs: Vec<String>,
}

impl ScanFilter {
    /// Build a filter from include patterns, ignore patterns, and a set
    /// of directory names to prune.
    ///
    /// An empty include set matches nothing: callers must always supply
    /// explicit include patterns.
    ///
    /// # Errors
    ///
    /// Returns an error if a glob pattern is invalid.
    pub fn new(
        include_files: &[String],
        ignore_files: &[String],
        ignore_dirs: &[String],
    ) -> Result<Self> {
        Ok(Self {
            include: Self::build_set(include_files, "include")?,
            ignore: Self::build_set(ignore_files, "ignore")?,
            ignore_dirs: ignore_dirs.to_vec(),
        })
    }

    fn build_set(patterns: &[String], what: &str) -> Result<Gitignore> {
        let mut builder = GitignoreBuilder::new("");
        for pattern in patterns {
            builder
                .add_line(None, pattern)
                .with_context(|| format!("Invalid {what} pattern: '{pattern}'"))?;
        }
        Ok(builder.build()?)
    }

    /// Whether a file with this root-relative key belongs in the snapshot.
    ///
    /// A key is included iff it matches at least one include pattern and
    /// matches no ignore pattern.
    #[must_use]
    pub fn matches_key(&self, key: &str) -> bool {
        let path = Path::new(key);
        if self.ignore.matched(path, false).is_ignore() {
            return false;
        }
        self.include.matched(path, false).is_ignore()
    }

    /// Whether a directory with this name is pruned before descent.
    #[must_use]
    pub fn skips_dir(&self, name: &OsStr) -> bool {
        self.ignore_dirs.iter().any(|d| name == OsStr::new(d))
    }
}

/// Walks a directory tree and produces snapshots.
pub struct Scanner {
    filter: ScanFilter,
}

impl Scanner {
    /// Create a scanner with the given filter.
    #[must_use]
    pub const fn new(filter: ScanFilter) -> Self {
        Self { filter }
    }

    /// Whether a key passes this scanner's filter.
    #[must_use]
    pub fn matches_key(&self, key: &str) -> bool {
        self.filter.matches_key(key)
    }

    /// Scan `root` and produce a snapshot.
    ///
    /// Read-only; only `stat`-level metadata is touched. A file that
    /// disappears between directory listing and the metadata read is
    /// silently skipped, not an error.
    #[must_use]
    pub fn scan(&self, root: &Path) -> Snapshot {
        let mut snapshot = Snapshot::new();

        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir() && self.filter.skips_dir(entry.file_name()))
        });

        for entry in walker {
            // Unreadable entries are simply not part of the snapshot
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let key = key_for(relative);
            if !self.filter.matches_key(&key) {
                continue;
            }
            // The file may vanish between listing and stat
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let parent_dir = match key.rsplit_once('/') {
                Some((dir, _)) => dir.to_string(),
                None => String::new(),
            };
            snapshot.insert(
                key.clone(),
                Resource {
                    key,
                    absolute_path: entry.path().to_path_buf(),
                    parent_dir,
                    version: mtime_secs(&metadata),
                },
            );
        }

        trace!(root = %root.display(), files = snapshot.len(), "scan finished");
        snapshot
    }
}

/// Root-relative key for a path, always `/`-separated.
#[must_use]
pub fn key_for(relative: &Path) -> String {
    relative
        .iter()
        .map(|c| c.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Absolute path for a key under the given root.
#[must_use]
pub fn key_path(root: &Path, key: &str) -> PathBuf {
    key.split('/').fold(root.to_path_buf(), |p, c| p.join(c))
}

fn mtime_secs(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs())
}
