//! Persisted last-run sync state
//!
//! [`SyncState`] records what both sides looked like after the last
//! successful sync, plus the pending package-removal list. It is read at
//! the start of every full sync and rewritten at the end so the next
//! run's three-way diff has a correct baseline. A missing or corrupt
//! state file is treated as empty: the first sync pushes/pulls everything.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::scanner::Snapshot;

/// One of the two directory trees being synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The editor's user-configuration folder.
    Local,
    /// The shared/cloud-mounted sync folder.
    Remote,
}

/// The baseline of both sides' snapshots from the last successful sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Local snapshot as of the last sync.
    #[serde(default)]
    pub last_local: Snapshot,
    /// Remote snapshot as of the last sync.
    #[serde(default)]
    pub last_remote: Snapshot,
    /// Package names whose removal is still owed to the package manager.
    #[serde(default)]
    pub packages_to_remove: Vec<String>,
}

impl SyncState {
    /// The last-run snapshot for one side.
    #[must_use]
    pub const fn snapshot(&self, side: Side) -> &Snapshot {
        match side {
            Side::Local => &self.last_local,
            Side::Remote => &self.last_remote,
        }
    }

    /// Mutable last-run snapshot for one side.
    pub const fn snapshot_mut(&mut self, side: Side) -> &mut Snapshot {
        match side {
            Side::Local => &mut self.last_local,
            Side::Remote => &mut self.last_remote,
        }
    }
}

/// Loads and persists [`SyncState`] as a JSON document.
pub struct SyncStateStore {
    path: PathBuf,
}

impl SyncStateStore {
    /// Create a store backed by the given file path.
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state.
    ///
    /// Missing or unparseable state falls back to empty; corruption is
    /// never fatal.
    #[must_use]
    pub fn load(&self) -> SyncState {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "sync state unparseable, starting from empty baseline"
                );
                SyncState::default()
            }),
            Err(_) => SyncState::default(),
        }
    }

    /// Persist the state, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, state: &SyncState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(state).context("Failed to serialize sync state")?;
        fs::write(&self.path, text)
            .with_context(|| format!("Failed to write sync state: {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::scanner::Resource;

    fn resource(key: &str, version: u64) -> Resource {
        Resource {
            key: key.to_string(),
            absolute_path: PathBuf::from(format!("/root/{key}")),
            parent_dir: String::new(),
            version,
        }
    }

    #[test]
    fn test_load_missing_state_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = SyncStateStore::new(tmp.path().join("last_run.json"));

        assert_eq!(store.load(), SyncState::default());
    }

    #[test]
    fn test_load_corrupt_state_is_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("last_run.json");
        fs::write(&path, "{not json").unwrap();

        let store = SyncStateStore::new(path);
        assert_eq!(store.load(), SyncState::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = SyncStateStore::new(tmp.path().join("nested/last_run.json"));

        let mut state = SyncState::default();
        state
            .last_local
            .insert("a.txt".to_string(), resource("a.txt", 100));
        state
            .last_remote
            .insert("a.txt".to_string(), resource("a.txt", 100));
        state.packages_to_remove.push("OldPackage".to_string());

        store.save(&state).unwrap();
        assert_eq!(store.load(), state);
    }

    #[test]
    fn test_snapshot_accessors() {
        let mut state = SyncState::default();
        state
            .snapshot_mut(Side::Local)
            .insert("x".to_string(), resource("x", 1));

        assert_eq!(state.snapshot(Side::Local).len(), 1);
        assert!(state.snapshot(Side::Remote).is_empty());
    }
}
