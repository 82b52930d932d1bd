//! Applies change operations to a destination tree
//!
//! The executor updates the running last-run snapshots for both sides
//! as it goes, so the persisted baseline stays accurate even when a
//! batch dies halfway through. The next run's diff simply re-attempts
//! whatever was left.

use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::{debug, trace};

use super::packages::PackageReconciler;
use super::SyncDirection;
use crate::diff::ChangeOp;
use crate::error::Result;
use crate::scanner::{Resource, key_path};
use crate::state::SyncState;

/// What the executor did with one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A file was created at the destination.
    Created,
    /// An existing destination file was overwritten.
    Updated,
    /// A destination file was removed.
    Deleted,
    /// The operation was a no-op (already synced).
    Skipped,
}

impl Applied {
    /// Lowercase name for output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Skipped => "skipped",
        }
    }
}

/// Applies one [`ChangeOp`] at a time for a fixed direction.
pub struct ChangeExecutor<'a> {
    direction: SyncDirection,
    dest_root: &'a Path,
    package_list_file: &'a str,
    packages: &'a PackageReconciler,
    override_all: bool,
}

impl<'a> ChangeExecutor<'a> {
    /// Create an executor applying changes under `dest_root`.
    #[must_use]
    pub const fn new(
        direction: SyncDirection,
        dest_root: &'a Path,
        package_list_file: &'a str,
        packages: &'a PackageReconciler,
    ) -> Self {
        Self {
            direction,
            dest_root,
            package_list_file,
            packages,
            override_all: false,
        }
    }

    /// Copy unconditionally, disabling the already-synced skip.
    #[must_use]
    pub const fn with_override(mut self, override_all: bool) -> Self {
        self.override_all = override_all;
        self
    }

    /// Apply one operation and update the live state.
    ///
    /// A `Create` whose destination already exists behaves as a
    /// `Modify`; a `Delete` of an absent file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem mutation fails. Callers log
    /// and continue; a failed op is not retried within the batch.
    pub fn apply(&self, op: &ChangeOp, state: &mut SyncState) -> Result<Applied> {
        match op {
            ChangeOp::Create { key, resource } | ChangeOp::Modify { key, resource } => {
                self.copy_into_dest(key, resource, state, matches!(op, ChangeOp::Create { .. }))
            }
            ChangeOp::Delete { key } => self.delete_from_dest(key, state),
        }
    }

    fn copy_into_dest(
        &self,
        key: &str,
        resource: &Resource,
        state: &mut SyncState,
        is_create: bool,
    ) -> Result<Applied> {
        // The echo of our own copy carries the version we just recorded;
        // applying it again would loop forever between the watchers
        if !self.override_all
            && let Some(entry) = state.snapshot(self.direction.dest_side()).get(key)
            && entry.version == resource.version
        {
            trace!(key, "already synced");
            return Ok(Applied::Skipped);
        }

        let dest_path = key_path(self.dest_root, key);

        if key == self.package_list_file {
            self.packages.reconcile(
                &resource.absolute_path,
                &dest_path,
                &mut state.packages_to_remove,
            )?;
        } else {
            copy_with_mtime(&resource.absolute_path, &dest_path)?;
        }
        debug!(key, dest = %dest_path.display(), "copied");

        let dest_resource = Resource {
            key: key.to_string(),
            absolute_path: dest_path,
            parent_dir: resource.parent_dir.clone(),
            version: resource.version,
        };
        state
            .snapshot_mut(self.direction.source_side())
            .insert(key.to_string(), resource.clone());
        state
            .snapshot_mut(self.direction.dest_side())
            .insert(key.to_string(), dest_resource);

        Ok(if is_create {
            Applied::Created
        } else {
            Applied::Updated
        })
    }

    fn delete_from_dest(&self, key: &str, state: &mut SyncState) -> Result<Applied> {
        let dest_path = key_path(self.dest_root, key);

        if dest_path.is_file() {
            fs::remove_file(&dest_path)
                .with_context(|| format!("Failed to delete: {}", dest_path.display()))?;
            debug!(key, dest = %dest_path.display(), "deleted");
        }

        state
            .snapshot_mut(self.direction.source_side())
            .remove(key);
        state.snapshot_mut(self.direction.dest_side()).remove(key);

        // Cosmetic: drop the parent directory once it is empty
        if let Some(parent) = dest_path.parent()
            && parent != self.dest_root
            && fs::read_dir(parent).is_ok_and(|mut entries| entries.next().is_none())
        {
            let _ = fs::remove_dir(parent);
        }

        Ok(Applied::Deleted)
    }
}

/// Copy a file, creating parent directories and carrying the source
/// modification time so the copy does not read as a fresh edit.
fn copy_with_mtime(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::copy(source, dest)
        .with_context(|| format!("Failed to copy {} to {}", source.display(), dest.display()))?;

    let modified = fs::metadata(source)
        .and_then(|m| m.modified())
        .with_context(|| format!("Failed to stat: {}", source.display()))?;
    let file = fs::OpenOptions::new()
        .write(true)
        .open(dest)
        .with_context(|| format!("Failed to open: {}", dest.display()))?;
    file.set_modified(modified)
        .with_context(|| format!("Failed to set mtime: {}", dest.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use tempfile::TempDir;

    use super::super::packages::LoggingInstaller;
    use super::*;
    use crate::scanner::key_path;

    fn reconciler() -> PackageReconciler {
        PackageReconciler::new(Arc::new(LoggingInstaller), true)
    }

    fn source_resource(root: &Path, key: &str, version: u64) -> Resource {
        let path = key_path(root, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, format!("content of {key}")).unwrap();
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(version))
            .unwrap();

        Resource {
            key: key.to_string(),
            absolute_path: path,
            parent_dir: key.rsplit_once('/').map_or(String::new(), |(d, _)| d.to_string()),
            version,
        }
    }

    #[test]
    fn test_create_copies_file_and_mtime() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let resource = source_resource(source.path(), "dir/a.txt", 1_000);

        let packages = reconciler();
        let executor =
            ChangeExecutor::new(SyncDirection::Pull, dest.path(), "packages.json", &packages);
        let mut state = SyncState::default();

        let applied = executor
            .apply(
                &ChangeOp::Create {
                    key: "dir/a.txt".to_string(),
                    resource,
                },
                &mut state,
            )
            .unwrap();

        assert_eq!(applied, Applied::Created);
        let dest_path = key_path(dest.path(), "dir/a.txt");
        assert_eq!(
            fs::read_to_string(&dest_path).unwrap(),
            "content of dir/a.txt"
        );
        let mtime = fs::metadata(&dest_path).unwrap().modified().unwrap();
        assert_eq!(
            mtime,
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_000)
        );

        // Both last-run snapshots carry the new entry at the same version
        assert_eq!(state.last_local["dir/a.txt"].version, 1_000);
        assert_eq!(state.last_remote["dir/a.txt"].version, 1_000);
    }

    #[test]
    fn test_echo_of_own_copy_is_skipped() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let resource = source_resource(source.path(), "a.txt", 500);

        let packages = reconciler();
        let executor =
            ChangeExecutor::new(SyncDirection::Pull, dest.path(), "packages.json", &packages);
        let mut state = SyncState::default();

        let op = ChangeOp::Create {
            key: "a.txt".to_string(),
            resource,
        };
        assert_eq!(executor.apply(&op, &mut state).unwrap(), Applied::Created);
        // Same version arrives again (our own copy detected by a watcher)
        assert_eq!(executor.apply(&op, &mut state).unwrap(), Applied::Skipped);
    }

    #[test]
    fn test_create_over_existing_overwrites() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let resource = source_resource(source.path(), "a.txt", 900);
        fs::write(key_path(dest.path(), "a.txt"), "stale").unwrap();

        let packages = reconciler();
        let executor =
            ChangeExecutor::new(SyncDirection::Pull, dest.path(), "packages.json", &packages);
        let mut state = SyncState::default();

        executor
            .apply(
                &ChangeOp::Create {
                    key: "a.txt".to_string(),
                    resource,
                },
                &mut state,
            )
            .unwrap();

        assert_eq!(
            fs::read_to_string(key_path(dest.path(), "a.txt")).unwrap(),
            "content of a.txt"
        );
    }

    #[test]
    fn test_delete_removes_file_and_empty_parent() {
        let dest = TempDir::new().unwrap();
        let dest_path = key_path(dest.path(), "sub/a.txt");
        fs::create_dir_all(dest_path.parent().unwrap()).unwrap();
        fs::write(&dest_path, "bye").unwrap();

        let packages = reconciler();
        let executor =
            ChangeExecutor::new(SyncDirection::Pull, dest.path(), "packages.json", &packages);
        let mut state = SyncState::default();
        state.last_local.insert(
            "sub/a.txt".to_string(),
            Resource {
                key: "sub/a.txt".to_string(),
                absolute_path: dest_path.clone(),
                parent_dir: "sub".to_string(),
                version: 1,
            },
        );

        let applied = executor
            .apply(
                &ChangeOp::Delete {
                    key: "sub/a.txt".to_string(),
                },
                &mut state,
            )
            .unwrap();

        assert_eq!(applied, Applied::Deleted);
        assert!(!dest_path.exists());
        assert!(!dest_path.parent().unwrap().exists());
        assert!(!state.last_local.contains_key("sub/a.txt"));
    }

    #[test]
    fn test_delete_of_absent_file_is_not_an_error() {
        let dest = TempDir::new().unwrap();
        let packages = reconciler();
        let executor =
            ChangeExecutor::new(SyncDirection::Pull, dest.path(), "packages.json", &packages);
        let mut state = SyncState::default();

        let applied = executor
            .apply(
                &ChangeOp::Delete {
                    key: "never-existed.txt".to_string(),
                },
                &mut state,
            )
            .unwrap();

        assert_eq!(applied, Applied::Deleted);
    }

    #[test]
    fn test_package_list_is_merged_not_overwritten() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();

        let incoming = key_path(source.path(), "packages.json");
        fs::write(&incoming, r#"{"installed_packages": ["B", "C"]}"#).unwrap();
        let file = fs::OpenOptions::new().write(true).open(&incoming).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(2_000))
            .unwrap();

        let dest_list = key_path(dest.path(), "packages.json");
        fs::write(&dest_list, r#"{"installed_packages": ["A", "B"]}"#).unwrap();

        let packages = reconciler();
        let executor =
            ChangeExecutor::new(SyncDirection::Pull, dest.path(), "packages.json", &packages);
        let mut state = SyncState::default();

        executor
            .apply(
                &ChangeOp::Modify {
                    key: "packages.json".to_string(),
                    resource: Resource {
                        key: "packages.json".to_string(),
                        absolute_path: incoming,
                        parent_dir: String::new(),
                        version: 2_000,
                    },
                },
                &mut state,
            )
            .unwrap();

        let merged: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&dest_list).unwrap()).unwrap();
        assert_eq!(
            merged["installed_packages"],
            serde_json::json!(["A", "B", "C"])
        );
    }
}
