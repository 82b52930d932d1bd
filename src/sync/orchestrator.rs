//! Sync orchestration - full-tree and single-item entry points

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::executor::{Applied, ChangeExecutor};
use super::packages::{LoggingInstaller, PackageInstaller, PackageReconciler};
use super::{SyncDirection, SyncMode, SyncReport};
use crate::config::SyncSettings;
use crate::diff::{ChangeOp, diff_changes};
use crate::error::{ConfigError, Result};
use crate::scanner::{Resource, ScanFilter, Scanner, key_for, key_path};
use crate::state::{Side, SyncStateStore};
use crate::watcher::WatchEvent;

/// Explicitly constructed engine context: settings, the state store,
/// and the package-manager adapter. Passed by reference everywhere; no
/// process-wide globals.
pub struct SyncContext {
    /// Engine configuration.
    pub settings: SyncSettings,
    /// Persisted last-run state.
    pub store: SyncStateStore,
    /// External package-manager collaborator.
    pub installer: Arc<dyn PackageInstaller>,
}

impl SyncContext {
    /// Build a context from settings with the default logging installer.
    #[must_use]
    pub fn new(settings: SyncSettings) -> Self {
        Self::with_installer(settings, Arc::new(LoggingInstaller))
    }

    /// Build a context with a specific package-manager adapter.
    #[must_use]
    pub fn with_installer(settings: SyncSettings, installer: Arc<dyn PackageInstaller>) -> Self {
        let store = SyncStateStore::new(settings.state_path());
        Self {
            settings,
            store,
            installer,
        }
    }
}

/// The synchronization engine.
pub struct SyncEngine {
    ctx: Arc<SyncContext>,
    scanner: Scanner,
    packages: PackageReconciler,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine").finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create an engine for the given context.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either root is missing or not a
    /// directory, or if a filter pattern is invalid. Nothing has been
    /// diffed or mutated when this fails.
    pub fn new(ctx: Arc<SyncContext>) -> Result<Self> {
        for root in [&ctx.settings.local_folder, &ctx.settings.sync_folder] {
            if !root.exists() {
                return Err(ConfigError::DirectoryNotFound(root.clone()).into());
            }
            if !root.is_dir() {
                return Err(ConfigError::NotADirectory(root.clone()).into());
            }
        }

        let filter = ScanFilter::new(
            &ctx.settings.include_files,
            &ctx.settings.ignore_files,
            &ctx.settings.ignore_dirs,
        )?;
        let packages = PackageReconciler::new(
            Arc::clone(&ctx.installer),
            ctx.settings.preserve_packages,
        );

        Ok(Self {
            ctx,
            scanner: Scanner::new(filter),
            packages,
        })
    }

    /// The root directory for one side.
    #[must_use]
    pub fn root(&self, side: Side) -> &Path {
        match side {
            Side::Local => &self.ctx.settings.local_folder,
            Side::Remote => &self.ctx.settings.sync_folder,
        }
    }

    /// Run a full-tree sync for the given mode.
    ///
    /// Each direction scans both sides, diffs against the persisted
    /// baseline, applies the resulting operations, and finally rescans
    /// both sides as the next run's baseline. Per-operation I/O errors
    /// are collected in the report; the batch keeps going.
    ///
    /// # Errors
    ///
    /// Returns an error only if the final state cannot be persisted.
    pub fn full_sync(&self, mode: SyncMode, override_all: bool) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        info!(mode = ?mode, override_all, "full sync started");

        for direction in mode.directions() {
            self.sync_direction(*direction, override_all, &mut report)?;
        }

        info!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            skipped = report.skipped,
            errors = report.errors.len(),
            "full sync finished"
        );
        Ok(report)
    }

    fn sync_direction(
        &self,
        direction: SyncDirection,
        override_all: bool,
        report: &mut SyncReport,
    ) -> Result<()> {
        let source_root = self.root(direction.source_side());
        let dest_root = self.root(direction.dest_side());

        let source = self.scanner.scan(source_root);
        let dest = self.scanner.scan(dest_root);
        let mut state = self.ctx.store.load();

        let ops = diff_changes(
            &source,
            &dest,
            state.snapshot(direction.source_side()),
            state.snapshot(direction.dest_side()),
            override_all,
        );
        debug!(direction = direction.as_str(), ops = ops.len(), "diff computed");

        let executor = ChangeExecutor::new(
            direction,
            dest_root,
            &self.ctx.settings.package_list_file,
            &self.packages,
        )
        .with_override(override_all);
        for op in &ops {
            match executor.apply(op, &mut state) {
                Ok(applied) => {
                    report.record(applied);
                    // Persist per op so a crash mid-batch re-attempts
                    // only what is left
                    if let Err(e) = self.ctx.store.save(&state) {
                        warn!(error = %e, "failed to persist state mid-batch");
                    }
                }
                Err(e) => {
                    warn!(key = op.key(), error = %e, "change failed, batch continues");
                    report.errors.push(format!("{}: {e:#}", op.key()));
                }
            }
        }

        // Destination files that produced no op (same or newer version
        // than the source) must still enter the destination baseline:
        // if one of them is deleted later, the baseline entry is what
        // distinguishes "deleted here" from "never synced", and without
        // it the stale source copy would recreate the file. Executor
        // writes and deletes already updated their own entries, so only
        // untracked keys are adopted.
        let dest_after = self.scanner.scan(dest_root);
        let dest_baseline = state.snapshot_mut(direction.dest_side());
        for (key, resource) in dest_after {
            dest_baseline.entry(key).or_insert(resource);
        }

        // Rebaseline the source side wholesale: its changes have all
        // been propagated or deliberately skipped. Keys the destination
        // deleted stay in its baseline untouched, so the deletion
        // remains visible to the opposite direction until propagated.
        *state.snapshot_mut(direction.source_side()) = self.scanner.scan(source_root);
        self.ctx.store.save(&state)?;

        Ok(())
    }

    /// Sync a single item, identified by its relative key, in one
    /// direction. The source side is consulted for the current file;
    /// an absent source file turns the operation into a delete.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem mutation or state write fails.
    pub fn sync_item(&self, direction: SyncDirection, key: &str) -> Result<Applied> {
        if !self.scanner.matches_key(key) {
            debug!(key, "item excluded by filters");
            return Ok(Applied::Skipped);
        }

        let source_root = self.root(direction.source_side());
        let path = key_path(source_root, key);

        let op = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => {
                let relative = path.strip_prefix(source_root).unwrap_or(&path);
                let resource = Resource {
                    key: key_for(relative),
                    absolute_path: path.clone(),
                    parent_dir: key.rsplit_once('/').map_or_else(String::new, |(d, _)| d.to_string()),
                    version: metadata
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map_or(0, |d| d.as_secs()),
                };
                let dest_exists = key_path(self.root(direction.dest_side()), key).is_file();
                if dest_exists {
                    ChangeOp::Modify {
                        key: key.to_string(),
                        resource,
                    }
                } else {
                    ChangeOp::Create {
                        key: key.to_string(),
                        resource,
                    }
                }
            }
            // Vanished since the caller saw it: a delete, not an error
            _ => ChangeOp::Delete {
                key: key.to_string(),
            },
        };

        self.apply_single(direction, &op)
    }

    /// Sync the single item described by a watcher event. The event
    /// carries the resource captured at detection time, so racing edits
    /// each apply with their own version.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem mutation or state write fails.
    pub fn sync_item_event(&self, direction: SyncDirection, event: &WatchEvent) -> Result<Applied> {
        let op = match event {
            WatchEvent::Created(resource) => ChangeOp::Create {
                key: resource.key.clone(),
                resource: resource.clone(),
            },
            WatchEvent::Modified(resource) => ChangeOp::Modify {
                key: resource.key.clone(),
                resource: resource.clone(),
            },
            WatchEvent::Deleted { key } => ChangeOp::Delete { key: key.clone() },
        };
        self.apply_single(direction, &op)
    }

    fn apply_single(&self, direction: SyncDirection, op: &ChangeOp) -> Result<Applied> {
        debug!(direction = direction.as_str(), key = op.key(), "single item sync");

        let dest_root = self.root(direction.dest_side());
        let executor = ChangeExecutor::new(
            direction,
            dest_root,
            &self.ctx.settings.package_list_file,
            &self.packages,
        );

        let mut state = self.ctx.store.load();
        let applied = executor.apply(op, &mut state)?;
        self.ctx.store.save(&state)?;
        Ok(applied)
    }
}
