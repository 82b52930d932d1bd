//! Installed-package-list reconciliation
//!
//! The package manager's installed-package-list file gets special
//! treatment during sync: instead of a blind overwrite, the incoming and
//! destination name sets are reconciled so a locally installed package
//! is never silently dropped by someone else's narrower list, and
//! removals survive a crash via the persisted pending-removal list.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Delay before the package manager is poked, so the editor settles
/// after the file writes.
const INSTALL_DEBOUNCE: Duration = Duration::from_secs(3);

/// Narrow interface to the external package manager.
///
/// Both operations are fire-and-forget from the engine's perspective;
/// failures are the collaborator's to log, never surfaced back.
pub trait PackageInstaller: Send + Sync {
    /// Trigger installation of packages referenced by the list file but
    /// not present on disk.
    fn install_missing(&self);

    /// Ask the package manager to uninstall the named packages,
    /// returning the names it actually removed. Names not returned are
    /// retried on the next run.
    fn uninstall(&self, names: &[String]) -> Vec<String>;
}

/// Default adapter used when no real package manager is wired in.
///
/// Logs every request and reports all removals as done.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInstaller;

impl PackageInstaller for LoggingInstaller {
    fn install_missing(&self) {
        info!("package manager install pass requested");
    }

    fn uninstall(&self, names: &[String]) -> Vec<String> {
        info!(packages = ?names, "package manager uninstall requested");
        names.to_vec()
    }
}

/// The installed-package-list file: a JSON document with a single
/// `installed_packages` array of names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageList {
    /// Installed package names, kept sorted for stable output.
    #[serde(default)]
    pub installed_packages: BTreeSet<String>,
}

impl PackageList {
    /// Load a package list; a missing or unparseable file is empty.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "package list unparseable, treating as empty");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Write the package list.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("Failed to serialize package list")?;
        fs::write(path, text)
            .with_context(|| format!("Failed to write package list: {}", path.display()))?;
        Ok(())
    }
}

/// Reconciles package-list syncs against the external installer.
pub struct PackageReconciler {
    installer: Arc<dyn PackageInstaller>,
    preserve_packages: bool,
    debounce: Duration,
}

impl PackageReconciler {
    /// Create a reconciler around the given installer adapter.
    #[must_use]
    pub fn new(installer: Arc<dyn PackageInstaller>, preserve_packages: bool) -> Self {
        Self {
            installer,
            preserve_packages,
            debounce: INSTALL_DEBOUNCE,
        }
    }

    /// Replace the install debounce delay.
    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Reconcile an incoming package-list file into the destination
    /// list file.
    ///
    /// With `preserve_packages` the written list is the union of both
    /// sets, so nothing is ever dropped by the merge itself; otherwise
    /// the incoming list replaces the destination and names it no longer
    /// carries are appended to `pending_removals`. Newly referenced
    /// names schedule a detached install pass; a non-empty pending list
    /// triggers an uninstall pass, and names the package manager reports
    /// removed are taken off the list.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination list cannot be written.
    pub fn reconcile(
        &self,
        incoming: &Path,
        dest: &Path,
        pending_removals: &mut Vec<String>,
    ) -> Result<()> {
        let incoming_list = PackageList::load(incoming);
        let current = PackageList::load(dest);

        let merged = if self.preserve_packages {
            PackageList {
                installed_packages: current
                    .installed_packages
                    .union(&incoming_list.installed_packages)
                    .cloned()
                    .collect(),
            }
        } else {
            incoming_list.clone()
        };

        let added: Vec<&String> = merged
            .installed_packages
            .difference(&current.installed_packages)
            .collect();
        let removed: Vec<String> = current
            .installed_packages
            .difference(&merged.installed_packages)
            .cloned()
            .collect();

        debug!(added = added.len(), removed = removed.len(), "package list reconciled");
        merged.save(dest)?;

        // When the written list is exactly the incoming one, carry its
        // mtime so the next scan reads the file as already synced
        // instead of re-emitting it. A merge that added local entries
        // keeps the fresh mtime and flows back on the next pass.
        if merged == incoming_list
            && let Ok(modified) = fs::metadata(incoming).and_then(|m| m.modified())
        {
            fs::OpenOptions::new()
                .write(true)
                .open(dest)
                .and_then(|file| file.set_modified(modified))
                .with_context(|| format!("Failed to set mtime: {}", dest.display()))?;
        }

        for name in removed {
            if !pending_removals.contains(&name) {
                pending_removals.push(name);
            }
        }

        if !pending_removals.is_empty() {
            let done = self.installer.uninstall(pending_removals);
            pending_removals.retain(|name| !done.contains(name));
        }

        if !added.is_empty() {
            let installer = Arc::clone(&self.installer);
            let debounce = self.debounce;
            thread::spawn(move || {
                thread::sleep(debounce);
                installer.install_missing();
            });
        }

        Ok(())
    }
}
