//! Bidirectional synchronization engine
//!
//! The engine exposes exactly two operations to surrounding commands:
//! a full-tree sync (pull, push, or both, with an optional override)
//! and a single-item sync for one relative key in one direction.

mod executor;
mod orchestrator;
mod packages;

pub use executor::{Applied, ChangeExecutor};
pub use orchestrator::{SyncContext, SyncEngine};
pub use packages::{LoggingInstaller, PackageInstaller, PackageList, PackageReconciler};

use std::fmt::Write;

use crate::state::Side;

/// Direction of one sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Apply remote changes to the local tree.
    Pull,
    /// Apply local changes to the remote tree.
    Push,
}

impl SyncDirection {
    /// The side changes are read from.
    #[must_use]
    pub const fn source_side(self) -> Side {
        match self {
            Self::Pull => Side::Remote,
            Self::Push => Side::Local,
        }
    }

    /// The side changes are applied to.
    #[must_use]
    pub const fn dest_side(self) -> Side {
        match self {
            Self::Pull => Side::Local,
            Self::Push => Side::Remote,
        }
    }

    /// Lowercase name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
        }
    }
}

/// Which directions a full sync covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Remote to local only.
    Pull,
    /// Local to remote only.
    Push,
    /// Pull first, then push.
    Both,
}

impl SyncMode {
    /// The directions this mode runs, in order.
    #[must_use]
    pub const fn directions(self) -> &'static [SyncDirection] {
        match self {
            Self::Pull => &[SyncDirection::Pull],
            Self::Push => &[SyncDirection::Push],
            Self::Both => &[SyncDirection::Pull, SyncDirection::Push],
        }
    }
}

/// Synchronization result with statistics.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Files created at the destination.
    pub created: usize,
    /// Files overwritten at the destination.
    pub updated: usize,
    /// Files removed from the destination.
    pub deleted: usize,
    /// Operations skipped (already synced).
    pub skipped: usize,
    /// Per-operation errors; the batch continued past each of them.
    pub errors: Vec<String>,
}

impl SyncReport {
    /// Total operations performed.
    #[must_use]
    pub const fn total_operations(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Whether sync was successful (no errors).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record one applied operation.
    pub const fn record(&mut self, applied: Applied) {
        match applied {
            Applied::Created => self.created += 1,
            Applied::Updated => self.updated += 1,
            Applied::Deleted => self.deleted += 1,
            Applied::Skipped => self.skipped += 1,
        }
    }

    /// Generate a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut output = String::new();

        output.push_str("\n=== Sync Summary ===\n");
        let _ = writeln!(output, "Created:  {}", self.created);
        let _ = writeln!(output, "Updated:  {}", self.updated);
        let _ = writeln!(output, "Deleted:  {}", self.deleted);
        let _ = writeln!(output, "Skipped:  {}", self.skipped);

        if !self.errors.is_empty() {
            let _ = writeln!(output, "\nErrors ({}):", self.errors.len());
            for error in &self.errors {
                let _ = writeln!(output, "  - {error}");
            }
        }

        let _ = writeln!(output, "\nTotal operations: {}", self.total_operations());

        if self.is_success() {
            output.push_str("Status: ✓ Success\n");
        } else {
            output.push_str("Status: ✗ Completed with errors\n");
        }

        output
    }
}
