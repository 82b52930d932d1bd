//! Three-way diff between current snapshots and the last-run baseline
//!
//! The diff engine never looks at file content: it trusts the
//! modification time as a monotonic change proxy. The one race it
//! resolves deliberately is delete-versus-stale-recreate, where the
//! deletion wins so removed files do not resurrect. Concurrent edits to
//! the same file on both sides are not detected as a conflict; whichever
//! side carries the larger timestamp overwrites the other
//! (last-writer-wins, documented behavior).

use crate::scanner::{Resource, Snapshot};

/// One create/modify/delete instruction for the destination side.
///
/// Produced by [`diff_changes`], consumed by the executor, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOp {
    /// Copy a file that does not exist at the destination.
    Create {
        /// Relative key of the file.
        key: String,
        /// Source resource to copy from.
        resource: Resource,
    },
    /// Overwrite a file that exists at the destination.
    Modify {
        /// Relative key of the file.
        key: String,
        /// Source resource to copy from.
        resource: Resource,
    },
    /// Remove a file from the destination.
    Delete {
        /// Relative key of the file.
        key: String,
    },
}

impl ChangeOp {
    /// Relative key this operation applies to.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Create { key, .. } | Self::Modify { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Compute the operations to apply to the destination side for one sync
/// direction.
///
/// For a pull, the remote is the source and the local tree is the
/// destination; a push is symmetric with the sides swapped.
///
/// Deletions (keys that left the source side since the last run) are
/// emitted before creates/modifies. Keys the destination deleted since
/// the last sync are skipped unless `override_all` is set, so a local
/// deletion wins over a stale source copy. Modifications require a
/// strictly newer source version; equal timestamps mean "already
/// synced", which is what keeps a pull/push round from looping forever.
#[must_use]
pub fn diff_changes(
    source_current: &Snapshot,
    dest_current: &Snapshot,
    source_last: &Snapshot,
    dest_last: &Snapshot,
    override_all: bool,
) -> Vec<ChangeOp> {
    let mut ops = Vec::new();

    // A key that left the source side since the last run is a delete
    for key in source_last.keys() {
        if !source_current.contains_key(key) {
            ops.push(ChangeOp::Delete { key: key.clone() });
        }
    }

    for (key, resource) in source_current {
        let deleted_on_dest = dest_last.contains_key(key) && !dest_current.contains_key(key);
        if deleted_on_dest && !override_all {
            // Deletion wins over the stale source copy
            continue;
        }

        match dest_current.get(key) {
            None => ops.push(ChangeOp::Create {
                key: key.clone(),
                resource: resource.clone(),
            }),
            Some(existing) => {
                if resource.version > existing.version || override_all {
                    ops.push(ChangeOp::Modify {
                        key: key.clone(),
                        resource: resource.clone(),
                    });
                }
            }
        }
    }

    ops
}
