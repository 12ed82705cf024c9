//! Node lifecycle states.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a replicated node.
///
/// Local side: `Initial -> Added -> Modified <-> Committed`.
/// Receiving side: an incoming payload moves the node to `Fetched`; applying
/// it brings the node back to `Committed`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Just constructed, nothing recorded yet.
    #[default]
    Initial,
    /// Registered locally, not yet snapshotted.
    Added,
    /// Local change recorded since the last commit.
    Modified,
    /// Snapshot taken; the node is quiescent.
    Committed,
    /// Remote payload received, not yet written to the application object.
    Fetched,
}

impl NodeState {
    /// States whose data has not been snapshotted yet.
    pub fn is_pending_commit(&self) -> bool {
        matches!(self, NodeState::Initial | NodeState::Added | NodeState::Modified)
    }

    /// Committed, or later in the lifecycle.
    pub fn is_committed_or_later(&self) -> bool {
        matches!(self, NodeState::Committed | NodeState::Fetched)
    }
}
