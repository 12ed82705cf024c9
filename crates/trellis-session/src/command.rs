//! Commands exchanged between peers.
//!
//! A command is executed locally against the [`NodeRegistry`] and then
//! shipped as-is to the other peers, who execute the same value. Rights are
//! checked by the session before a command is built, not by `execute`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use trellis_core::{NodeId, Owner, Result, UserId};
use trellis_graph::NodeRegistry;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Remove a node from the registry.
    Delete { target: NodeId },
    /// Hand a node over to another owner.
    RightChange { target: NodeId, new_owner: Owner },
    /// Disconnect a user from the session.
    Kick { user: UserId },
    /// Replace entries of a user's presence metadata.
    UpdateUserMetadata {
        user: UserId,
        data: HashMap<String, Value>,
    },
}

impl Command {
    /// Apply the command's graph effect.
    ///
    /// `Delete` of an absent node is not an error. `RightChange` fails with
    /// `NotRegistered` when the target is unknown. `Kick` and
    /// `UpdateUserMetadata` leave the registry untouched.
    pub fn execute(&self, registry: &mut NodeRegistry) -> Result<()> {
        match self {
            Command::Delete { target } => {
                if registry.remove(target).is_none() {
                    debug!(node = %target, "delete of unknown node ignored");
                }
                Ok(())
            }
            Command::RightChange { target, new_owner } => {
                registry.try_get_mut(target)?.set_owner(new_owner.clone());
                Ok(())
            }
            Command::Kick { .. } | Command::UpdateUserMetadata { .. } => Ok(()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Delete { .. } => "delete",
            Command::RightChange { .. } => "right_change",
            Command::Kick { .. } => "kick",
            Command::UpdateUserMetadata { .. } => "update_user_metadata",
        }
    }

    /// The node this command acts on, if it acts on one.
    pub fn target(&self) -> Option<NodeId> {
        match self {
            Command::Delete { target } | Command::RightChange { target, .. } => Some(*target),
            Command::Kick { .. } | Command::UpdateUserMetadata { .. } => None,
        }
    }
}
