//! Wire and persisted representation of a node.

use crate::ids::{NodeId, Owner};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A committed node as sent to peers and stored in session archives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodePayload {
    pub id: NodeId,
    pub owner: Owner,
    pub str_type: String,
    pub data: Value,
    pub dependencies: Vec<NodeId>,
}

