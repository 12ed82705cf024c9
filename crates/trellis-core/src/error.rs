//! Error types shared by the registry and session layers.

use crate::ids::{NodeId, UserId};
use thiserror::Error;

/// Errors raised by replication operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicationError {
    #[error("User {user} is not allowed to modify node {node}")]
    NotAuthorized { node: NodeId, user: UserId },

    #[error("No node implementation for type: {0}")]
    UnsupportedType(String),

    #[error("Node not registered: {0}")]
    NotRegistered(NodeId),

    #[error("Cyclic dependency detected at node {0}")]
    CyclicDependency(NodeId),

    #[error("Node {0} has no data to push or apply")]
    MissingData(NodeId),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Implementation error: {0}")]
    Implementation(String),
}

impl From<serde_json::Error> for ReplicationError {
    fn from(err: serde_json::Error) -> Self {
        ReplicationError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReplicationError>;
