//! Node identifiers, user identifiers and the owner model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Unique identifier of a replicated node.
///
/// Assigned once when the node is created and used both as the registry key
/// and as the wire identifier. ULIDs sort by creation time, which gives the
/// registry a deterministic iteration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Ulid);

impl NodeId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Truncated display (last 8 chars, the random part).
    pub fn short(&self) -> String {
        let full = self.0.to_string();
        full[full.len() - 8..].to_string()
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(NodeId)
    }
}

/// Unique identifier for a user taking part in a session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Owner of a node: one concrete user, or the shared sentinel that lets any
/// peer mutate the node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Owner {
    Shared,
    User(UserId),
}

impl Owner {
    pub fn user(id: impl Into<UserId>) -> Self {
        Owner::User(id.into())
    }

    /// Whether `user` may commit, push, delete or re-own a node with this owner.
    pub fn permits(&self, user: &UserId) -> bool {
        match self {
            Owner::Shared => true,
            Owner::User(owner) => owner == user,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Owner::Shared)
    }

    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Owner::Shared => None,
            Owner::User(id) => Some(id),
        }
    }
}

impl From<UserId> for Owner {
    fn from(id: UserId) -> Self {
        Owner::User(id)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Shared => write!(f, "<shared>"),
            Owner::User(id) => write!(f, "{}", id),
        }
    }
}
