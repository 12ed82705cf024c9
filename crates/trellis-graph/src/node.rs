//! The unit of replication.
//!
//! A [`ReplicatedNode`] wraps one application object through its
//! [`NodeImplementation`] and carries the replication metadata: owner,
//! lifecycle state, dependency edges, the last committed snapshot and any
//! remote payload waiting to be applied.

use crate::digest::DataDigest;
use serde_json::Value;
use std::fmt;
use trellis_core::{
    NodeId, NodeImplementation, NodePayload, NodeState, ObjectRef, Owner, ReplicationError, Result,
};

/// A replicated node in the session graph.
pub struct ReplicatedNode {
    id: NodeId,
    owner: Owner,
    state: NodeState,
    dependencies: Vec<NodeId>,
    implementation: Box<dyn NodeImplementation>,

    /// Data captured by the last commit (or the last apply).
    snapshot: Option<Value>,

    /// Remote data received but not yet written to the object.
    fetched: Option<Value>,

    /// Fingerprint of the last pushed snapshot.
    pushed_digest: Option<DataDigest>,
}

impl ReplicatedNode {
    /// Create a node in the `Initial` state.
    pub fn new(id: NodeId, owner: Owner, implementation: Box<dyn NodeImplementation>) -> Self {
        Self {
            id,
            owner,
            state: NodeState::Initial,
            dependencies: Vec::new(),
            implementation,
            snapshot: None,
            fetched: None,
            pushed_digest: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn set_owner(&mut self, owner: Owner) {
        self.owner = owner;
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn dependencies(&self) -> &[NodeId] {
        &self.dependencies
    }

    /// Replace the dependency edges, keeping first-seen order and dropping
    /// duplicates and self references.
    pub fn set_dependencies(&mut self, dependencies: impl IntoIterator<Item = NodeId>) {
        self.dependencies.clear();
        for dependency in dependencies {
            if dependency != self.id && !self.dependencies.contains(&dependency) {
                self.dependencies.push(dependency);
            }
        }
    }

    pub(crate) fn drop_dependency(&mut self, id: &NodeId) {
        self.dependencies.retain(|d| d != id);
    }

    pub fn str_type(&self) -> &str {
        self.implementation.str_type()
    }

    pub fn instance(&self) -> Option<ObjectRef> {
        self.implementation.instance()
    }

    /// Application objects the wrapped object currently depends on.
    pub fn resolve_deps(&self) -> Vec<ObjectRef> {
        self.implementation.resolve_deps()
    }

    /// Read the wrapped object's current state without committing it.
    pub fn dump(&self) -> Result<Value> {
        self.implementation.dump()
    }

    pub fn snapshot(&self) -> Option<&Value> {
        self.snapshot.as_ref()
    }

    pub fn fetched(&self) -> Option<&Value> {
        self.fetched.as_ref()
    }

    /// Record that the node was registered locally.
    pub fn mark_added(&mut self) {
        if self.state == NodeState::Initial {
            self.state = NodeState::Added;
        }
    }

    /// Record a local change to the wrapped object.
    pub fn mark_modified(&mut self) {
        if self.state != NodeState::Fetched {
            self.state = NodeState::Modified;
        }
    }

    /// Snapshot the wrapped object.
    ///
    /// Returns `false` without touching anything when the node is already
    /// `Committed`, or `Fetched` (remote data must be applied first).
    pub fn commit(&mut self) -> Result<bool> {
        if self.state.is_committed_or_later() {
            return Ok(false);
        }

        let data = self.implementation.dump()?;
        self.snapshot = Some(data);
        self.state = NodeState::Committed;
        Ok(true)
    }

    /// Build the payload to send for this node.
    ///
    /// With `check_data`, returns `None` when the snapshot is identical to the
    /// one pushed last time.
    pub fn push(&mut self, check_data: bool) -> Result<Option<NodePayload>> {
        let data = self
            .snapshot
            .as_ref()
            .ok_or(ReplicationError::MissingData(self.id))?;
        let digest = DataDigest::compute(data, &self.dependencies)?;

        if check_data && self.pushed_digest == Some(digest) {
            return Ok(None);
        }

        self.pushed_digest = Some(digest);
        Ok(self.to_payload())
    }

    /// Store a remote payload without touching the wrapped object.
    pub fn fetch(&mut self, payload: NodePayload) {
        self.owner = payload.owner;
        self.set_dependencies(payload.dependencies);
        self.fetched = Some(payload.data);
        self.state = NodeState::Fetched;
    }

    /// Write fetched data into the wrapped object.
    ///
    /// Without `force` this only proceeds from `Fetched`; forcing re-applies the
    /// pending payload, or the last snapshot when nothing is pending. Returns
    /// `false` when the precondition is not met.
    pub fn apply(&mut self, force: bool) -> Result<bool> {
        if self.state != NodeState::Fetched && !force {
            return Ok(false);
        }

        let (data, from_fetch) = match self.fetched.take() {
            Some(data) => (data, true),
            None => match self.snapshot.clone() {
                Some(data) => (data, false),
                None => return Err(ReplicationError::MissingData(self.id)),
            },
        };

        if let Err(err) = self.implementation.load(&data) {
            if from_fetch {
                self.fetched = Some(data);
            }
            return Err(err);
        }

        // Applied data is what the rest of the session already holds.
        self.pushed_digest = Some(DataDigest::compute(&data, &self.dependencies)?);
        self.snapshot = Some(data);
        self.state = NodeState::Committed;
        Ok(true)
    }

    /// Payload view of the committed snapshot.
    pub fn to_payload(&self) -> Option<NodePayload> {
        self.snapshot.as_ref().map(|data| self.payload_with(data))
    }

    /// Payload view of the newest data held: a fetched payload not applied
    /// yet, else the committed snapshot.
    pub fn latest_payload(&self) -> Option<NodePayload> {
        self.fetched
            .as_ref()
            .or(self.snapshot.as_ref())
            .map(|data| self.payload_with(data))
    }

    fn payload_with(&self, data: &Value) -> NodePayload {
        NodePayload {
            id: self.id,
            owner: self.owner.clone(),
            str_type: self.str_type().to_string(),
            data: data.clone(),
            dependencies: self.dependencies.clone(),
        }
    }
}

impl fmt::Debug for ReplicatedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicatedNode")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("str_type", &self.str_type())
            .field("state", &self.state)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}
