//! The session facade.
//!
//! A [`Session`] owns the node registry and the orchestrator. Application
//! code registers objects, commits and pushes them, and periodically calls
//! [`Session::flush`] and [`Session::poll`] to exchange data with peers.
//! All registry mutation happens on the task that owns the session; the
//! transport is only reached through the orchestrator's queues.

use crate::command::Command;
use crate::config::{ConnectConfig, HostConfig, SessionConfig};
use crate::error::{Result, SessionError};
use crate::network::Transport;
use crate::orchestrator::{ConnectionState, Inbound, Orchestrator, Outbound, Role};
use crate::presence::OnlineUser;
use crate::snapshot::SessionSnapshot;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use trellis_core::{
    DataFactory, NodeId, NodePayload, NodeState, ObjectRef, Owner, ReplicationError, UserId,
};
use trellis_graph::{NodeRegistry, ReplicatedNode};

/// Events emitted by a session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// A local object was registered.
    NodeAdded { id: NodeId },
    /// A node left the registry, locally or by a remote `Delete`.
    NodeRemoved { id: NodeId },
    /// Remote data arrived for a node.
    NodeFetched { id: NodeId, from: UserId },
    /// Fetched data was written into the application object.
    NodeApplied { id: NodeId },
    OwnerChanged { id: NodeId, owner: Owner },
    UserJoined { user: UserId },
    UserLeft { user: UserId },
    UserKicked { user: UserId },
    UserMetadata { user: UserId },
    StateChanged { state: ConnectionState },
}

impl SessionEvent {
    /// Name under which callbacks for this event are registered.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::NodeAdded { .. } => "node_added",
            SessionEvent::NodeRemoved { .. } => "node_removed",
            SessionEvent::NodeFetched { .. } => "node_fetched",
            SessionEvent::NodeApplied { .. } => "node_applied",
            SessionEvent::OwnerChanged { .. } => "owner_changed",
            SessionEvent::UserJoined { .. } => "user_joined",
            SessionEvent::UserLeft { .. } => "user_left",
            SessionEvent::UserKicked { .. } => "user_kicked",
            SessionEvent::UserMetadata { .. } => "user_metadata",
            SessionEvent::StateChanged { .. } => "state_changed",
        }
    }
}

/// Host-application hook invoked with matching events.
pub type SessionCallback = Box<dyn Fn(&SessionEvent) + Send + Sync>;

/// A replication session.
pub struct Session<T: Transport> {
    config: SessionConfig,
    factory: Arc<dyn DataFactory>,
    registry: NodeRegistry,
    orchestrator: Orchestrator<T>,
    /// Nodes whose apply is deferred until their dependencies arrive.
    stash: Vec<NodeId>,
    callbacks: HashMap<String, SessionCallback>,
    event_tx: broadcast::Sender<SessionEvent>,
    last_state: ConnectionState,
}

impl<T: Transport> Session<T> {
    /// Create a session for `config.user`.
    ///
    /// The transport should speak for the same user id, since peers see
    /// messages under the transport's identity.
    pub fn new(config: SessionConfig, factory: Arc<dyn DataFactory>, transport: Arc<T>) -> Self {
        if transport.local_id() != &config.user {
            warn!(
                user = %config.user,
                transport = %transport.local_id(),
                "transport identity differs from session user"
            );
        }

        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let orchestrator = Orchestrator::new(config.user.clone(), transport);

        Self {
            config,
            factory,
            registry: NodeRegistry::new(),
            orchestrator,
            stash: Vec::new(),
            callbacks: HashMap::new(),
            event_tx,
            last_state: ConnectionState::Initial,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn local_user(&self) -> &UserId {
        &self.config.user
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Orchestrator<T> {
        &self.orchestrator
    }

    pub fn get(&self, id: &NodeId) -> Option<&ReplicatedNode> {
        self.registry.get(id)
    }

    pub fn get_by_reference(&self, object: &ObjectRef) -> Option<&ReplicatedNode> {
        self.registry.get_by_reference(object)
    }

    pub fn list(&self, filter_type: Option<&str>) -> Vec<NodeId> {
        self.registry.list(filter_type)
    }

    pub fn stash(&self) -> &[NodeId] {
        &self.stash
    }

    pub fn state(&self) -> ConnectionState {
        self.orchestrator.state()
    }

    pub fn role(&self) -> Option<Role> {
        self.orchestrator.role()
    }

    pub fn online_users(&self) -> Vec<OnlineUser> {
        self.orchestrator.online_users()
    }

    pub fn is_admin(&self) -> bool {
        self.orchestrator.is_admin(&self.config.user)
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Register `handler` for events named `name`, replacing any previous one.
    pub fn register_callback<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.callbacks.insert(name.into(), Box::new(handler));
    }

    pub fn unregister_callback(&mut self, name: &str) -> bool {
        self.callbacks.remove(name).is_some()
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(callback) = self.callbacks.get(event.name()) {
            callback(&event);
        }
        let _ = self.event_tx.send(event);
    }

    fn track_state(&mut self) {
        let state = self.orchestrator.state();
        if state != self.last_state {
            self.last_state = state;
            self.emit(SessionEvent::StateChanged { state });
        }
    }

    fn authorize(&self, id: &NodeId) -> Result<()> {
        let node = self.registry.try_get(id)?;
        if node.owner().permits(&self.config.user) {
            Ok(())
        } else {
            Err(ReplicationError::NotAuthorized {
                node: *id,
                user: self.config.user.clone(),
            }
            .into())
        }
    }

    fn stash_node(&mut self, id: NodeId) {
        if !self.stash.contains(&id) {
            self.stash.push(id);
        }
    }

    // === Graph operations ===

    /// Register an application object.
    ///
    /// Objects the object depends on (its own `resolve_deps` plus
    /// `dependencies`) are registered first with the same owner; those of an
    /// unsupported type are skipped. Registering an object twice returns the
    /// existing id. `owner` defaults to the local user.
    pub fn add(
        &mut self,
        object: ObjectRef,
        owner: Option<Owner>,
        dependencies: &[ObjectRef],
    ) -> Result<NodeId> {
        if let Some(existing) = self.registry.get_by_reference(&object) {
            return Ok(existing.id());
        }

        let implementation = self
            .factory
            .implementation_for(&object)
            .ok_or_else(|| ReplicationError::UnsupportedType(object.type_name().to_string()))?;
        let owner = owner.unwrap_or_else(|| Owner::User(self.config.user.clone()));

        let mut node = ReplicatedNode::new(NodeId::new(), owner.clone(), implementation);
        node.mark_added();
        let id = node.id();
        let mut references = node.resolve_deps();
        references.extend(dependencies.iter().cloned());

        // Registered before its dependencies so a cycle terminates at this node.
        self.registry.insert(node);

        match self.register_references(&references, &owner) {
            Ok(resolved) => self.registry.try_get_mut(&id)?.set_dependencies(resolved),
            Err(err) => {
                self.registry.remove(&id);
                return Err(err);
            }
        }

        debug!(node = %id, owner = %owner, "registered node");
        self.emit(SessionEvent::NodeAdded { id });
        Ok(id)
    }

    fn register_references(&mut self, references: &[ObjectRef], owner: &Owner) -> Result<Vec<NodeId>> {
        let mut resolved = Vec::with_capacity(references.len());
        for reference in references {
            match self.add(reference.clone(), Some(owner.clone()), &[]) {
                Ok(id) => resolved.push(id),
                Err(SessionError::Replication(ReplicationError::UnsupportedType(type_name))) => {
                    warn!(type_name = %type_name, "skipping dependency of unsupported type");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(resolved)
    }

    /// Recompute a node's dependency edges from its object, registering any
    /// newly referenced objects. Nodes without a local object keep the edges
    /// they were fetched with.
    pub fn evaluate_dependencies(&mut self, id: &NodeId) -> Result<Vec<NodeId>> {
        let node = self.registry.try_get(id)?;
        if node.instance().is_none() {
            return Ok(node.dependencies().to_vec());
        }

        let owner = node.owner().clone();
        let references = node.resolve_deps();
        let resolved = self.register_references(&references, &owner)?;

        let node = self.registry.try_get_mut(id)?;
        node.set_dependencies(resolved);
        Ok(node.dependencies().to_vec())
    }

    /// Record a local change to a node's object.
    pub fn mark_modified(&mut self, id: &NodeId) -> Result<()> {
        self.registry.try_get_mut(id)?.mark_modified();
        Ok(())
    }

    /// Remove a node, and by default its dependency closure.
    ///
    /// Fails with `NotAuthorized` when the local user may not delete the
    /// node itself. Dependencies owned by someone else are skipped.
    pub fn remove(&mut self, id: &NodeId, remove_dependencies: bool) -> Result<()> {
        self.authorize(id)?;

        let mut targets = Vec::new();
        if remove_dependencies {
            for dependency in self.registry.dependencies_ordered(id)? {
                match self.authorize(&dependency) {
                    Ok(()) => targets.push(dependency),
                    Err(_) => {
                        warn!(node = %dependency, "skipping removal of dependency owned by another user")
                    }
                }
            }
        }
        targets.push(*id);

        for target in targets {
            let command = Command::Delete { target };
            command.execute(&mut self.registry)?;
            self.stash.retain(|stashed| stashed != &target);
            self.orchestrator.enqueue(Outbound::Command(command));
            self.emit(SessionEvent::NodeRemoved { id: target });
        }
        Ok(())
    }

    /// Snapshot a node, committing its pending dependencies first.
    pub fn commit(&mut self, id: &NodeId) -> Result<()> {
        self.authorize(id)?;
        if self.registry.try_get(id)?.state().is_committed_or_later() {
            debug!(node = %id, "already committed");
            return Ok(());
        }

        self.evaluate_dependencies(id)?;

        for dependency in self.registry.dependencies_ordered(id)? {
            let Some(node) = self.registry.get_mut(&dependency) else {
                continue;
            };
            if !node.state().is_pending_commit() {
                continue;
            }
            if !node.owner().permits(&self.config.user) {
                debug!(node = %dependency, owner = %node.owner(), "dependency owned by another user left uncommitted");
                continue;
            }
            node.commit()?;
        }

        self.registry.try_get_mut(id)?.commit()?;
        debug!(node = %id, "committed");
        Ok(())
    }

    /// Queue a node's committed snapshot for sending, preceded by its
    /// committed dependencies.
    ///
    /// With `check_data`, a snapshot identical to the last pushed one is not
    /// sent again. Dependencies are always pushed with `check_data`.
    pub fn push(&mut self, id: &NodeId, check_data: bool) -> Result<()> {
        self.authorize(id)?;
        if self.orchestrator.state() == ConnectionState::Disconnected {
            warn!(node = %id, "session is disconnected, push skipped");
            return Ok(());
        }

        let mut payloads: Vec<NodePayload> = Vec::new();
        for dependency in self.registry.dependencies_ordered(id)? {
            let Some(node) = self.registry.get_mut(&dependency) else {
                continue;
            };
            if node.state() != NodeState::Committed || !node.owner().permits(&self.config.user) {
                continue;
            }
            if let Some(payload) = node.push(true)? {
                payloads.push(payload);
            }
        }

        let node = self.registry.try_get_mut(id)?;
        if node.snapshot().is_none() {
            warn!(node = %id, "nothing committed, push skipped");
        } else if let Some(payload) = node.push(check_data)? {
            payloads.push(payload);
        }

        debug!(node = %id, payloads = payloads.len(), "queued push");
        for payload in payloads {
            self.orchestrator.enqueue(Outbound::Node(payload));
        }
        Ok(())
    }

    /// Write fetched data into application objects.
    ///
    /// With an id, applies that node after its dependencies. Without one,
    /// applies every fetched or stashed node in dependency order; per-node
    /// failures are logged. Unmet preconditions are not errors: the node is
    /// left alone, or stashed when a dependency has not arrived yet.
    pub fn apply(&mut self, id: Option<&NodeId>, force: bool, force_dependencies: bool) -> Result<()> {
        if let Some(id) = id {
            return self.apply_node(id, force, force_dependencies);
        }

        let pending: Vec<NodeId> = self
            .registry
            .topological_order()?
            .into_iter()
            .filter(|id| {
                self.stash.contains(id)
                    || self
                        .registry
                        .get(id)
                        .map(|node| node.state() == NodeState::Fetched)
                        .unwrap_or(false)
            })
            .collect();

        for id in pending {
            if let Err(err) = self.apply_node(&id, force, force_dependencies) {
                warn!(node = %id, error = %err, "apply failed");
            }
        }
        Ok(())
    }

    fn apply_node(&mut self, id: &NodeId, force: bool, force_dependencies: bool) -> Result<()> {
        let state = self.registry.try_get(id)?.state();
        if state != NodeState::Fetched && !force {
            debug!(node = %id, state = ?state, "nothing fetched, apply skipped");
            return Ok(());
        }

        let dependencies = self.registry.dependencies_ordered(id)?;
        let waiting = std::iter::once(id)
            .chain(dependencies.iter())
            .filter_map(|n| self.registry.get(n))
            .flat_map(|node| node.dependencies())
            .any(|dependency| !self.registry.contains(dependency));
        if waiting {
            debug!(node = %id, "dependencies not received yet, apply deferred");
            self.stash_node(*id);
            return Ok(());
        }

        for dependency in dependencies {
            let node = self.registry.try_get_mut(&dependency)?;
            if node.state() != NodeState::Fetched && !force_dependencies {
                continue;
            }
            match node.apply(force_dependencies) {
                Ok(true) => self.emit(SessionEvent::NodeApplied { id: dependency }),
                Ok(false) => {}
                Err(ReplicationError::MissingData(_)) => {
                    warn!(node = %dependency, "dependency has no data to apply")
                }
                Err(err) => {
                    warn!(node = %dependency, error = %err, "dependency failed to apply, deferring");
                    self.stash_node(*id);
                    return Ok(());
                }
            }
        }

        match self.registry.try_get_mut(id)?.apply(force) {
            Ok(true) => {
                self.stash.retain(|stashed| stashed != id);
                self.emit(SessionEvent::NodeApplied { id: *id });
            }
            Ok(false) => {}
            Err(ReplicationError::MissingData(_)) => warn!(node = %id, "no data to apply"),
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    /// Hand a node, and by default its dependency closure, to `new_owner`.
    ///
    /// The node itself must be owned by the local user or shared. For
    /// dependencies the local user may not change, `ignore_warnings` skips
    /// them with a warning; otherwise the call fails before anything changes.
    pub fn change_owner(
        &mut self,
        id: &NodeId,
        new_owner: Owner,
        ignore_warnings: bool,
        affect_dependencies: bool,
    ) -> Result<()> {
        self.authorize(id)?;

        let mut targets = Vec::new();
        if affect_dependencies {
            for dependency in self.registry.dependencies_ordered(id)? {
                match self.authorize(&dependency) {
                    Ok(()) => targets.push(dependency),
                    Err(_) if ignore_warnings => {
                        warn!(node = %dependency, "skipping ownership change of dependency owned by another user")
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        targets.push(*id);

        for target in targets {
            let command = Command::RightChange {
                target,
                new_owner: new_owner.clone(),
            };
            command.execute(&mut self.registry)?;
            self.orchestrator.enqueue(Outbound::Command(command));
            self.emit(SessionEvent::OwnerChanged {
                id: target,
                owner: new_owner.clone(),
            });
        }
        info!(node = %id, owner = %new_owner, "ownership changed");
        Ok(())
    }

    // === Users ===

    /// Ask the host to disconnect `user`. Returns whether a kick was queued.
    pub fn kick(&mut self, user: &UserId) -> bool {
        if user == &self.config.user {
            warn!(user = %user, "cannot kick yourself");
            return false;
        }
        if !self.is_admin() {
            warn!(user = %user, "kick refused: local user is not admin");
            return false;
        }
        self.orchestrator
            .enqueue(Outbound::Command(Command::Kick { user: user.clone() }))
    }

    /// Merge entries into the local user's presence metadata and share them.
    pub fn update_user_metadata(&mut self, data: HashMap<String, Value>) -> bool {
        let user = self.config.user.clone();
        self.orchestrator.update_metadata(&user, &data);
        self.emit(SessionEvent::UserMetadata { user: user.clone() });
        self.orchestrator
            .enqueue(Outbound::Command(Command::UpdateUserMetadata { user, data }))
    }

    // === Network ===

    pub async fn host(&mut self, config: &HostConfig) -> Result<()> {
        let result = self.orchestrator.host(config).await;
        self.track_state();
        result.map_err(SessionError::from)
    }

    pub async fn connect(&mut self, config: &ConnectConfig) -> Result<()> {
        let result = self.orchestrator.connect(config).await;
        self.track_state();
        result.map_err(SessionError::from)
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        let result = self.orchestrator.disconnect().await;
        self.track_state();
        result.map_err(SessionError::from)
    }

    /// Send everything queued. Returns how many items went out.
    pub async fn flush(&mut self) -> usize {
        let sent = self.orchestrator.flush().await;
        self.track_state();
        sent
    }

    /// Process everything received since the last poll. Returns how many
    /// inbound items were handled.
    pub async fn poll(&mut self) -> Result<usize> {
        let received = self.orchestrator.poll().await;
        let count = received.len();

        for item in received {
            match item {
                Inbound::Node { from, payload } => self.receive_node(from, payload),
                Inbound::Command { issuer, command } => self.receive_command(issuer, command),
                Inbound::UserJoined(user) => {
                    if self.config.catch_up_joiners && self.orchestrator.is_host() {
                        self.catch_up(&user).await;
                    }
                    self.emit(SessionEvent::UserJoined { user });
                }
                Inbound::UserLeft(user) => self.emit(SessionEvent::UserLeft { user }),
                Inbound::Kicked => self.emit(SessionEvent::UserKicked {
                    user: self.config.user.clone(),
                }),
                Inbound::HostLost => info!("host left the session"),
            }
        }
        self.track_state();

        if self.config.auto_apply {
            self.apply(None, false, false)?;
        }
        Ok(count)
    }

    fn receive_node(&mut self, from: UserId, payload: NodePayload) {
        let id = payload.id;
        match self.registry.get_mut(&id) {
            Some(node) => node.fetch(payload),
            None => {
                let Some(implementation) = self.factory.implementation_for_type(&payload.str_type)
                else {
                    warn!(node = %id, str_type = %payload.str_type, "received node of unsupported type");
                    return;
                };
                let mut node = ReplicatedNode::new(id, payload.owner.clone(), implementation);
                node.fetch(payload);
                self.registry.insert(node);
            }
        }
        debug!(node = %id, from = %from, "fetched node");
        self.emit(SessionEvent::NodeFetched { id, from });
    }

    fn receive_command(&mut self, issuer: UserId, command: Command) {
        if let Err(err) = command.execute(&mut self.registry) {
            debug!(issuer = %issuer, command = command.name(), error = %err, "remote command had no effect");
            return;
        }

        match command {
            Command::Delete { target } => {
                self.stash.retain(|stashed| stashed != &target);
                self.emit(SessionEvent::NodeRemoved { id: target });
            }
            Command::RightChange { target, new_owner } => self.emit(SessionEvent::OwnerChanged {
                id: target,
                owner: new_owner,
            }),
            Command::Kick { user } => self.emit(SessionEvent::UserKicked { user }),
            Command::UpdateUserMetadata { user, .. } => {
                self.emit(SessionEvent::UserMetadata { user })
            }
        }
    }

    /// Send every node to a user who just joined, with the newest data held
    /// for it: fetched data not applied yet wins over the committed snapshot.
    async fn catch_up(&self, user: &UserId) {
        let order = match self.registry.topological_order() {
            Ok(order) => order,
            Err(err) => {
                warn!(user = %user, error = %err, "cannot order nodes for catch-up");
                return;
            }
        };
        let payloads: Vec<NodePayload> = order
            .iter()
            .filter_map(|id| self.registry.get(id))
            .filter_map(|node| node.latest_payload())
            .collect();
        if payloads.is_empty() {
            return;
        }

        let count = payloads.len();
        match self.orchestrator.send_nodes(user, payloads).await {
            Ok(()) => debug!(user = %user, nodes = count, "sent catch-up"),
            Err(err) => warn!(user = %user, error = %err, "catch-up failed"),
        }
    }

    // === Persistence ===

    /// Archive all nodes and online users next to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        SessionSnapshot::capture(&self.registry, self.online_users()).save(path)
    }
}
