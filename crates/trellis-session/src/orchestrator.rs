//! Network role, outbound queue and user table of a session.
//!
//! The orchestrator sits between the session's registry and the transport.
//! The session places pushes and commands on the [`OutboundQueue`];
//! [`Orchestrator::flush`] is the single consumer that hands them to the
//! transport. [`Orchestrator::poll`] drains whatever the transport delivered,
//! maintains the online-user table, relays traffic when hosting, and returns
//! the items the session has to apply.

use crate::command::Command;
use crate::config::{ConnectConfig, HostConfig};
use crate::network::{Message, NetworkError, Transport};
use crate::presence::{OnlineUser, UserTable};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use trellis_core::{NodePayload, UserId};

/// Topology of the local peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Accepts connections and relays between clients.
    Host,
    /// Single connection to a host.
    Client,
}

/// Lifecycle of the session's connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected. Work is queued until a connection exists.
    #[default]
    Initial,
    Connecting,
    Ready,
    /// Connection lost, refused or closed; the session is read-only.
    Disconnected,
}

/// An item waiting to be sent.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Node(NodePayload),
    Command(Command),
}

/// Multi-producer, single-consumer queue of items to push.
#[derive(Clone, Debug, Default)]
pub struct OutboundQueue {
    items: Arc<Mutex<VecDeque<Outbound>>>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: Outbound) {
        self.items.lock().push_back(item);
    }

    /// Copy of the oldest item. It stays queued until [`pop_front`](Self::pop_front).
    pub fn front(&self) -> Option<Outbound> {
        self.items.lock().front().cloned()
    }

    pub fn pop_front(&self) -> Option<Outbound> {
        self.items.lock().pop_front()
    }

    /// Copy of the queued items, oldest first.
    pub fn snapshot(&self) -> Vec<Outbound> {
        self.items.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// Something received that the session must act on.
#[derive(Clone, Debug)]
pub enum Inbound {
    Node { from: UserId, payload: NodePayload },
    Command { issuer: UserId, command: Command },
    UserJoined(UserId),
    UserLeft(UserId),
    /// The local user was kicked by the host.
    Kicked,
    /// The host went away.
    HostLost,
}

/// Owns the network role and bridges the session to the transport.
pub struct Orchestrator<T: Transport> {
    local_user: UserId,
    transport: Arc<T>,
    role: Option<Role>,
    host_id: Option<UserId>,
    admins: Vec<UserId>,
    state: Arc<RwLock<ConnectionState>>,
    users: Arc<RwLock<UserTable>>,
    outbound: OutboundQueue,
    inbound: Option<mpsc::UnboundedReceiver<(UserId, Message)>>,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(local_user: UserId, transport: Arc<T>) -> Self {
        Self {
            local_user,
            transport,
            role: None,
            host_id: None,
            admins: Vec::new(),
            state: Arc::new(RwLock::new(ConnectionState::Initial)),
            users: Arc::new(RwLock::new(UserTable::new())),
            outbound: OutboundQueue::new(),
            inbound: None,
        }
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    pub fn is_host(&self) -> bool {
        self.role == Some(Role::Host)
    }

    pub fn online_users(&self) -> Vec<OnlineUser> {
        self.users.read().to_vec()
    }

    pub fn user(&self, id: &UserId) -> Option<OnlineUser> {
        self.users.read().get(id).cloned()
    }

    /// Whether `id` has admin rights. The host always has them.
    pub fn is_admin(&self, id: &UserId) -> bool {
        (self.is_host() && id == &self.local_user) || self.users.read().is_admin(id)
    }

    pub fn outbound(&self) -> &OutboundQueue {
        &self.outbound
    }

    /// Queue an item unless the session is disconnected.
    pub fn enqueue(&self, item: Outbound) -> bool {
        if self.state() == ConnectionState::Disconnected {
            return false;
        }
        self.outbound.push(item);
        true
    }

    /// Merge metadata into a user's entry in the local table.
    pub fn update_metadata(
        &self,
        user: &UserId,
        data: &std::collections::HashMap<String, serde_json::Value>,
    ) -> bool {
        self.users.write().update_metadata(user, data)
    }

    fn take_inbound(&mut self) {
        if self.inbound.is_none() {
            self.inbound = self.transport.subscribe();
        }
    }

    /// Start hosting.
    pub async fn host(&mut self, config: &HostConfig) -> Result<(), NetworkError> {
        self.set_state(ConnectionState::Connecting);

        let result = tokio::time::timeout(config.timeout, self.transport.host(config)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(err);
            }
            Err(_) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(NetworkError::Timeout);
            }
        }

        self.take_inbound();
        self.role = Some(Role::Host);
        self.host_id = Some(self.local_user.clone());
        self.admins = config.admins.clone();
        {
            let mut users = self.users.write();
            users.clear();
            users.join(OnlineUser::new(self.local_user.clone(), true));
        }
        self.set_state(ConnectionState::Ready);
        info!(user = %self.local_user, port = config.port, "hosting session");
        Ok(())
    }

    /// Join a hosted session.
    pub async fn connect(&mut self, config: &ConnectConfig) -> Result<(), NetworkError> {
        self.set_state(ConnectionState::Connecting);

        let host_id =
            match tokio::time::timeout(config.timeout, self.transport.connect(config)).await {
                Ok(Ok(host_id)) => host_id,
                Ok(Err(err)) => {
                    warn!(address = %config.address, port = config.port, error = %err, "connection failed");
                    self.set_state(ConnectionState::Disconnected);
                    return Err(err);
                }
                Err(_) => {
                    warn!(address = %config.address, port = config.port, "connection timed out");
                    self.set_state(ConnectionState::Disconnected);
                    return Err(NetworkError::Timeout);
                }
            };

        self.take_inbound();
        let hello = Message::Hello {
            user: self.local_user.clone(),
        };
        if let Err(err) = self.transport.send(&host_id, hello).await {
            self.set_state(ConnectionState::Disconnected);
            return Err(err);
        }

        self.role = Some(Role::Client);
        self.host_id = Some(host_id.clone());
        self.set_state(ConnectionState::Ready);
        info!(user = %self.local_user, host = %host_id, "joined session");
        Ok(())
    }

    /// Leave the session.
    pub async fn disconnect(&mut self) -> Result<(), NetworkError> {
        let result = self.transport.disconnect().await;
        self.users.write().clear();
        self.set_state(ConnectionState::Disconnected);
        info!(user = %self.local_user, "left session");
        result
    }

    /// Send every queued item. Returns how many were sent.
    ///
    /// Items leave the queue only once the transport accepted them, so a
    /// failed or cancelled flush keeps everything unsent. A transport failure
    /// marks the session `Disconnected`.
    pub async fn flush(&mut self) -> usize {
        if self.state() != ConnectionState::Ready {
            return 0;
        }

        let mut sent = 0;
        while let Some(item) = self.outbound.front() {
            let result = match &item {
                Outbound::Node(payload) => self.transport.broadcast(Message::Node(payload.clone())).await,
                Outbound::Command(Command::Kick { user }) if self.is_host() => {
                    self.kick_peer(user).await;
                    Ok(())
                }
                Outbound::Command(command) => {
                    self.transport
                        .broadcast(Message::Command {
                            issuer: self.local_user.clone(),
                            command: command.clone(),
                        })
                        .await
                }
            };

            match result {
                Ok(()) => sent += 1,
                // A host has no upstream; with no client left the item has nowhere to go.
                Err(err) if self.is_host() => warn!(error = %err, "no client reachable, item dropped"),
                Err(err) => {
                    warn!(error = %err, queued = self.outbound.len(), "flush failed; session is now read-only");
                    self.set_state(ConnectionState::Disconnected);
                    return sent;
                }
            }
            self.outbound.pop_front();
        }

        if self.is_host() {
            self.prune_departed().await;
        }
        sent
    }

    /// Send node payloads to one peer, e.g. a user who just joined.
    pub async fn send_nodes(&self, peer: &UserId, payloads: Vec<NodePayload>) -> Result<(), NetworkError> {
        for payload in payloads {
            self.transport.send(peer, Message::Node(payload)).await?;
        }
        Ok(())
    }

    async fn kick_peer(&self, user: &UserId) {
        if user == &self.local_user {
            warn!("host cannot kick itself");
            return;
        }
        if self.users.write().leave(user).is_none() {
            debug!(user = %user, "kick of user not in session");
        }
        let _ = self.transport.send(user, Message::Kicked).await;
        let _ = self.transport.drop_peer(user).await;
        self.broadcast_users().await;
        info!(user = %user, "kicked user");
    }

    /// Drop users whose connection the transport no longer has.
    async fn prune_departed(&self) {
        let connected: Vec<UserId> = self
            .transport
            .connected_peers()
            .await
            .into_iter()
            .map(|peer| peer.id)
            .collect();
        let departed: Vec<UserId> = self
            .users
            .read()
            .to_vec()
            .into_iter()
            .map(|user| user.id)
            .filter(|id| id != &self.local_user && !connected.contains(id))
            .collect();
        if departed.is_empty() {
            return;
        }

        {
            let mut users = self.users.write();
            for id in &departed {
                users.leave(id);
            }
        }
        info!(users = ?departed, "dropped unreachable users");
        self.broadcast_users().await;
    }

    async fn broadcast_users(&self) {
        let users = self.users.read().to_vec();
        if let Err(err) = self.transport.broadcast(Message::Users { users }).await {
            warn!(error = %err, "failed to broadcast user table");
        }
    }

    /// Relay a message from `origin` to every other connected peer.
    async fn relay(&self, origin: &UserId, message: &Message) {
        for peer in self.transport.connected_peers().await {
            if &peer.id == origin {
                continue;
            }
            if let Err(err) = self.transport.send(&peer.id, message.clone()).await {
                warn!(peer = %peer.id, error = %err, "relay failed");
            }
        }
    }

    /// Drain everything the transport has delivered so far.
    pub async fn poll(&mut self) -> Vec<Inbound> {
        let mut received = Vec::new();
        while let Some((from, message)) = self.try_next() {
            if let Some(item) = self.handle(from, message).await {
                received.push(item);
            }
        }
        received
    }

    fn try_next(&mut self) -> Option<(UserId, Message)> {
        self.inbound.as_mut()?.try_recv().ok()
    }

    async fn handle(&mut self, from: UserId, message: Message) -> Option<Inbound> {
        if self.is_host() && !matches!(message, Message::Hello { .. }) && !self.users.read().contains(&from) {
            debug!(peer = %from, "ignoring message from user not in session");
            return None;
        }

        match message {
            Message::Hello { user } => {
                if !self.is_host() {
                    return None;
                }
                let admin = self.admins.contains(&user);
                self.users.write().join(OnlineUser::new(user.clone(), admin));
                self.broadcast_users().await;
                info!(user = %user, admin, "user joined");
                Some(Inbound::UserJoined(user))
            }
            Message::Users { users } => {
                if self.is_host() {
                    return None;
                }
                self.users.write().replace(users);
                None
            }
            Message::Node(payload) => {
                if self.is_host() {
                    self.relay(&from, &Message::Node(payload.clone())).await;
                }
                Some(Inbound::Node { from, payload })
            }
            Message::Command { issuer, command } => {
                if let Command::Kick { user } = &command {
                    if !self.is_host() {
                        return None;
                    }
                    if !self.users.read().is_admin(&from) {
                        warn!(issuer = %from, target = %user, "kick refused: issuer is not admin");
                        return None;
                    }
                    self.kick_peer(user).await;
                    return Some(Inbound::Command { issuer, command });
                }

                if let Command::UpdateUserMetadata { user, data } = &command {
                    self.users.write().update_metadata(user, data);
                }
                if self.is_host() {
                    let relayed = Message::Command {
                        issuer: issuer.clone(),
                        command: command.clone(),
                    };
                    self.relay(&from, &relayed).await;
                }
                Some(Inbound::Command { issuer, command })
            }
            Message::Kicked => {
                if self.is_host() {
                    return None;
                }
                warn!(user = %self.local_user, "kicked from session");
                let _ = self.transport.disconnect().await;
                self.users.write().clear();
                self.set_state(ConnectionState::Disconnected);
                Some(Inbound::Kicked)
            }
            Message::Goodbye { user } => {
                if self.is_host() {
                    self.users.write().leave(&user);
                    let _ = self.transport.drop_peer(&user).await;
                    self.broadcast_users().await;
                    info!(user = %user, "user left");
                    Some(Inbound::UserLeft(user))
                } else if self.host_id.as_ref() == Some(&user) {
                    warn!(host = %user, "host closed the session");
                    let _ = self.transport.disconnect().await;
                    self.users.write().clear();
                    self.set_state(ConnectionState::Disconnected);
                    Some(Inbound::HostLost)
                } else {
                    None
                }
            }
        }
    }
}
