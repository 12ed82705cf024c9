//! Network transport abstractions for session replication.

use crate::command::Command;
use crate::config::{ConnectConfig, HostConfig};
use crate::presence::OnlineUser;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use trellis_core::{NodePayload, UserId};

/// Peer connection state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerState {
    Disconnected,
    Connecting,
    Connected,
}

/// Information about a connected peer.
#[derive(Clone, Debug)]
pub struct Peer {
    pub id: UserId,
    pub name: String,
    pub state: PeerState,
}

impl Peer {
    fn connected(id: &UserId) -> Self {
        Self {
            id: id.clone(),
            name: id.0.clone(),
            state: PeerState::Connected,
        }
    }
}

/// Messages exchanged between peers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    /// Client announces itself to the host.
    Hello { user: UserId },
    /// Host's view of the online users.
    Users { users: Vec<OnlineUser> },
    /// A pushed node.
    Node(NodePayload),
    /// A command issued by `issuer`.
    Command { issuer: UserId, command: Command },
    /// Host tells a client it was kicked.
    Kicked,
    /// Peer is leaving.
    Goodbye { user: UserId },
}

/// Network error type.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Port already in use: {0}")]
    AddressInUse(u16),
    #[error("Peer not found: {0}")]
    PeerNotFound(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Timed out")]
    Timeout,
    #[error("Disconnected")]
    Disconnected,
}

/// Message-passing transport a session replicates over.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Identity this transport speaks for.
    fn local_id(&self) -> &UserId;

    /// Start accepting connections.
    async fn host(&self, config: &HostConfig) -> Result<(), NetworkError>;

    /// Join a hosted session, returning the host's id.
    async fn connect(&self, config: &ConnectConfig) -> Result<UserId, NetworkError>;

    /// Leave the session (or stop hosting it).
    async fn disconnect(&self) -> Result<(), NetworkError>;

    /// Stop talking to one peer.
    async fn drop_peer(&self, peer: &UserId) -> Result<(), NetworkError>;

    /// Send a message to a specific peer.
    async fn send(&self, peer: &UserId, message: Message) -> Result<(), NetworkError>;

    /// Broadcast a message to all connected peers.
    async fn broadcast(&self, message: Message) -> Result<(), NetworkError>;

    /// Get list of connected peers.
    async fn connected_peers(&self) -> Vec<Peer>;

    /// Take the incoming message stream. Returns `None` once taken.
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<(UserId, Message)>>;
}

type Envelope = (UserId, Message);
/// Type alias for the message receiver shared across threads.
type SharedMessageReceiver = Arc<RwLock<Option<mpsc::UnboundedReceiver<Envelope>>>>;
/// Type alias for the outgoing message senders shared across threads.
type SharedOutgoing = Arc<RwLock<HashMap<UserId, mpsc::UnboundedSender<Envelope>>>>;
type SharedPeers = Arc<RwLock<HashMap<UserId, Peer>>>;

/// What a listening host exposes to connecting clients.
#[derive(Clone)]
struct HostEndpoint {
    host_id: UserId,
    password: Option<String>,
    inbox: mpsc::UnboundedSender<Envelope>,
    peers: SharedPeers,
    outgoing: SharedOutgoing,
}

/// In-process stand-in for the network: hosts listen on a port number and
/// clients connect to it.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<RwLock<HashMap<u16, HostEndpoint>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport attached to this network.
    pub fn transport(&self, local_id: impl Into<UserId>) -> MemoryTransport {
        MemoryTransport::new(local_id.into(), self.clone())
    }

    pub fn is_listening(&self, port: u16) -> bool {
        self.endpoints.read().contains_key(&port)
    }
}

/// In-memory transport for testing and simulation.
///
/// Inboxes are unbounded: a send never waits for the receiving session to
/// poll, so peers driven from one task cannot block each other.
pub struct MemoryTransport {
    local_id: UserId,
    network: MemoryNetwork,
    peers: SharedPeers,
    message_tx: mpsc::UnboundedSender<Envelope>,
    message_rx: SharedMessageReceiver,
    outgoing: SharedOutgoing,
    hosted_port: RwLock<Option<u16>>,
}

impl MemoryTransport {
    pub fn new(local_id: UserId, network: MemoryNetwork) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            local_id,
            network,
            peers: Arc::new(RwLock::new(HashMap::new())),
            message_tx: tx,
            message_rx: Arc::new(RwLock::new(Some(rx))),
            outgoing: Arc::new(RwLock::new(HashMap::new())),
            hosted_port: RwLock::new(None),
        }
    }

    fn forget(&self, peer: &UserId) {
        self.peers.write().remove(peer);
        self.outgoing.write().remove(peer);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_id(&self) -> &UserId {
        &self.local_id
    }

    async fn host(&self, config: &HostConfig) -> Result<(), NetworkError> {
        let mut endpoints = self.network.endpoints.write();
        if endpoints.contains_key(&config.port) {
            return Err(NetworkError::AddressInUse(config.port));
        }

        endpoints.insert(
            config.port,
            HostEndpoint {
                host_id: self.local_id.clone(),
                password: config.password.clone(),
                inbox: self.message_tx.clone(),
                peers: self.peers.clone(),
                outgoing: self.outgoing.clone(),
            },
        );
        *self.hosted_port.write() = Some(config.port);
        Ok(())
    }

    async fn connect(&self, config: &ConnectConfig) -> Result<UserId, NetworkError> {
        let endpoint = self
            .network
            .endpoints
            .read()
            .get(&config.port)
            .cloned()
            .ok_or_else(|| {
                NetworkError::ConnectionFailed(format!(
                    "no host listening on {}:{}",
                    config.address, config.port
                ))
            })?;

        if endpoint.password.is_some() && endpoint.password != config.password {
            return Err(NetworkError::AuthenticationFailed);
        }
        if endpoint.host_id == self.local_id {
            return Err(NetworkError::ConnectionFailed(
                "cannot connect to own session".to_string(),
            ));
        }

        // Host side learns about us
        endpoint
            .peers
            .write()
            .insert(self.local_id.clone(), Peer::connected(&self.local_id));
        endpoint
            .outgoing
            .write()
            .insert(self.local_id.clone(), self.message_tx.clone());

        // We learn about the host
        self.peers
            .write()
            .insert(endpoint.host_id.clone(), Peer::connected(&endpoint.host_id));
        self.outgoing
            .write()
            .insert(endpoint.host_id.clone(), endpoint.inbox.clone());

        Ok(endpoint.host_id)
    }

    async fn disconnect(&self) -> Result<(), NetworkError> {
        let _ = self
            .broadcast(Message::Goodbye {
                user: self.local_id.clone(),
            })
            .await;

        self.peers.write().clear();
        self.outgoing.write().clear();
        if let Some(port) = self.hosted_port.write().take() {
            self.network.endpoints.write().remove(&port);
        }
        Ok(())
    }

    async fn drop_peer(&self, peer: &UserId) -> Result<(), NetworkError> {
        self.forget(peer);
        Ok(())
    }

    async fn send(&self, peer: &UserId, message: Message) -> Result<(), NetworkError> {
        let tx = {
            let outgoing = self.outgoing.read();
            outgoing.get(peer).cloned()
        };

        let Some(tx) = tx else {
            return Err(NetworkError::PeerNotFound(peer.to_string()));
        };
        if tx.send((self.local_id.clone(), message)).is_err() {
            self.forget(peer);
            return Err(NetworkError::SendFailed(format!("{} is gone", peer)));
        }
        Ok(())
    }

    /// Send to every connected peer. Peers whose inbox is closed are
    /// dropped; fails with `Disconnected` when none of the peers was reached.
    async fn broadcast(&self, message: Message) -> Result<(), NetworkError> {
        let senders: Vec<_> = {
            let outgoing = self.outgoing.read();
            outgoing
                .iter()
                .map(|(id, tx)| (id.clone(), tx.clone()))
                .collect()
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (peer, tx) in senders {
            if tx.send((self.local_id.clone(), message.clone())).is_ok() {
                delivered += 1;
            } else {
                dead.push(peer);
            }
        }

        for peer in &dead {
            self.forget(peer);
        }
        if delivered == 0 && !dead.is_empty() {
            return Err(NetworkError::Disconnected);
        }
        Ok(())
    }

    async fn connected_peers(&self) -> Vec<Peer> {
        self.peers.read().values().cloned().collect()
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<Envelope>> {
        self.message_rx.write().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectConfigBuilder, HostConfigBuilder};

    #[tokio::test]
    async fn test_host_and_connect() {
        let network = MemoryNetwork::new();
        let host = network.transport("host");
        let client = network.transport("client");

        host.host(&HostConfigBuilder::new().port(7001).build())
            .await
            .unwrap();
        assert!(network.is_listening(7001));

        let host_id = client
            .connect(&ConnectConfigBuilder::new().port(7001).build())
            .await
            .unwrap();
        assert_eq!(host_id, UserId::new("host"));

        assert_eq!(host.connected_peers().await.len(), 1);
        assert_eq!(client.connected_peers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failures() {
        let network = MemoryNetwork::new();
        let host = network.transport("host");
        let client = network.transport("client");

        let missing = client
            .connect(&ConnectConfigBuilder::new().port(7002).build())
            .await;
        assert!(matches!(missing, Err(NetworkError::ConnectionFailed(_))));

        host.host(&HostConfigBuilder::new().port(7002).password("pw").build())
            .await
            .unwrap();

        let wrong = client
            .connect(&ConnectConfigBuilder::new().port(7002).password("nope").build())
            .await;
        assert_eq!(wrong, Err(NetworkError::AuthenticationFailed));

        let other_host = network.transport("other");
        let taken = other_host
            .host(&HostConfigBuilder::new().port(7002).build())
            .await;
        assert_eq!(taken, Err(NetworkError::AddressInUse(7002)));
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let network = MemoryNetwork::new();
        let host = network.transport("host");
        let client = network.transport("client");
        host.host(&HostConfigBuilder::new().port(7003).build())
            .await
            .unwrap();
        client
            .connect(&ConnectConfigBuilder::new().port(7003).build())
            .await
            .unwrap();

        let mut host_rx = host.subscribe().unwrap();
        let mut client_rx = client.subscribe().unwrap();
        assert!(host.subscribe().is_none());

        client
            .send(
                &UserId::new("host"),
                Message::Hello {
                    user: UserId::new("client"),
                },
            )
            .await
            .unwrap();
        let (from, message) = host_rx.recv().await.unwrap();
        assert_eq!(from, UserId::new("client"));
        assert!(matches!(message, Message::Hello { .. }));

        host.broadcast(Message::Kicked).await.unwrap();
        let (_, message) = client_rx.recv().await.unwrap();
        assert!(matches!(message, Message::Kicked));
    }

    #[tokio::test]
    async fn test_closed_inbox_is_reported() {
        let network = MemoryNetwork::new();
        let host = network.transport("host");
        let client = network.transport("client");
        host.host(&HostConfigBuilder::new().port(7005).build())
            .await
            .unwrap();
        client
            .connect(&ConnectConfigBuilder::new().port(7005).build())
            .await
            .unwrap();

        // Many messages nobody reads yet do not block the sender.
        let host_rx = host.subscribe().unwrap();
        for _ in 0..2000 {
            client.broadcast(Message::Kicked).await.unwrap();
        }

        drop(host_rx);
        assert_eq!(
            client.broadcast(Message::Kicked).await,
            Err(NetworkError::Disconnected)
        );
        assert!(client.connected_peers().await.is_empty());
        assert!(matches!(
            client.send(&UserId::new("host"), Message::Kicked).await,
            Err(NetworkError::PeerNotFound(_))
        ));

        // Nobody left to reach is not a failure.
        assert_eq!(client.broadcast(Message::Kicked).await, Ok(()));
    }

    #[tokio::test]
    async fn test_disconnect_releases_port() {
        let network = MemoryNetwork::new();
        let host = network.transport("host");
        host.host(&HostConfigBuilder::new().port(7004).build())
            .await
            .unwrap();

        host.disconnect().await.unwrap();
        assert!(!network.is_listening(7004));
    }
}
