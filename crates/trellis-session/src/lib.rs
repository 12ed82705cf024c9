//! Trellis session - multi-user replication of an application object graph
//!
//! A session keeps a graph of application objects in sync between one host
//! and any number of clients. Every node has an owner (a user, or shared);
//! only the owner may commit, push, remove or hand it over. Nodes depend on
//! other nodes, and every operation processes dependencies first.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use trellis_session::{
//!     DataFactory, MemoryNetwork, NodeImplementation, ObjectRef, Session, SessionConfigBuilder,
//! };
//!
//! struct NoFactory;
//!
//! impl DataFactory for NoFactory {
//!     fn implementation_for(&self, _: &ObjectRef) -> Option<Box<dyn NodeImplementation>> {
//!         None
//!     }
//!     fn implementation_for_type(&self, _: &str) -> Option<Box<dyn NodeImplementation>> {
//!         None
//!     }
//! }
//!
//! let network = MemoryNetwork::new();
//! let config = SessionConfigBuilder::new().user("alice").build();
//! let mut session = Session::new(config, Arc::new(NoFactory), Arc::new(network.transport("alice")));
//!
//! // Objects the factory does not know are rejected.
//! assert!(session.add(ObjectRef::from_value(42u32), None, &[]).is_err());
//! ```
//!
//! # Architecture
//!
//! - [`command`] - Commands executed locally and replayed by peers
//! - [`network`] - Wire messages, the transport trait and the in-memory transport
//! - [`orchestrator`] - Network role, outbound queue and online users
//! - [`presence`] - Online-user table
//! - [`session`] - The session facade
//! - [`snapshot`] - Compressed session archives
//! - [`config`] - Session, host and connect settings
//! - [`error`] - Error types

pub mod command;
pub mod config;
pub mod error;
pub mod network;
pub mod orchestrator;
pub mod presence;
pub mod session;
pub mod snapshot;

pub use command::Command;
pub use config::{
    ConnectConfig, ConnectConfigBuilder, HostConfig, HostConfigBuilder, SessionConfig,
    SessionConfigBuilder,
};
pub use error::{Result, SessionError};
pub use network::{MemoryNetwork, MemoryTransport, Message, NetworkError, Peer, PeerState, Transport};
pub use orchestrator::{ConnectionState, Inbound, Orchestrator, Outbound, OutboundQueue, Role};
pub use presence::{OnlineUser, UserTable};
pub use session::{Session, SessionCallback, SessionEvent};
pub use snapshot::{SessionSnapshot, SnapshotEntry, SNAPSHOT_VERSION};

pub use trellis_core::{
    DataFactory, NodeId, NodeImplementation, NodePayload, NodeState, ObjectRef, Owner,
    ReplicationError, UserId,
};
pub use trellis_graph::{NodeRegistry, ReplicatedNode};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{ConnectConfigBuilder, HostConfigBuilder, SessionConfigBuilder};
    pub use crate::error::SessionError;
    pub use crate::network::{MemoryNetwork, Transport};
    pub use crate::orchestrator::ConnectionState;
    pub use crate::session::{Session, SessionEvent};
    pub use trellis_core::{DataFactory, NodeId, NodeImplementation, ObjectRef, Owner, UserId};
}
