//! # trellis-core
//!
//! Shared vocabulary for the Trellis replication session.
//!
//! This crate provides:
//! - Node and user identifiers, and the owner model (a user or the shared sentinel)
//! - The node lifecycle states
//! - Type-erased handles to application objects
//! - The [`NodeImplementation`] and [`DataFactory`] traits the host application implements
//! - The wire/persisted form of a node ([`NodePayload`])
//! - The error taxonomy shared by the graph and session layers
//!
//! ## Example
//!
//! ```rust
//! use trellis_core::{Owner, UserId};
//!
//! let alice = UserId::new("alice");
//! let bob = UserId::new("bob");
//!
//! let owner = Owner::user(alice.clone());
//! assert!(owner.permits(&alice));
//! assert!(!owner.permits(&bob));
//! assert!(Owner::Shared.permits(&bob));
//! ```

pub mod error;
pub mod ids;
pub mod implementation;
pub mod object;
pub mod payload;
pub mod state;

pub use error::{ReplicationError, Result};
pub use ids::{NodeId, Owner, UserId};
pub use implementation::{DataFactory, NodeImplementation};
pub use object::ObjectRef;
pub use payload::NodePayload;
pub use state::NodeState;
