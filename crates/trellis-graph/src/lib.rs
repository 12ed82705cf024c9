//! # trellis-graph
//!
//! The replicated object graph of a Trellis session.
//!
//! This crate provides:
//! - [`ReplicatedNode`]: one application object plus owner, lifecycle state,
//!   dependency edges and the commit / push / fetch / apply state machine
//! - [`NodeRegistry`]: id-keyed storage with lookup by object identity,
//!   type-filtered listing and cycle-checked dependency ordering
//! - [`DataDigest`]: SHA-256 fingerprints used to skip unchanged pushes
//!
//! ## Architecture
//!
//! The registry is the only owner of nodes. A node knows its own id and the
//! ids of its dependencies; it holds no pointer back to the registry or to
//! other nodes. Ordering questions ("what must be committed before this
//! node?") are answered by [`NodeRegistry::dependencies_ordered`], a
//! depth-first walk that yields dependencies before dependents.

mod digest;
mod node;
mod registry;

#[cfg(test)]
mod testing;

pub use digest::DataDigest;
pub use node::ReplicatedNode;
pub use registry::NodeRegistry;
