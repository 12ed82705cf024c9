//! Traits the host application implements to make its objects replicable.

use crate::error::Result;
use crate::object::ObjectRef;
use serde_json::Value;

/// Replication behaviour for one kind of application object.
///
/// A node implementation knows how to read its object into a serializable
/// value (`dump`), write a value back into the object (`load`), and which
/// other application objects it depends on (`resolve_deps`).
pub trait NodeImplementation: Send + Sync {
    /// Runtime type tag, used for filtered listing and for recreating
    /// implementations on peers that first see the node over the network.
    fn str_type(&self) -> &str;

    /// The wrapped object, if it exists locally.
    fn instance(&self) -> Option<ObjectRef>;

    /// Application objects this object depends on.
    fn resolve_deps(&self) -> Vec<ObjectRef>;

    /// Read the current state of the wrapped object.
    fn dump(&self) -> Result<Value>;

    /// Write `data` into the wrapped object, constructing it when absent.
    fn load(&mut self, data: &Value) -> Result<()>;
}

/// Maps application objects (or type tags) to node implementations.
pub trait DataFactory: Send + Sync {
    /// Implementation wrapping `object`, or `None` when its type is unsupported.
    fn implementation_for(&self, object: &ObjectRef) -> Option<Box<dyn NodeImplementation>>;

    /// Instance-less implementation for a type tag received from a peer.
    fn implementation_for_type(&self, str_type: &str) -> Option<Box<dyn NodeImplementation>>;
}
