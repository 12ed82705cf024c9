//! A tiny scene graph used to drive the simulations.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use trellis_session::{DataFactory, NodeImplementation, ObjectRef, ReplicationError};

pub const KINDS: [&str; 3] = ["object", "mesh", "material"];

/// An application object: a kind tag, some data, and links to other shapes.
pub struct Shape {
    kind: String,
    data: RwLock<Value>,
    links: RwLock<Vec<Arc<Shape>>>,
}

impl Shape {
    pub fn new(kind: &str, data: Value) -> Arc<Self> {
        Self::linked(kind, data, Vec::new())
    }

    pub fn linked(kind: &str, data: Value, links: Vec<Arc<Shape>>) -> Arc<Self> {
        Arc::new(Self {
            kind: kind.to_string(),
            data: RwLock::new(data),
            links: RwLock::new(links),
        })
    }

    pub fn get(&self) -> Value {
        self.data.read().clone()
    }

    pub fn set(&self, data: Value) {
        *self.data.write() = data;
    }

    pub fn object_ref(self: &Arc<Self>) -> ObjectRef {
        ObjectRef::new(Arc::clone(self))
    }
}

struct ShapeNode {
    kind: String,
    shape: Option<Arc<Shape>>,
}

impl NodeImplementation for ShapeNode {
    fn str_type(&self) -> &str {
        &self.kind
    }

    fn instance(&self) -> Option<ObjectRef> {
        self.shape.as_ref().map(Shape::object_ref)
    }

    fn resolve_deps(&self) -> Vec<ObjectRef> {
        match &self.shape {
            Some(shape) => shape.links.read().iter().map(Shape::object_ref).collect(),
            None => Vec::new(),
        }
    }

    fn dump(&self) -> Result<Value, ReplicationError> {
        self.shape
            .as_ref()
            .map(|shape| shape.get())
            .ok_or_else(|| ReplicationError::Implementation(format!("{} not instantiated", self.kind)))
    }

    fn load(&mut self, data: &Value) -> Result<(), ReplicationError> {
        match &self.shape {
            Some(shape) => shape.set(data.clone()),
            None => self.shape = Some(Shape::new(&self.kind, data.clone())),
        }
        Ok(())
    }
}

/// Maps [`Shape`]s of a known kind to node implementations.
pub struct ShapeFactory;

impl DataFactory for ShapeFactory {
    fn implementation_for(&self, object: &ObjectRef) -> Option<Box<dyn NodeImplementation>> {
        let shape = object.downcast::<Shape>()?;
        self.implementation_for_type(&shape.kind).map(|_| {
            Box::new(ShapeNode {
                kind: shape.kind.clone(),
                shape: Some(shape),
            }) as Box<dyn NodeImplementation>
        })
    }

    fn implementation_for_type(&self, str_type: &str) -> Option<Box<dyn NodeImplementation>> {
        KINDS.contains(&str_type).then(|| {
            Box::new(ShapeNode {
                kind: str_type.to_string(),
                shape: None,
            }) as Box<dyn NodeImplementation>
        })
    }
}
