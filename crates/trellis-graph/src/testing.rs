//! Minimal application object used by the unit tests.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use trellis_core::{NodeImplementation, ObjectRef, ReplicationError, Result};

pub struct TestData {
    pub value: Value,
    pub deps: Vec<ObjectRef>,
}

#[derive(Clone)]
pub struct TestObject {
    str_type: &'static str,
    inner: Arc<RwLock<TestData>>,
}

impl TestObject {
    pub fn new(str_type: &'static str, value: Value) -> Self {
        Self {
            str_type,
            inner: Arc::new(RwLock::new(TestData {
                value,
                deps: Vec::new(),
            })),
        }
    }

    pub fn get(&self) -> Value {
        self.inner.read().value.clone()
    }

    pub fn set(&self, value: Value) {
        self.inner.write().value = value;
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.inner.clone())
    }

    pub fn implementation(&self) -> TestImpl {
        TestImpl {
            str_type: self.str_type.to_string(),
            inner: Some(self.inner.clone()),
        }
    }
}

pub struct TestImpl {
    str_type: String,
    inner: Option<Arc<RwLock<TestData>>>,
}

impl NodeImplementation for TestImpl {
    fn str_type(&self) -> &str {
        &self.str_type
    }

    fn instance(&self) -> Option<ObjectRef> {
        self.inner.clone().map(ObjectRef::new)
    }

    fn resolve_deps(&self) -> Vec<ObjectRef> {
        self.inner
            .as_ref()
            .map(|inner| inner.read().deps.clone())
            .unwrap_or_default()
    }

    fn dump(&self) -> Result<Value> {
        self.inner
            .as_ref()
            .map(|inner| inner.read().value.clone())
            .ok_or_else(|| ReplicationError::Implementation("no instance".into()))
    }

    fn load(&mut self, data: &Value) -> Result<()> {
        if data.get("poison").is_some() {
            return Err(ReplicationError::Implementation("poisoned payload".into()));
        }
        let inner = self.inner.get_or_insert_with(|| {
            Arc::new(RwLock::new(TestData {
                value: Value::Null,
                deps: Vec::new(),
            }))
        });
        inner.write().value = data.clone();
        Ok(())
    }
}
