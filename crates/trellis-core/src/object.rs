//! Type-erased handles to application objects.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A shared, type-erased reference to an application object.
///
/// The session never looks inside the object; node implementations downcast
/// it back to their concrete type. Two handles are the same reference when
/// they point at the same allocation.
#[derive(Clone)]
pub struct ObjectRef {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ObjectRef {
    /// Wrap an already shared object.
    pub fn new<T: Any + Send + Sync>(object: Arc<T>) -> Self {
        let inner: Arc<dyn Any + Send + Sync> = object;
        Self {
            inner,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Move a value into a fresh shared handle.
    pub fn from_value<T: Any + Send + Sync>(value: T) -> Self {
        Self::new(Arc::new(value))
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.clone().downcast::<T>().ok()
    }

    pub fn is<T: Any + Send + Sync>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Identity comparison: true when both handles wrap the same allocation.
    pub fn same_object(&self, other: &ObjectRef) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.inner), Arc::as_ptr(&other.inner))
    }

    /// Rust type name of the wrapped object, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({} @ {:p})", self.type_name, Arc::as_ptr(&self.inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;

    #[derive(Debug, PartialEq)]
    struct Light {
        intensity: f32,
    }

    #[test]
    fn test_identity() {
        let shared = Arc::new(RwLock::new(Light { intensity: 1.0 }));
        let a = ObjectRef::new(shared.clone());
        let b = ObjectRef::new(shared);
        let c = ObjectRef::from_value(RwLock::new(Light { intensity: 1.0 }));

        assert!(a.same_object(&b));
        assert!(!a.same_object(&c));
    }

    #[test]
    fn test_downcast() {
        let object = ObjectRef::from_value(RwLock::new(Light { intensity: 2.5 }));

        assert!(object.is::<RwLock<Light>>());
        assert!(object.downcast::<String>().is_none());

        let light = object.downcast::<RwLock<Light>>().unwrap();
        light.write().intensity = 3.0;

        let again = object.downcast::<RwLock<Light>>().unwrap();
        assert_eq!(again.read().intensity, 3.0);
    }
}
