use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A shared collaborator an `Environment` may hold a reference to (spec
/// §3 Ownership: "Service is shared by lifetime = longest holder").
///
/// Registered by concrete type; looked up the same way, so an environment
/// and every composite sibling that needs the same collaborator (e.g. a
/// provisioning client) share one instance rather than each owning a copy.
#[derive(Clone, Default)]
pub struct Services {
    inner: Arc<RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>>,
}

impl Services {
    pub fn new() -> Self {
        Services::default()
    }

    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.inner.write().insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.clone().downcast::<T>().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Thing(u32);

    #[test]
    fn shared_across_clones() {
        let services = Services::new();
        services.insert(Thing(42));
        let cloned = services.clone();
        assert_eq!(cloned.get::<Thing>().unwrap().0, 42);
    }

    #[test]
    fn missing_type_is_none() {
        let services = Services::new();
        assert!(services.get::<Thing>().is_none());
    }
}
