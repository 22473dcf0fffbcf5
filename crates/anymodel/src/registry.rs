//! Process-wide default-backend registry.
//!
//! A convenience for the outermost application-wiring layer only: the core
//! model, compilers, and reconciler always take their backend explicitly.
//! One default can be registered per backend type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use anymodel_core::{Backend, Error, Result};

type Registry = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register `backend` as the process-wide default of its type, replacing any
/// previous default.
pub fn set_default<B: Backend + 'static>(backend: B) {
    registry()
        .write()
        .expect("registry lock poisoned")
        .insert(TypeId::of::<B>(), Arc::new(backend));
}

/// The registered default backend of type `B`.
///
/// Fails with [`Error::NoDefaultConnection`] when none was registered.
pub fn default_backend<B: Backend + 'static>() -> Result<Arc<B>> {
    let guard = registry().read().expect("registry lock poisoned");
    guard
        .get(&TypeId::of::<B>())
        .cloned()
        .and_then(|any| any.downcast::<B>().ok())
        .ok_or(Error::NoDefaultConnection)
}

/// Remove the registered default of type `B`, if any.
pub fn clear_default<B: Backend + 'static>() {
    registry()
        .write()
        .expect("registry lock poisoned")
        .remove(&TypeId::of::<B>());
}
