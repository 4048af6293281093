//! Extension extraction
//!
//! Duties and governance operate on an *extension* of a managed object (for
//! example a `dyn Transaction` view of a database connection). Extractors are
//! registered per (managed object type, extension type) pair, so support is
//! checked when the engine is built rather than when a duty first runs.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::managed::ManagedObjectRef;

/// Extension value produced by an extractor
pub(crate) type ExtensionRef = Box<dyn Any + Send>;

/// Type-erased extractor of one extension from one managed object type
pub(crate) type Extractor = Arc<dyn Fn(&ManagedObjectRef) -> Option<ExtensionRef> + Send + Sync>;

/// Rust type identity with a readable name for diagnostics
#[derive(Debug, Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key of `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl std::hash::Hash for TypeKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Registry of extension extractors
#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    extractors: HashMap<(TypeId, TypeId), Extractor>,
}

impl ExtensionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register how to obtain extension `E` from managed objects of type `M`
    pub fn register<M, E, F>(&mut self, extractor: F)
    where
        M: Send + Sync + 'static,
        E: Send + 'static,
        F: Fn(&Arc<M>) -> E + Send + Sync + 'static,
    {
        let extractor: Extractor = Arc::new(move |object: &ManagedObjectRef| {
            let object = Arc::clone(object).downcast::<M>().ok()?;
            Some(Box::new(extractor(&object)) as ExtensionRef)
        });
        self.extractors
            .insert((TypeId::of::<M>(), TypeId::of::<E>()), extractor);
    }

    /// Check if extension `extension` can be obtained from `object` types
    pub fn supports(&self, object: TypeId, extension: TypeId) -> bool {
        self.extractors.contains_key(&(object, extension))
    }

    pub(crate) fn extractor(&self, object: TypeId, extension: TypeId) -> Option<Extractor> {
        self.extractors.get(&(object, extension)).cloned()
    }

    /// Number of registered extractors
    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("extractors", &self.extractors.len())
            .finish()
    }
}
