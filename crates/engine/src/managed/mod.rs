//! Managed objects
//!
//! Shared resources (connections, transactions, caches) made available to
//! jobs, duties and governance. An object is created on first use by its
//! factory, lives for its [`ManagedObjectScope`], and is never unloaded while
//! a duty or governance cycle still holds it: such an unload is deferred
//! until the last holder releases it.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::administration::{AssetType, Issues};

/// Type-erased managed object instance
pub type ManagedObjectRef = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn() -> anyhow::Result<ManagedObjectRef> + Send + Sync>;
type RecycleHook = Arc<dyn Fn(&ManagedObjectRef) + Send + Sync>;

/// Lifetime of a managed object instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagedObjectScope {
    /// One instance per process, shared by all its thread-states
    #[default]
    Process,

    /// One instance per thread-state
    Thread,
}

/// Managed object descriptor
pub struct ManagedObjectConfiguration {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    scope: ManagedObjectScope,
    factory: Factory,
    recycle: Option<RecycleHook>,
}

impl ManagedObjectConfiguration {
    /// Managed object created by `factory` on first use in its scope
    pub fn new<M, F>(name: impl Into<String>, factory: F) -> Self
    where
        M: Send + Sync + 'static,
        F: Fn() -> anyhow::Result<Arc<M>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            type_id: TypeId::of::<M>(),
            type_name: std::any::type_name::<M>(),
            scope: ManagedObjectScope::default(),
            factory: Arc::new(move || factory().map(|object| object as ManagedObjectRef)),
            recycle: None,
        }
    }

    /// Managed object handing out the same instance in every scope
    pub fn shared<M>(name: impl Into<String>, object: Arc<M>) -> Self
    where
        M: Send + Sync + 'static,
    {
        Self::new(name, move || Ok(Arc::clone(&object)))
    }

    /// Set the scope
    pub fn with_scope(mut self, scope: ManagedObjectScope) -> Self {
        self.scope = scope;
        self
    }

    /// Hook invoked when an instance is unloaded at the end of its scope
    pub fn with_recycle<M, F>(mut self, recycle: F) -> Self
    where
        M: Send + Sync + 'static,
        F: Fn(&M) + Send + Sync + 'static,
    {
        self.recycle = Some(Arc::new(move |object: &ManagedObjectRef| {
            if let Some(object) = object.downcast_ref::<M>() {
                recycle(object);
            }
        }));
        self
    }

    /// Name of the managed object
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ManagedObjectConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObjectConfiguration")
            .field("name", &self.name)
            .field("type", &self.type_name)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Validated managed object
pub struct ManagedObjectMetaData {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    scope: ManagedObjectScope,
    factory: Factory,
    recycle: Option<RecycleHook>,
}

impl ManagedObjectMetaData {
    /// Validate a configuration, reporting problems to `issues`
    pub fn construct(
        configuration: ManagedObjectConfiguration,
        issues: &mut dyn Issues,
    ) -> Option<Self> {
        if configuration.name.trim().is_empty() {
            issues.add_issue(
                AssetType::ManagedObject,
                "",
                "Managed object added without a name".to_string(),
            );
            return None;
        }

        Some(Self {
            name: configuration.name,
            type_id: configuration.type_id,
            type_name: configuration.type_name,
            scope: configuration.scope,
            factory: configuration.factory,
            recycle: configuration.recycle,
        })
    }

    /// Name of the managed object
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope of instances
    pub fn scope(&self) -> ManagedObjectScope {
        self.scope
    }

    /// Concrete type of instances
    pub fn object_type(&self) -> TypeId {
        self.type_id
    }

    /// Name of the concrete type of instances
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ManagedObjectMetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObjectMetaData")
            .field("name", &self.name)
            .field("type", &self.type_name)
            .field("scope", &self.scope)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct ActiveEntry {
    name: String,
    holds: usize,
}

/// Set of managed object instances currently held by a duty, governance
/// cycle or job body
#[derive(Debug, Default)]
pub struct ActiveManagedObjects {
    entries: DashMap<Uuid, ActiveEntry>,
}

impl ActiveManagedObjects {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, key: Uuid, name: &str) {
        self.entries
            .entry(key)
            .or_insert_with(|| ActiveEntry {
                name: name.to_string(),
                holds: 0,
            })
            .holds += 1;
    }

    fn release(&self, key: Uuid) {
        self.entries.remove_if_mut(&key, |_, entry| {
            entry.holds = entry.holds.saturating_sub(1);
            entry.holds == 0
        });
    }

    /// Check if no instance is held
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of held instances
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Names of the held instances' managed objects
    pub fn names(&self) -> HashSet<String> {
        self.entries
            .iter()
            .map(|entry| entry.value().name.clone())
            .collect()
    }
}

#[derive(Default)]
struct ContainerState {
    instance: Option<ManagedObjectRef>,
    holds: usize,
    unload_pending: bool,
}

/// Holder of one managed object instance within a scope
pub(crate) struct ManagedObjectContainer {
    key: Uuid,
    metadata: Arc<ManagedObjectMetaData>,
    active: Arc<ActiveManagedObjects>,
    state: Mutex<ContainerState>,
}

impl ManagedObjectContainer {
    pub(crate) fn new(
        metadata: Arc<ManagedObjectMetaData>,
        active: Arc<ActiveManagedObjects>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key: Uuid::now_v7(),
            metadata,
            active,
            state: Mutex::new(ContainerState::default()),
        })
    }

    pub(crate) fn metadata(&self) -> &ManagedObjectMetaData {
        &self.metadata
    }

    fn load(&self, state: &mut ContainerState) -> anyhow::Result<ManagedObjectRef> {
        if let Some(instance) = &state.instance {
            return Ok(Arc::clone(instance));
        }

        let instance = (self.metadata.factory)()?;
        debug!(managed_object = %self.metadata.name, "Managed object loaded");
        state.instance = Some(Arc::clone(&instance));
        state.unload_pending = false;
        Ok(instance)
    }

    /// Instance, loading it if necessary, held until [`release`](Self::release)
    pub(crate) fn acquire(&self) -> anyhow::Result<ManagedObjectRef> {
        let mut state = self.state.lock();
        let instance = self.load(&mut state)?;
        state.holds += 1;
        self.active.acquire(self.key, &self.metadata.name);
        Ok(instance)
    }

    /// Give up a hold, completing a deferred unload on the last one
    pub(crate) fn release(&self) {
        let recycled = {
            let mut state = self.state.lock();
            if state.holds == 0 {
                return;
            }
            state.holds -= 1;
            self.active.release(self.key);

            if state.holds == 0 && state.unload_pending {
                state.unload_pending = false;
                state.instance.take()
            } else {
                None
            }
        };

        if let Some(instance) = recycled {
            self.recycle(&instance);
        }
    }

    /// End of scope: unload now, or once the last hold is released
    pub(crate) fn unload(&self) {
        let recycled = {
            let mut state = self.state.lock();
            if state.holds > 0 {
                debug!(
                    managed_object = %self.metadata.name,
                    holds = state.holds,
                    "Managed object still active, deferring unload"
                );
                state.unload_pending = true;
                None
            } else {
                state.instance.take()
            }
        };

        if let Some(instance) = recycled {
            self.recycle(&instance);
        }
    }

    fn recycle(&self, instance: &ManagedObjectRef) {
        if let Some(recycle) = &self.metadata.recycle {
            recycle(instance);
        }
        debug!(managed_object = %self.metadata.name, "Managed object unloaded");
    }

    #[cfg(test)]
    fn is_loaded(&self) -> bool {
        self.state.lock().instance.is_some()
    }
}

impl fmt::Debug for ManagedObjectContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObjectContainer")
            .field("managed_object", &self.metadata.name)
            .field("holds", &self.state.lock().holds)
            .finish()
    }
}

/// Source of the containers visible to a thread-state, by managed object index
pub(crate) trait ContainerSource {
    fn container(&mut self, index: usize) -> Arc<ManagedObjectContainer>;
}

/// Holds acquired from containers, released on drop
#[derive(Debug, Default)]
pub(crate) struct ObjectHolds {
    containers: Vec<Arc<ManagedObjectContainer>>,
}

impl ObjectHolds {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            containers: Vec::with_capacity(capacity),
        }
    }

    /// Acquire the instance of `container`, holding it until drop
    pub(crate) fn acquire(
        &mut self,
        container: Arc<ManagedObjectContainer>,
    ) -> anyhow::Result<ManagedObjectRef> {
        let instance = container.acquire()?;
        self.containers.push(container);
        Ok(instance)
    }
}

impl Drop for ObjectHolds {
    fn drop(&mut self) {
        for container in self.containers.drain(..).rev() {
            container.release();
        }
    }
}

/// Lazily populated table of containers, indexed by managed object
#[derive(Debug, Default)]
pub(crate) struct ContainerTable {
    containers: Vec<Option<Arc<ManagedObjectContainer>>>,
}

impl ContainerTable {
    /// Container for `index`, created on first access
    pub(crate) fn container(
        &mut self,
        index: usize,
        metadata: &Arc<ManagedObjectMetaData>,
        active: &Arc<ActiveManagedObjects>,
    ) -> Arc<ManagedObjectContainer> {
        if self.containers.len() <= index {
            self.containers.resize(index + 1, None);
        }
        Arc::clone(self.containers[index].get_or_insert_with(|| {
            ManagedObjectContainer::new(Arc::clone(metadata), Arc::clone(active))
        }))
    }

    /// Unload every container at the end of the scope
    pub(crate) fn unload_all(&mut self) {
        for container in self.containers.drain(..).flatten() {
            container.unload();
        }
    }
}
