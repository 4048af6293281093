//! Governance
//!
//! A governance brackets work on managed objects, typically as a
//! transaction: activating it hands it an extension of every managed object
//! it governs ("begin"), after which it is either enforced ("commit") or
//! disregarded ("rollback"). Governed objects stay held (and so loaded)
//! from activation until enforcement or disregard.

use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::debug;

use super::extension::{ExtensionRef, Extractor, TypeKey};
use super::issues::{AssetType, Issues};
use super::ConstructionSources;
use crate::managed::{ContainerSource, ObjectHolds};

/// Transactional bracket over managed objects exposing extension `E`
pub trait Governance<E>: Send + 'static {
    /// Bring a managed object (through its extension) under governance
    fn govern_managed_object(&mut self, extension: E) -> anyhow::Result<()>;

    /// Apply the governance (commit)
    fn enforce_governance(&mut self) -> anyhow::Result<()>;

    /// Abandon the governance (rollback)
    fn disregard_governance(&mut self) -> anyhow::Result<()>;
}

/// Object-safe view of a [`Governance`] of any extension type
pub(crate) trait AnyGovernance: Send {
    fn govern(&mut self, extension: ExtensionRef) -> anyhow::Result<()>;
    fn enforce(&mut self) -> anyhow::Result<()>;
    fn disregard(&mut self) -> anyhow::Result<()>;
}

struct GovernanceWrapper<E, G> {
    governance: G,
    _extension: PhantomData<fn(E)>,
}

impl<E, G> AnyGovernance for GovernanceWrapper<E, G>
where
    E: Send + 'static,
    G: Governance<E>,
{
    fn govern(&mut self, extension: ExtensionRef) -> anyhow::Result<()> {
        let extension = extension
            .downcast::<E>()
            .map_err(|_| anyhow!("extension is not a {}", std::any::type_name::<E>()))?;
        self.governance.govern_managed_object(*extension)
    }

    fn enforce(&mut self) -> anyhow::Result<()> {
        self.governance.enforce_governance()
    }

    fn disregard(&mut self) -> anyhow::Result<()> {
        self.governance.disregard_governance()
    }
}

type GovernanceFactory = Arc<dyn Fn() -> Box<dyn AnyGovernance> + Send + Sync>;

/// Governance descriptor
///
/// # Example
///
/// ```ignore
/// let governance = GovernanceConfiguration::new::<Arc<dyn Transaction>, _, _>(
///     "transaction",
///     TransactionGovernance::default,
/// )
/// .govern("connection");
/// ```
pub struct GovernanceConfiguration {
    name: String,
    extension: TypeKey,
    factory: GovernanceFactory,
    governed: Vec<String>,
}

impl GovernanceConfiguration {
    /// Governance whose instances are created by `factory` on activation
    pub fn new<E, G, F>(name: impl Into<String>, factory: F) -> Self
    where
        E: Send + 'static,
        G: Governance<E>,
        F: Fn() -> G + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            extension: TypeKey::of::<E>(),
            factory: Arc::new(move || {
                Box::new(GovernanceWrapper {
                    governance: factory(),
                    _extension: PhantomData::<fn(E)>,
                }) as Box<dyn AnyGovernance>
            }),
            governed: Vec::new(),
        }
    }

    /// Add a managed object to govern
    pub fn govern(mut self, managed_object: impl Into<String>) -> Self {
        self.governed.push(managed_object.into());
        self
    }

    /// Name of the governance
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for GovernanceConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceConfiguration")
            .field("name", &self.name)
            .field("extension", &self.extension.name())
            .field("governed", &self.governed)
            .finish()
    }
}

#[derive(Clone)]
struct GovernedObject {
    index: usize,
    extractor: Extractor,
}

/// Validated governance
pub struct GovernanceMetaData {
    name: String,
    factory: GovernanceFactory,
    governed: Vec<GovernedObject>,
}

impl GovernanceMetaData {
    /// Validate a configuration, reporting problems to `issues`
    pub fn construct(
        configuration: GovernanceConfiguration,
        sources: &ConstructionSources<'_>,
        issues: &mut dyn Issues,
    ) -> Option<Self> {
        let GovernanceConfiguration {
            name,
            extension,
            factory,
            governed: governed_names,
        } = configuration;

        if name.trim().is_empty() {
            issues.add_issue(
                AssetType::Governance,
                "",
                "Governance added without a name".to_string(),
            );
            return None;
        }

        let mut governed = Vec::with_capacity(governed_names.len());
        for object_name in &governed_names {
            let Some((index, extractor)) = sources.resolve_extension(
                AssetType::Governance,
                &name,
                object_name,
                extension,
                issues,
            ) else {
                return None;
            };
            governed.push(GovernedObject { index, extractor });
        }

        Some(Self {
            name,
            factory,
            governed,
        })
    }

    /// Name of the governance
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Indexes of the governed managed objects
    pub fn governed(&self) -> Vec<usize> {
        self.governed.iter().map(|object| object.index).collect()
    }

    /// Create a governance instance and hand it every governed object
    pub(crate) fn activate(
        &self,
        objects: &mut dyn ContainerSource,
    ) -> anyhow::Result<ActiveGovernance> {
        let mut active = ActiveGovernance {
            name: self.name.clone(),
            governance: (self.factory)(),
            holds: ObjectHolds::with_capacity(self.governed.len()),
        };

        for object in &self.governed {
            let governed = active
                .holds
                .acquire(objects.container(object.index))
                .and_then(|instance| {
                    (object.extractor)(&instance)
                        .ok_or_else(|| anyhow!("managed object does not provide the extension"))
                })
                .and_then(|extension| active.governance.govern(extension));

            if let Err(error) = governed {
                if let Err(cleanup) = active.governance.disregard() {
                    debug!(
                        governance = %self.name,
                        error = %cleanup,
                        "Disregard after failed activation failed"
                    );
                }
                return Err(error);
            }
        }

        debug!(governance = %self.name, objects = self.governed.len(), "Governance activated");
        Ok(active)
    }
}

impl std::fmt::Debug for GovernanceMetaData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceMetaData")
            .field("name", &self.name)
            .field("governed", &self.governed())
            .finish()
    }
}

/// Governance activated within a thread-state
///
/// Governed objects are released once it is enforced, disregarded or
/// dropped.
pub(crate) struct ActiveGovernance {
    name: String,
    governance: Box<dyn AnyGovernance>,
    holds: ObjectHolds,
}

impl ActiveGovernance {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn enforce(mut self) -> anyhow::Result<()> {
        debug!(governance = %self.name, "Enforcing governance");
        self.governance.enforce()
    }

    pub(crate) fn disregard(mut self) -> anyhow::Result<()> {
        debug!(governance = %self.name, "Disregarding governance");
        self.governance.disregard()
    }
}

impl std::fmt::Debug for ActiveGovernance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveGovernance")
            .field("name", &self.name)
            .field("holds", &self.holds)
            .finish()
    }
}

/// Control over one governance from within a duty
pub struct GovernanceManager<'a> {
    metadata: &'a GovernanceMetaData,
    slot: &'a mut Option<ActiveGovernance>,
    objects: &'a mut dyn ContainerSource,
}

impl<'a> GovernanceManager<'a> {
    pub(crate) fn new(
        metadata: &'a GovernanceMetaData,
        slot: &'a mut Option<ActiveGovernance>,
        objects: &'a mut dyn ContainerSource,
    ) -> Self {
        Self {
            metadata,
            slot,
            objects,
        }
    }

    /// Name of the governance
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Check if the governance is active in this thread-state
    pub fn is_active(&self) -> bool {
        self.slot.is_some()
    }

    /// Activate the governance (no-op if already active)
    pub fn activate(&mut self) -> anyhow::Result<()> {
        if self.slot.is_none() {
            *self.slot = Some(self.metadata.activate(&mut *self.objects)?);
        }
        Ok(())
    }

    /// Enforce the governance (no-op if not active)
    pub fn enforce(&mut self) -> anyhow::Result<()> {
        match self.slot.take() {
            Some(active) => active.enforce(),
            None => Ok(()),
        }
    }

    /// Disregard the governance (no-op if not active)
    pub fn disregard(&mut self) -> anyhow::Result<()> {
        match self.slot.take() {
            Some(active) => active.disregard(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    use crate::administration::{ExtensionRegistry, IssueCollector};
    use crate::managed::{
        ActiveManagedObjects, ManagedObjectConfiguration, ManagedObjectContainer,
        ManagedObjectMetaData,
    };

    struct Connection {
        log: Mutex<Vec<&'static str>>,
    }

    #[derive(Default)]
    struct Transaction {
        connections: Vec<Arc<Connection>>,
    }

    impl Governance<Arc<Connection>> for Transaction {
        fn govern_managed_object(&mut self, connection: Arc<Connection>) -> anyhow::Result<()> {
            connection.log.lock().push("begin");
            self.connections.push(connection);
            Ok(())
        }

        fn enforce_governance(&mut self) -> anyhow::Result<()> {
            for connection in &self.connections {
                connection.log.lock().push("commit");
            }
            Ok(())
        }

        fn disregard_governance(&mut self) -> anyhow::Result<()> {
            for connection in &self.connections {
                connection.log.lock().push("rollback");
            }
            Ok(())
        }
    }

    struct Objects {
        containers: Vec<Arc<ManagedObjectContainer>>,
    }

    impl ContainerSource for Objects {
        fn container(&mut self, index: usize) -> Arc<ManagedObjectContainer> {
            Arc::clone(&self.containers[index])
        }
    }

    struct Fixture {
        connection: Arc<Connection>,
        active: Arc<ActiveManagedObjects>,
        objects: Objects,
        metadata: GovernanceMetaData,
    }

    fn transaction() -> GovernanceConfiguration {
        GovernanceConfiguration::new::<Arc<Connection>, _, _>("transaction", Transaction::default)
    }

    fn fixture() -> Fixture {
        let mut issues = IssueCollector::new();
        let connection = Arc::new(Connection {
            log: Mutex::new(Vec::new()),
        });
        let managed = vec![Arc::new(
            ManagedObjectMetaData::construct(
                ManagedObjectConfiguration::shared("connection", connection.clone()),
                &mut issues,
            )
            .unwrap(),
        )];
        let mut extensions = ExtensionRegistry::new();
        extensions.register::<Connection, Arc<Connection>, _>(Arc::clone);

        let sources = ConstructionSources::new(&[], &managed, &extensions, &[]);
        let configuration = transaction().govern("connection");
        let metadata = GovernanceMetaData::construct(configuration, &sources, &mut issues).unwrap();
        assert!(issues.is_empty());

        let active = Arc::new(ActiveManagedObjects::new());
        let container = ManagedObjectContainer::new(managed[0].clone(), active.clone());
        let objects = Objects {
            containers: vec![container],
        };
        Fixture {
            connection,
            active,
            objects,
            metadata,
        }
    }

    #[test]
    fn test_activate_then_enforce() {
        let mut fixture = fixture();
        let mut slot = None;

        let mut manager =
            GovernanceManager::new(&fixture.metadata, &mut slot, &mut fixture.objects);
        manager.activate().unwrap();
        manager.activate().unwrap();
        assert!(manager.is_active());
        assert_eq!(fixture.active.len(), 1);

        manager.enforce().unwrap();
        assert!(!manager.is_active());
        manager.disregard().unwrap();

        assert_eq!(*fixture.connection.log.lock(), vec!["begin", "commit"]);
        assert!(fixture.active.is_empty());
    }

    #[test]
    fn test_activate_then_disregard() {
        let mut fixture = fixture();
        let mut slot = None;

        let mut manager =
            GovernanceManager::new(&fixture.metadata, &mut slot, &mut fixture.objects);
        manager.activate().unwrap();
        manager.disregard().unwrap();

        assert_eq!(*fixture.connection.log.lock(), vec!["begin", "rollback"]);
        assert!(fixture.active.is_empty());
        assert_eq!(fixture.metadata.governed(), vec![0]);
    }

    #[test]
    fn test_unknown_managed_object_is_an_issue() {
        let mut issues = IssueCollector::new();
        let extensions = ExtensionRegistry::new();
        let sources = ConstructionSources::new(&[], &[], &extensions, &[]);

        let configuration = transaction().govern("missing");
        let metadata = GovernanceMetaData::construct(configuration, &sources, &mut issues);

        assert!(metadata.is_none());
        assert_eq!(
            issues.messages(),
            vec!["Can not find managed object 'missing' for governance 'transaction'"]
        );
    }
}
