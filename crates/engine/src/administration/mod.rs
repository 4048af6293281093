//! Administration and governance of managed objects
//!
//! This module provides:
//! - [`Duty`] - Pre/post hook run around an administered job
//! - [`AdministrationConfiguration`] / [`AdministrationMetaData`] - Binding of
//!   a duty to a team, managed objects and governance
//! - [`Governance`] - Transactional bracket over managed objects
//! - [`ExtensionRegistry`] - Typed views of managed objects handed to duties
//! - [`Issues`] - Sink for configuration problems
//!
//! A duty receives the extension `E` of every managed object it administers.
//! A "begin" pre-duty typically activates a governance, and a post-duty (or
//! the escalation path) enforces or disregards it:
//!
//! ```ignore
//! let begin = AdministrationConfiguration::<Arc<dyn Transaction>>::new("begin")
//!     .with_duty(|context| context.governance(0)?.activate())
//!     .administer("connection")
//!     .link_governance("transaction");
//! ```

mod extension;
mod governance;
mod issues;

pub use extension::{ExtensionRegistry, TypeKey};
pub use governance::{
    Governance, GovernanceConfiguration, GovernanceManager, GovernanceMetaData,
};
pub use issues::{AssetType, Issue, IssueCollector, Issues};

pub(crate) use extension::{ExtensionRef, Extractor};
pub(crate) use governance::ActiveGovernance;

use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;

use crate::managed::{ContainerSource, ManagedObjectMetaData, ObjectHolds};

/// Already-constructed assets an administration or governance resolves
/// names against
#[derive(Debug, Clone, Copy)]
pub struct ConstructionSources<'a> {
    teams: &'a [String],
    managed_objects: &'a [Arc<ManagedObjectMetaData>],
    extensions: &'a ExtensionRegistry,
    governances: &'a [String],
}

impl<'a> ConstructionSources<'a> {
    /// Resolution sources, each indexed as the engine indexes them
    pub fn new(
        teams: &'a [String],
        managed_objects: &'a [Arc<ManagedObjectMetaData>],
        extensions: &'a ExtensionRegistry,
        governances: &'a [String],
    ) -> Self {
        Self {
            teams,
            managed_objects,
            extensions,
            governances,
        }
    }

    fn team(&self, name: &str) -> Option<usize> {
        self.teams.iter().position(|team| team == name)
    }

    fn governance(&self, name: &str) -> Option<usize> {
        self.governances.iter().position(|known| known == name)
    }

    /// Resolve a managed object by name to its index and the extractor of
    /// `extension` from it
    pub(crate) fn resolve_extension(
        &self,
        asset_type: AssetType,
        asset_name: &str,
        object_name: &str,
        extension: TypeKey,
        issues: &mut dyn Issues,
    ) -> Option<(usize, Extractor)> {
        let Some(index) = self
            .managed_objects
            .iter()
            .position(|object| object.name() == object_name)
        else {
            issues.add_issue(
                asset_type,
                asset_name,
                format!(
                    "Can not find managed object '{object_name}' for {asset_type} '{asset_name}'"
                ),
            );
            return None;
        };

        let object = &self.managed_objects[index];
        match self.extensions.extractor(object.object_type(), extension.id()) {
            Some(extractor) => Some((index, extractor)),
            None => {
                issues.add_issue(
                    asset_type,
                    asset_name,
                    format!(
                        "Managed object '{object_name}' ({}) does not support extension {extension} required by {asset_type} '{asset_name}'",
                        object.type_name()
                    ),
                );
                None
            }
        }
    }
}

/// Hook run before or after an administered job
///
/// Implemented for closures taking the [`AdministrationContext`].
pub trait Duty<E>: Send + Sync + 'static {
    fn administer(&self, context: &mut AdministrationContext<'_, E>) -> anyhow::Result<()>;
}

impl<E, F> Duty<E> for F
where
    F: Fn(&mut AdministrationContext<'_, E>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn administer(&self, context: &mut AdministrationContext<'_, E>) -> anyhow::Result<()> {
        self(context)
    }
}

/// Access to the governance linked to an administration, within one
/// thread-state
pub(crate) struct GovernanceAccess<'a> {
    pub(crate) administration: &'a str,
    pub(crate) links: &'a [Option<usize>],
    pub(crate) metadata: &'a [Arc<GovernanceMetaData>],
    pub(crate) slots: &'a mut Vec<Option<ActiveGovernance>>,
    pub(crate) objects: &'a mut dyn ContainerSource,
}

/// Context handed to a [`Duty`]
pub struct AdministrationContext<'a, E> {
    extensions: Vec<E>,
    governance: GovernanceAccess<'a>,
}

impl<'a, E> AdministrationContext<'a, E> {
    /// Name of the administration running the duty
    pub fn name(&self) -> &str {
        self.governance.administration
    }

    /// Extensions of the administered managed objects, in configuration order
    pub fn extensions(&self) -> &[E] {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut [E] {
        &mut self.extensions
    }

    /// Governance linked at `index` (order of
    /// [`link_governance`](AdministrationConfiguration::link_governance))
    pub fn governance(&mut self, index: usize) -> anyhow::Result<GovernanceManager<'_>> {
        let access = &mut self.governance;
        let slot = access
            .links
            .get(index)
            .copied()
            .flatten()
            .ok_or_else(|| {
                anyhow!(
                    "administration '{}' has no governance linked at index {index}",
                    access.administration
                )
            })?;
        let metadata = access
            .metadata
            .get(slot)
            .ok_or_else(|| anyhow!("governance slot {slot} is not configured"))?;

        if access.slots.len() <= slot {
            access.slots.resize_with(slot + 1, || None);
        }
        Ok(GovernanceManager::new(
            metadata,
            &mut access.slots[slot],
            &mut *access.objects,
        ))
    }
}

type ErasedDuty =
    Arc<dyn Fn(Vec<ExtensionRef>, GovernanceAccess<'_>) -> anyhow::Result<()> + Send + Sync>;

fn erase_duty<F>(duty: F) -> ErasedDuty
where
    F: Fn(Vec<ExtensionRef>, GovernanceAccess<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(duty)
}

/// Administration descriptor for duties over extension `E`
pub struct AdministrationConfiguration<E> {
    name: String,
    duty: Option<Arc<dyn Duty<E>>>,
    team: Option<String>,
    administered: Vec<String>,
    governance: Vec<String>,
    _extension: PhantomData<fn() -> E>,
}

impl<E: Send + 'static> AdministrationConfiguration<E> {
    /// Create an administration without a duty
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duty: None,
            team: None,
            administered: Vec::new(),
            governance: Vec::new(),
            _extension: PhantomData,
        }
    }

    /// Set the duty
    pub fn with_duty<F>(mut self, duty: F) -> Self
    where
        F: Fn(&mut AdministrationContext<'_, E>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.duty = Some(Arc::new(duty));
        self
    }

    /// Set the duty from a [`Duty`] implementation
    pub fn with_duty_impl(mut self, duty: impl Duty<E>) -> Self {
        self.duty = Some(Arc::new(duty));
        self
    }

    /// Run the duty on the named team instead of any team
    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    /// Administer the named managed object
    pub fn administer(mut self, managed_object: impl Into<String>) -> Self {
        self.administered.push(managed_object.into());
        self
    }

    /// Link the named governance at the next governance index
    pub fn link_governance(mut self, governance: impl Into<String>) -> Self {
        self.governance.push(governance.into());
        self
    }

    /// Name of the administration
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone)]
struct AdministeredObject {
    index: usize,
    extractor: Extractor,
}

/// Validated administration
pub struct AdministrationMetaData {
    name: String,
    team: Option<usize>,
    administered: Vec<AdministeredObject>,
    duty: ErasedDuty,
    governance: Vec<Option<usize>>,
}

impl AdministrationMetaData {
    /// Validate a configuration, reporting problems to `issues`
    ///
    /// Checks, in order: the name, the duty, the responsible team and every
    /// administered managed object (which must support extension `E`). Any
    /// of these failing yields `None`. Unresolved governance links are
    /// reported but leave the link unmapped.
    pub fn construct<E: Send + 'static>(
        configuration: AdministrationConfiguration<E>,
        sources: &ConstructionSources<'_>,
        issues: &mut dyn Issues,
    ) -> Option<Self> {
        let AdministrationConfiguration {
            name,
            duty,
            team,
            administered: administered_names,
            governance: governance_names,
            ..
        } = configuration;

        if name.trim().is_empty() {
            issues.add_issue(
                AssetType::Administration,
                "",
                "Administration added without a name".to_string(),
            );
            return None;
        }

        let Some(duty) = duty else {
            issues.add_issue(
                AssetType::Administration,
                &name,
                format!("No duty provided for administration '{name}'"),
            );
            return None;
        };

        let team = match team {
            None => None,
            Some(team) => match sources.team(&team) {
                Some(index) => Some(index),
                None => {
                    issues.add_issue(
                        AssetType::Administration,
                        &name,
                        format!("Can not find team '{team}' for administration '{name}'"),
                    );
                    return None;
                }
            },
        };

        let extension = TypeKey::of::<E>();
        let mut administered = Vec::with_capacity(administered_names.len());
        for object_name in &administered_names {
            let (index, extractor) = sources.resolve_extension(
                AssetType::Administration,
                &name,
                object_name,
                extension,
                issues,
            )?;
            administered.push(AdministeredObject { index, extractor });
        }

        let governance = governance_names
            .iter()
            .map(|governance| {
                let slot = sources.governance(governance);
                if slot.is_none() {
                    issues.add_issue(
                        AssetType::Administration,
                        &name,
                        format!("Can not find governance '{governance}'"),
                    );
                }
                slot
            })
            .collect();

        let duty = erase_duty(move |extensions, governance| {
            let extensions = extensions
                .into_iter()
                .map(|value| {
                    value
                        .downcast::<E>()
                        .map(|value| *value)
                        .map_err(|_| anyhow!("extension is not a {extension}"))
                })
                .collect::<anyhow::Result<Vec<E>>>()?;

            let mut context = AdministrationContext {
                extensions,
                governance,
            };
            duty.administer(&mut context)
        });

        Some(Self {
            name,
            team,
            administered,
            duty,
            governance,
        })
    }

    /// Name of the administration
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the responsible team, `None` for any team
    pub fn team(&self) -> Option<usize> {
        self.team
    }

    /// Indexes of the administered managed objects
    pub fn administered(&self) -> Vec<usize> {
        self.administered.iter().map(|slot| slot.index).collect()
    }

    /// Thread-state governance slot of the governance linked at `index`
    ///
    /// Returns `None` for an index without a resolved governance.
    pub fn translate_governance_index_to_thread_index(&self, index: usize) -> Option<usize> {
        self.governance.get(index).copied().flatten()
    }

    /// Run the duty against the administered objects
    ///
    /// Objects are held from extraction until the duty returns.
    pub(crate) fn administer(
        &self,
        objects: &mut dyn ContainerSource,
        slots: &mut Vec<Option<ActiveGovernance>>,
        governance: &[Arc<GovernanceMetaData>],
    ) -> anyhow::Result<()> {
        let mut holds = ObjectHolds::with_capacity(self.administered.len());
        let mut extensions = Vec::with_capacity(self.administered.len());
        for object in &self.administered {
            let instance = holds.acquire(objects.container(object.index))?;
            let extension = (object.extractor)(&instance)
                .ok_or_else(|| anyhow!("managed object does not provide the extension"))?;
            extensions.push(extension);
        }

        (self.duty)(
            extensions,
            GovernanceAccess {
                administration: &self.name,
                links: &self.governance,
                metadata: governance,
                slots,
                objects,
            },
        )
    }
}

impl std::fmt::Debug for AdministrationMetaData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdministrationMetaData")
            .field("name", &self.name)
            .field("team", &self.team)
            .field("administered", &self.administered())
            .field("governance", &self.governance)
            .finish()
    }
}
