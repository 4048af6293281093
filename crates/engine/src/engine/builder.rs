//! Engine construction and validation

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::{Engine, EngineConfig, EngineInner, FlowMetaData, JobMetaData};
use crate::administration::{
    AdministrationConfiguration, AdministrationMetaData, AssetType, ConstructionSources,
    ExtensionRegistry, GovernanceConfiguration, GovernanceMetaData, Issues,
};
use crate::flow::{FlowContext, FlowInstigationStrategy, JobFunction};
use crate::managed::{ActiveManagedObjects, ManagedObjectConfiguration, ManagedObjectMetaData};
use crate::team::{Team, TeamConfig};

/// Job descriptor
///
/// Teams, follow-on jobs, flows, managed objects and administrations are
/// referenced by name and resolved when the engine is built.
pub struct JobConfiguration {
    name: String,
    function: Arc<dyn JobFunction>,
    team: Option<String>,
    next: Option<String>,
    flows: Vec<(String, String, FlowInstigationStrategy)>,
    managed_objects: Vec<String>,
    pre_administration: Vec<String>,
    post_administration: Vec<String>,
}

impl JobConfiguration {
    /// Job running `function` as its body
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&mut FlowContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::from_function(name, function)
    }

    /// Job running a [`JobFunction`] implementation as its body
    pub fn from_function(name: impl Into<String>, function: impl JobFunction) -> Self {
        Self {
            name: name.into(),
            function: Arc::new(function),
            team: None,
            next: None,
            flows: Vec::new(),
            managed_objects: Vec::new(),
            pre_administration: Vec::new(),
            post_administration: Vec::new(),
        }
    }

    /// Run on the named team instead of the default team
    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    /// Job run after this one, with this job's return value as argument
    pub fn with_next(mut self, job: impl Into<String>) -> Self {
        self.next = Some(job.into());
        self
    }

    /// Flow `name` invoking job `target`
    pub fn with_flow(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        strategy: FlowInstigationStrategy,
    ) -> Self {
        self.flows.push((name.into(), target.into(), strategy));
        self
    }

    /// Managed object available to the body at the next object index
    pub fn with_managed_object(mut self, managed_object: impl Into<String>) -> Self {
        self.managed_objects.push(managed_object.into());
        self
    }

    /// Administration run before the body
    pub fn with_pre_administration(mut self, administration: impl Into<String>) -> Self {
        self.pre_administration.push(administration.into());
        self
    }

    /// Administration run after the body returns successfully
    pub fn with_post_administration(mut self, administration: impl Into<String>) -> Self {
        self.post_administration.push(administration.into());
        self
    }

    /// Name of the job
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for JobConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobConfiguration")
            .field("name", &self.name)
            .field("team", &self.team)
            .field("next", &self.next)
            .field("flows", &self.flows)
            .finish()
    }
}

enum TeamSource {
    Config(TeamConfig),
    Built(Arc<dyn Team>),
}

type AdministrationConstructor =
    Box<dyn FnOnce(&ConstructionSources<'_>, &mut dyn Issues) -> Option<AdministrationMetaData>>;

/// Issue sink counting what passes through
struct CountingIssues<'a> {
    inner: &'a mut dyn Issues,
    count: usize,
}

impl Issues for CountingIssues<'_> {
    fn add_issue(&mut self, asset_type: AssetType, asset_name: &str, message: String) {
        self.count += 1;
        self.inner.add_issue(asset_type, asset_name, message);
    }
}

/// Builder assembling and validating an [`Engine`]
///
/// Assets are resolved in dependency order: teams, managed objects,
/// governance, administrations, then jobs. Every problem is reported; the
/// engine is only built if there were none.
pub struct EngineBuilder {
    config: EngineConfig,
    teams: Vec<TeamSource>,
    managed_objects: Vec<ManagedObjectConfiguration>,
    extensions: ExtensionRegistry,
    governance: Vec<GovernanceConfiguration>,
    administrations: Vec<AdministrationConstructor>,
    jobs: Vec<JobConfiguration>,
    escalation_handlers: Vec<String>,
}

impl EngineBuilder {
    /// Start building an engine
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            teams: Vec::new(),
            managed_objects: Vec::new(),
            extensions: ExtensionRegistry::new(),
            governance: Vec::new(),
            administrations: Vec::new(),
            jobs: Vec::new(),
            escalation_handlers: Vec::new(),
        }
    }

    /// Add an already constructed team
    pub fn with_team(mut self, team: Arc<dyn Team>) -> Self {
        self.teams.push(TeamSource::Built(team));
        self
    }

    /// Add a team built from configuration
    pub fn with_team_config(mut self, config: TeamConfig) -> Self {
        self.teams.push(TeamSource::Config(config));
        self
    }

    /// Add a managed object
    pub fn with_managed_object(mut self, managed_object: ManagedObjectConfiguration) -> Self {
        self.managed_objects.push(managed_object);
        self
    }

    /// Declare that managed objects of type `M` provide extension `E`
    pub fn with_extension<M, E, F>(mut self, extractor: F) -> Self
    where
        M: Send + Sync + 'static,
        E: Send + 'static,
        F: Fn(&Arc<M>) -> E + Send + Sync + 'static,
    {
        self.extensions.register::<M, E, F>(extractor);
        self
    }

    /// Add a governance
    pub fn with_governance(mut self, governance: GovernanceConfiguration) -> Self {
        self.governance.push(governance);
        self
    }

    /// Add an administration
    pub fn with_administration<E>(mut self, administration: AdministrationConfiguration<E>) -> Self
    where
        E: Send + 'static,
    {
        self.administrations.push(Box::new(
            move |sources: &ConstructionSources<'_>, issues: &mut dyn Issues| {
                AdministrationMetaData::construct(administration, sources, issues)
            },
        ));
        self
    }

    /// Add a job
    pub fn with_job(mut self, job: JobConfiguration) -> Self {
        self.jobs.push(job);
        self
    }

    /// Job run with the escalation whenever a job or duty fails
    pub fn with_escalation_handler(mut self, job: impl Into<String>) -> Self {
        self.escalation_handlers.push(job.into());
        self
    }

    /// Validate the configuration, reporting every problem to `issues`
    ///
    /// Returns `None` if any issue was raised.
    pub fn build(self, issues: &mut dyn Issues) -> Option<Engine> {
        let mut issues = CountingIssues {
            inner: issues,
            count: 0,
        };

        let default_team = match self.config.default_team.build() {
            Ok(team) => Some(team),
            Err(error) => {
                issues.add_issue(
                    AssetType::Engine,
                    &self.config.default_team.name,
                    format!("Failed to build default team: {error}"),
                );
                None
            }
        };

        let teams = build_teams(self.teams, default_team.as_ref(), &mut issues);
        let team_names: Vec<String> = teams.iter().map(|team| team.name().to_string()).collect();

        let mut managed_objects: Vec<Arc<ManagedObjectMetaData>> = Vec::new();
        for configuration in self.managed_objects {
            let Some(metadata) = ManagedObjectMetaData::construct(configuration, &mut issues) else {
                continue;
            };
            if managed_objects.iter().any(|object| object.name() == metadata.name()) {
                let name = metadata.name().to_string();
                issues.add_issue(
                    AssetType::ManagedObject,
                    &name,
                    format!("Multiple managed objects named '{name}'"),
                );
                continue;
            }
            managed_objects.push(Arc::new(metadata));
        }

        let mut governance: Vec<Arc<GovernanceMetaData>> = Vec::new();
        {
            let sources =
                ConstructionSources::new(&team_names, &managed_objects, &self.extensions, &[]);
            for configuration in self.governance {
                let Some(metadata) =
                    GovernanceMetaData::construct(configuration, &sources, &mut issues)
                else {
                    continue;
                };
                if governance.iter().any(|existing| existing.name() == metadata.name()) {
                    let name = metadata.name().to_string();
                    issues.add_issue(
                        AssetType::Governance,
                        &name,
                        format!("Multiple governance named '{name}'"),
                    );
                    continue;
                }
                governance.push(Arc::new(metadata));
            }
        }
        let governance_names: Vec<String> = governance
            .iter()
            .map(|metadata| metadata.name().to_string())
            .collect();

        let mut administrations: Vec<AdministrationMetaData> = Vec::new();
        {
            let sources = ConstructionSources::new(
                &team_names,
                &managed_objects,
                &self.extensions,
                &governance_names,
            );
            for construct in self.administrations {
                let Some(metadata) = construct(&sources, &mut issues) else {
                    continue;
                };
                if administrations.iter().any(|existing| existing.name() == metadata.name()) {
                    let name = metadata.name().to_string();
                    issues.add_issue(
                        AssetType::Administration,
                        &name,
                        format!("Multiple administrations named '{name}'"),
                    );
                    continue;
                }
                administrations.push(metadata);
            }
        }

        let resolver = JobResolver {
            team_names: &team_names,
            managed_objects: &managed_objects,
            administrations: &administrations,
        };
        let (jobs, job_index) = resolver.resolve(self.jobs, &mut issues);

        let escalation_handler = match self.escalation_handlers.as_slice() {
            [] => None,
            [handler] => match job_index.get(handler) {
                Some(&index) => Some(index),
                None => {
                    issues.add_issue(
                        AssetType::Engine,
                        handler,
                        format!("Can not find escalation handler job '{handler}'"),
                    );
                    None
                }
            },
            _ => {
                issues.add_issue(
                    AssetType::Engine,
                    "",
                    "Multiple escalation handlers configured".to_string(),
                );
                None
            }
        };

        let default_team = default_team?;
        if issues.count > 0 {
            return None;
        }

        info!(
            default_team = %default_team.name(),
            teams = teams.len(),
            managed_objects = managed_objects.len(),
            governance = governance.len(),
            administrations = administrations.len(),
            jobs = jobs.len(),
            "Engine built"
        );

        Some(Engine::new(EngineInner {
            config: self.config,
            teams,
            default_team,
            managed_objects,
            governance,
            administrations,
            jobs,
            job_index,
            escalation_handler,
            active: Arc::new(ActiveManagedObjects::new()),
            open: AtomicBool::new(false),
        }))
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("teams", &self.teams.len())
            .field("managed_objects", &self.managed_objects)
            .field("jobs", &self.jobs)
            .finish()
    }
}

fn build_teams(
    sources: Vec<TeamSource>,
    default_team: Option<&Arc<dyn Team>>,
    issues: &mut dyn Issues,
) -> Vec<Arc<dyn Team>> {
    let mut teams: Vec<Arc<dyn Team>> = Vec::with_capacity(sources.len());
    for source in sources {
        let team = match source {
            TeamSource::Built(team) => team,
            TeamSource::Config(config) => match config.build() {
                Ok(team) => team,
                Err(error) => {
                    issues.add_issue(AssetType::Team, &config.name, error.to_string());
                    continue;
                }
            },
        };

        let name = team.name().to_string();
        if name.trim().is_empty() {
            issues.add_issue(AssetType::Team, "", "Team added without a name".to_string());
            continue;
        }
        let taken = default_team.is_some_and(|default| default.name() == name)
            || teams.iter().any(|existing| existing.name() == name);
        if taken {
            issues.add_issue(
                AssetType::Team,
                &name,
                format!("Multiple teams named '{name}'"),
            );
            continue;
        }
        teams.push(team);
    }
    teams
}

/// Resolves job references against the constructed assets
struct JobResolver<'a> {
    team_names: &'a [String],
    managed_objects: &'a [Arc<ManagedObjectMetaData>],
    administrations: &'a [AdministrationMetaData],
}

impl JobResolver<'_> {
    fn resolve(
        &self,
        configurations: Vec<JobConfiguration>,
        issues: &mut dyn Issues,
    ) -> (Vec<JobMetaData>, HashMap<String, usize>) {
        let mut job_index = HashMap::with_capacity(configurations.len());
        let mut accepted = Vec::with_capacity(configurations.len());
        for configuration in configurations {
            if configuration.name.trim().is_empty() {
                issues.add_issue(AssetType::Job, "", "Job added without a name".to_string());
                continue;
            }
            if job_index.contains_key(&configuration.name) {
                let name = configuration.name.clone();
                issues.add_issue(
                    AssetType::Job,
                    &name,
                    format!("Multiple jobs named '{name}'"),
                );
                continue;
            }
            job_index.insert(configuration.name.clone(), accepted.len());
            accepted.push(configuration);
        }

        let jobs = accepted
            .into_iter()
            .map(|config| self.resolve_job(config, &job_index, issues))
            .collect();
        (jobs, job_index)
    }

    fn resolve_job(
        &self,
        configuration: JobConfiguration,
        job_index: &HashMap<String, usize>,
        issues: &mut dyn Issues,
    ) -> JobMetaData {
        let JobConfiguration {
            name,
            function,
            team,
            next,
            flows: flow_configurations,
            managed_objects: object_names,
            pre_administration,
            post_administration,
        } = configuration;

        let team = team.and_then(|team| {
            let index = self.team_names.iter().position(|name| *name == team);
            if index.is_none() {
                issues.add_issue(
                    AssetType::Job,
                    &name,
                    format!("Can not find team '{team}' for job '{name}'"),
                );
            }
            index
        });

        let next = next.and_then(|next| {
            let index = job_index.get(&next).copied();
            if index.is_none() {
                issues.add_issue(
                    AssetType::Job,
                    &name,
                    format!("Can not find next job '{next}' for job '{name}'"),
                );
            }
            index
        });

        let mut flows = HashMap::with_capacity(flow_configurations.len());
        for (flow, target, strategy) in flow_configurations {
            match job_index.get(&target) {
                Some(&job) => {
                    flows.insert(flow, FlowMetaData { job, strategy });
                }
                None => issues.add_issue(
                    AssetType::Job,
                    &name,
                    format!("Can not find job '{target}' for flow '{flow}' of job '{name}'"),
                ),
            }
        }

        let managed_objects = object_names
            .iter()
            .filter_map(|object| {
                let index = self
                    .managed_objects
                    .iter()
                    .position(|metadata| metadata.name() == object);
                if index.is_none() {
                    issues.add_issue(
                        AssetType::Job,
                        &name,
                        format!("Can not find managed object '{object}' for job '{name}'"),
                    );
                }
                index
            })
            .collect();

        let pre_administration = self.resolve_administrations(&name, &pre_administration, issues);
        let post_administration = self.resolve_administrations(&name, &post_administration, issues);

        JobMetaData {
            name,
            function,
            team,
            next,
            flows,
            managed_objects,
            pre_administration,
            post_administration,
        }
    }

    fn resolve_administrations(
        &self,
        job: &str,
        names: &[String],
        issues: &mut dyn Issues,
    ) -> Vec<usize> {
        names
            .iter()
            .filter_map(|administration| {
                let index = self
                    .administrations
                    .iter()
                    .position(|metadata| metadata.name() == administration);
                if index.is_none() {
                    issues.add_issue(
                        AssetType::Job,
                        job,
                        format!("Can not find administration '{administration}' for job '{job}'"),
                    );
                }
                index
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::administration::IssueCollector;
    use serde_json::json;

    fn noop(name: &str) -> JobConfiguration {
        JobConfiguration::new(name, |_context| Ok(Value::Null))
    }

    #[test]
    fn test_build_minimal_engine() {
        let mut issues = IssueCollector::new();
        let engine = EngineBuilder::new(EngineConfig::default())
            .with_team_config(TeamConfig::one_person("io"))
            .with_job(noop("a").with_team("io").with_next("b"))
            .with_job(noop("b"))
            .build(&mut issues)
            .unwrap();

        assert!(issues.is_empty());
        assert_eq!(engine.job_names(), vec!["a", "b"]);
        assert!(engine.team("io").is_some());
        assert!(engine.team("default").is_some());
        assert!(!engine.is_open());
    }

    #[test]
    fn test_unresolved_references_are_issues() {
        let mut issues = IssueCollector::new();
        let engine = EngineBuilder::new(EngineConfig::default())
            .with_job(
                noop("a")
                    .with_team("missing-team")
                    .with_next("missing-job")
                    .with_flow("go", "nowhere", FlowInstigationStrategy::Parallel)
                    .with_managed_object("missing-object")
                    .with_pre_administration("missing-administration"),
            )
            .build(&mut issues);

        assert!(engine.is_none());
        assert_eq!(
            issues.messages(),
            vec![
                "Can not find team 'missing-team' for job 'a'",
                "Can not find next job 'missing-job' for job 'a'",
                "Can not find job 'nowhere' for flow 'go' of job 'a'",
                "Can not find managed object 'missing-object' for job 'a'",
                "Can not find administration 'missing-administration' for job 'a'",
            ]
        );
    }

    #[test]
    fn test_duplicate_names_are_issues() {
        let mut issues = IssueCollector::new();
        let engine = EngineBuilder::new(EngineConfig::default())
            .with_team_config(TeamConfig::one_person("default"))
            .with_team_config(TeamConfig::passive("inline"))
            .with_team_config(TeamConfig::passive("inline"))
            .with_job(noop("a"))
            .with_job(noop("a"))
            .build(&mut issues);

        assert!(engine.is_none());
        assert_eq!(
            issues.messages(),
            vec![
                "Multiple teams named 'default'",
                "Multiple teams named 'inline'",
                "Multiple jobs named 'a'",
            ]
        );
    }

    #[test]
    fn test_escalation_handler_validation() {
        let mut issues = IssueCollector::new();
        let engine = EngineBuilder::new(EngineConfig::default())
            .with_job(noop("handler"))
            .with_escalation_handler("handler")
            .with_escalation_handler("handler")
            .build(&mut issues);
        assert!(engine.is_none());
        assert_eq!(
            issues.messages(),
            vec!["Multiple escalation handlers configured"]
        );

        let mut issues = IssueCollector::new();
        let engine = EngineBuilder::new(EngineConfig::default())
            .with_escalation_handler("missing")
            .build(&mut issues);
        assert!(engine.is_none());
        assert_eq!(
            issues.messages(),
            vec!["Can not find escalation handler job 'missing'"]
        );
    }

    #[test]
    fn test_invalid_team_config_is_an_issue() {
        let mut issues = IssueCollector::new();
        let engine = EngineBuilder::new(EngineConfig::default())
            .with_team_config(TeamConfig::leader_follower("workers", 0))
            .build(&mut issues);
        assert!(engine.is_none());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues.issues()[0].asset_type, AssetType::Team);
    }

    #[test]
    fn test_invoke_requires_open_engine() {
        let mut issues = IssueCollector::new();
        let engine = EngineBuilder::new(EngineConfig::default())
            .with_job(JobConfiguration::new("echo", |context| Ok(context.take_argument())))
            .build(&mut issues)
            .unwrap();

        assert!(matches!(
            engine.invoke_process("echo", json!(1)),
            Err(crate::engine::EngineError::NotOpen)
        ));

        engine.open().unwrap();
        assert!(matches!(
            engine.invoke_process("missing", json!(1)),
            Err(crate::engine::EngineError::UnknownJob(name)) if name == "missing"
        ));
        let outcome = engine.invoke_process("echo", json!(1)).unwrap().wait();
        assert!(outcome.is_ok());
        engine.close();
        assert!(!engine.is_open());
    }
}
