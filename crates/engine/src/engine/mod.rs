//! Execution engine
//!
//! The engine ties configured jobs, teams, managed objects, administrations
//! and governance together. Invoking a job starts a process: a thread-state
//! whose steps (pre administration, job body, post administration, follow-on
//! jobs) are carried from team to team by a [`FlowJob`](flow_job::FlowJob).
//!
//! ```text
//! invoke_process ──▶ ProcessState ──▶ ThreadState ──▶ FlowJob ──▶ Team
//!                        ▲                │   ▲                    │
//!                        │     parallel   │   └──── next step ─────┘
//!                        └────────────────┘         (other team)
//! ```

mod builder;
mod config;
mod flow_job;
mod process;
mod thread;

pub use builder::{EngineBuilder, JobConfiguration};
pub use config::EngineConfig;

pub(crate) use process::ProcessState;
pub(crate) use thread::{Step, ThreadState};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::administration::{AdministrationMetaData, GovernanceMetaData};
use crate::flow::{Escalation, FlowCompletion, FlowHandle, FlowInstigationStrategy, JobFunction};
use crate::managed::{ActiveManagedObjects, ManagedObjectMetaData};
use crate::team::{Team, TeamError};
use flow_job::FlowJob;

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Engine not opened, or already closed
    #[error("engine is not open")]
    NotOpen,

    /// No job configured under the name
    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// Team failed to start or refused work
    #[error("team error: {0}")]
    Team(#[from] TeamError),
}

/// Flow configured on a job
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlowMetaData {
    pub(crate) job: usize,
    pub(crate) strategy: FlowInstigationStrategy,
}

/// Validated job
pub(crate) struct JobMetaData {
    pub(crate) name: String,
    pub(crate) function: Arc<dyn JobFunction>,
    pub(crate) team: Option<usize>,
    pub(crate) next: Option<usize>,
    pub(crate) flows: HashMap<String, FlowMetaData>,
    pub(crate) managed_objects: Vec<usize>,
    pub(crate) pre_administration: Vec<usize>,
    pub(crate) post_administration: Vec<usize>,
}

impl std::fmt::Debug for JobMetaData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobMetaData")
            .field("name", &self.name)
            .field("team", &self.team)
            .field("next", &self.next)
            .field("flows", &self.flows)
            .finish()
    }
}

/// Everything shared by processes of one engine
pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) teams: Vec<Arc<dyn Team>>,
    pub(crate) default_team: Arc<dyn Team>,
    pub(crate) managed_objects: Vec<Arc<ManagedObjectMetaData>>,
    pub(crate) governance: Vec<Arc<GovernanceMetaData>>,
    pub(crate) administrations: Vec<AdministrationMetaData>,
    pub(crate) jobs: Vec<JobMetaData>,
    pub(crate) job_index: HashMap<String, usize>,
    pub(crate) escalation_handler: Option<usize>,
    pub(crate) active: Arc<ActiveManagedObjects>,
    pub(crate) open: AtomicBool,
}

impl EngineInner {
    /// Default team followed by the configured teams
    pub(crate) fn all_teams(&self) -> impl Iterator<Item = &Arc<dyn Team>> {
        std::iter::once(&self.default_team).chain(self.teams.iter())
    }

    fn team(&self, index: Option<usize>) -> &Arc<dyn Team> {
        index
            .and_then(|index| self.teams.get(index))
            .unwrap_or(&self.default_team)
    }

    /// Start a process, announcing it to every team from the invoking thread
    pub(crate) fn new_process(self: &Arc<Self>) -> Arc<ProcessState> {
        let process = ProcessState::new(Arc::clone(self));
        for team in self.all_teams() {
            team.process_created(process.id());
        }
        debug!(process = %process.id(), "Process created");
        process
    }

    /// Steps running `job`: its pre administration, then its body
    pub(crate) fn job_steps(
        &self,
        job: usize,
        argument: Value,
        escalation: Option<Escalation>,
        completion: Option<Arc<FlowCompletion>>,
    ) -> Vec<Step> {
        let metadata = &self.jobs[job];
        let mut steps: Vec<Step> = metadata
            .pre_administration
            .iter()
            .map(|&administration| Step::Administer {
                administration,
                job,
            })
            .collect();
        steps.push(Step::Execute {
            job,
            argument,
            escalation,
            completion,
        });
        steps
    }

    /// Assign a thread-state to the team its next step requires
    ///
    /// On failure the thread-state is dropped, abandoning its work.
    pub(crate) fn dispatch(self: &Arc<Self>, thread: ThreadState) -> Result<(), TeamError> {
        let team = self.team(thread.next_team().flatten());
        team.assign_job(Box::new(FlowJob::new(thread)))
    }
}

impl std::fmt::Debug for EngineInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineInner")
            .field("default_team", &self.default_team.name())
            .field("teams", &self.teams.len())
            .field("jobs", &self.jobs.len())
            .field("open", &self.open.load(Ordering::Relaxed))
            .finish()
    }
}

/// Configured engine
///
/// Built by [`EngineBuilder`]. Jobs can be invoked once the engine is
/// [opened](Self::open); closing stops every team.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use teamwork_engine::administration::IssueCollector;
/// use teamwork_engine::engine::{EngineBuilder, EngineConfig, JobConfiguration};
///
/// let mut issues = IssueCollector::new();
/// let engine = EngineBuilder::new(EngineConfig::default())
///     .with_job(JobConfiguration::new("double", |context| {
///         let value: u64 = context.argument_as()?;
///         Ok(json!(value * 2))
///     }))
///     .build(&mut issues)
///     .unwrap();
///
/// engine.open().unwrap();
/// let handle = engine.invoke_process("double", json!(21)).unwrap();
/// assert!(handle.wait().is_ok());
/// engine.close();
/// ```
#[derive(Debug)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub(crate) fn new(inner: EngineInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Start every team, the default team first
    #[instrument(skip(self))]
    pub fn open(&self) -> Result<(), EngineError> {
        if self.inner.open.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for team in self.inner.all_teams() {
            if let Err(error) = team.start_working() {
                self.close();
                return Err(error.into());
            }
        }

        info!(
            teams = self.inner.teams.len() + 1,
            jobs = self.inner.jobs.len(),
            "Engine opened"
        );
        Ok(())
    }

    /// Stop every team, in reverse order of starting
    ///
    /// Work still queued on a team is abandoned.
    pub fn close(&self) {
        if !self.inner.open.swap(false, Ordering::AcqRel) {
            return;
        }

        let teams: Vec<_> = self.inner.all_teams().cloned().collect();
        for team in teams.iter().rev() {
            team.stop_working();
        }
        info!("Engine closed");
    }

    /// Check if the engine is open
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Start a process running the named job with `argument`
    ///
    /// The handle completes when every thread-state of the process has.
    /// On a passive team the process runs on the calling thread before this
    /// returns.
    #[instrument(skip(self, argument))]
    pub fn invoke_process(&self, job: &str, argument: Value) -> Result<FlowHandle, EngineError> {
        if !self.is_open() {
            return Err(EngineError::NotOpen);
        }
        let Some(&index) = self.inner.job_index.get(job) else {
            return Err(EngineError::UnknownJob(job.to_string()));
        };

        let process = self.inner.new_process();
        let handle = process.handle();
        let mut thread = ThreadState::new(process, None);
        thread.push_steps(self.inner.job_steps(index, argument, None, None));
        self.inner.dispatch(thread)?;
        Ok(handle)
    }

    /// Managed object instances currently held
    pub fn active_managed_objects(&self) -> Arc<ActiveManagedObjects> {
        Arc::clone(&self.inner.active)
    }

    /// Team by name, including the default team
    pub fn team(&self, name: &str) -> Option<Arc<dyn Team>> {
        self.inner
            .all_teams()
            .find(|team| team.name() == name)
            .cloned()
    }

    /// Names of the configured jobs
    pub fn job_names(&self) -> Vec<&str> {
        self.inner
            .jobs
            .iter()
            .map(|job| job.name.as_str())
            .collect()
    }

    /// Configuration the engine was built with
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.close();
    }
}
