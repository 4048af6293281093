//! Teams (worker pools) executing jobs
//!
//! This module provides:
//! - [`Team`] - The worker pool contract
//! - [`TaskQueue`] - FIFO of pending jobs shared by a team's workers
//! - [`TeamMemberStack`] - Leader/follower coordination
//! - [`TeamConfig`] - Serializable team configuration
//!
//! # Variants
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┬──────────────────────────────┐
//! │ Team             │ Threads                  │ Dispatch                     │
//! ├──────────────────┼──────────────────────────┼──────────────────────────────┤
//! │ OnePersonTeam    │ one dedicated worker     │ polls the queue with timeout │
//! │ LeaderFollower   │ N workers                │ only the leader polls        │
//! │ WorkerPerTask    │ one thread per job       │ thread loops until complete  │
//! │ PassiveTeam      │ caller's thread          │ runs inline                  │
//! │ ProcessContext   │ process creator's thread │ routes by process identity   │
//! └──────────────────┴──────────────────────────┴──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use teamwork_engine::job::{job_fn, JobOutcome};
//! use teamwork_engine::team::{Team, TeamConfig};
//!
//! let team = TeamConfig::leader_follower("workers", 4).build().unwrap();
//! team.start_working().unwrap();
//! team.assign_job(job_fn(|_| JobOutcome::Complete)).unwrap();
//! team.stop_working();
//! ```

mod config;
mod leader_follower;
mod one_person;
mod passive;
mod process_context;
mod queue;
mod worker;
mod worker_per_task;

pub use config::{TeamConfig, TeamConfigError, TeamKind};
pub use leader_follower::{LeaderFollowerTeam, TeamMemberStack};
pub use one_person::OnePersonTeam;
pub use passive::PassiveTeam;
pub use process_context::ProcessContextTeam;
pub use queue::TaskQueue;
pub use worker::TeamLifecycle;
pub use worker_per_task::WorkerPerTaskTeam;

pub(crate) use worker::panic_message;

use crate::job::{BoxedJob, ProcessId};

/// Team errors
#[derive(Debug, thiserror::Error)]
pub enum TeamError {
    /// Job assigned to a team that is not working
    #[error("team '{0}' is not working")]
    NotWorking(String),

    /// Worker thread could not be spawned
    #[error("failed to spawn worker thread for team '{team}': {source}")]
    Spawn {
        team: String,
        #[source]
        source: std::io::Error,
    },
}

/// A worker pool executing [`Job`](crate::job::Job)s
///
/// Lifecycle: `start_working → (assign_job)* → stop_working`. Shutdown is
/// cooperative: `stop_working` flags the team as stopping, wakes blocked
/// workers and waits for each to finish its current pass.
pub trait Team: Send + Sync {
    /// Unique name of the team
    fn name(&self) -> &str;

    /// Start accepting jobs (idempotent)
    fn start_working(&self) -> Result<(), TeamError>;

    /// Hand a job to the team
    ///
    /// Only passive variants run the job on the calling thread; every other
    /// variant returns immediately.
    fn assign_job(&self, job: BoxedJob) -> Result<(), TeamError>;

    /// Stop working, blocking until workers have finished their current pass
    fn stop_working(&self);

    /// Whether the team is accepting jobs
    fn is_working(&self) -> bool;

    /// Called on the creating thread when a process is created
    fn process_created(&self, _process: ProcessId) {}

    /// Called when every flow of a process has completed
    fn process_completed(&self, _process: ProcessId) {}
}

impl std::fmt::Debug for dyn Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Team")
            .field("name", &self.name())
            .field("working", &self.is_working())
            .finish()
    }
}
