//! # Teamwork Execution Engine
//!
//! An in-process engine running configured jobs on pluggable teams of threads.
//!
//! ## Features
//!
//! - **Teams**: one-person, leader/follower, worker-per-task, passive and
//!   process-context worker pools behind a single [`Team`](team::Team) contract
//! - **Resumable jobs**: a job runs in passes and may yield its team between them
//! - **Flows**: sequential, parallel and asynchronous continuations, each with a
//!   [`FlowHandle`](flow::FlowHandle)
//! - **Administration**: duties run around jobs against managed object extensions
//! - **Governance**: transactional activate/enforce/disregard over managed objects,
//!   disregarded automatically on escalation and at thread-state tidy-up
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │  (validated jobs, flows, administrations, governance)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ invoke_process
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              ProcessState ─▶ ThreadState(s)                  │
//! │  (managed object scopes, escalation, completion handles)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ FlowJob
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Teams                               │
//! │  (TaskQueue, TeamMemberStack, inline trampoline)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use teamwork_engine::prelude::*;
//!
//! let mut issues = IssueCollector::new();
//! let engine = EngineBuilder::new(EngineConfig::default())
//!     .with_team_config(TeamConfig::leader_follower("workers", 2))
//!     .with_job(
//!         JobConfiguration::new("greet", |context| {
//!             let name: String = context.argument_as()?;
//!             Ok(json!(format!("hello {name}")))
//!         })
//!         .with_team("workers"),
//!     )
//!     .build(&mut issues)
//!     .expect("valid configuration");
//!
//! engine.open().unwrap();
//! let handle = engine.invoke_process("greet", json!("world")).unwrap();
//! assert!(handle.wait().is_ok());
//! engine.close();
//! ```

pub mod administration;
pub mod engine;
pub mod flow;
pub mod job;
pub mod managed;
pub mod team;

/// Prelude for common imports
pub mod prelude {
    pub use crate::administration::{
        AdministrationConfiguration, AdministrationContext, AssetType, Duty, Governance,
        GovernanceConfiguration, GovernanceManager, IssueCollector, Issues,
    };
    pub use crate::engine::{Engine, EngineBuilder, EngineConfig, EngineError, JobConfiguration};
    pub use crate::flow::{
        Escalation, FlowContext, FlowError, FlowHandle, FlowInstigationStrategy, FlowOutcome,
        JobFunction,
    };
    pub use crate::job::{job_fn, Job, JobContext, JobOutcome, ProcessId};
    pub use crate::managed::{ManagedObjectConfiguration, ManagedObjectScope};
    pub use crate::team::{Team, TeamConfig, TeamError, TeamKind};
}

// Re-export key types at crate root
pub use administration::{IssueCollector, Issues};
pub use engine::{Engine, EngineBuilder, EngineConfig, EngineError, JobConfiguration};
pub use flow::{Escalation, FlowContext, FlowError, FlowHandle, FlowInstigationStrategy};
pub use job::{Job, JobContext, JobOutcome};
pub use team::{Team, TeamConfig, TeamError};
