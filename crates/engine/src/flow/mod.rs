//! Flow instigation
//!
//! A running job may invoke a named flow. Each flow is a configured edge to
//! a follow-on job tagged with a [`FlowInstigationStrategy`]:
//!
//! ```text
//! Sequential    ──▶ next step of the same thread-state, after the current job
//! Parallel      ──▶ new thread-state of the same process, dispatched at once
//! Asynchronous  ──▶ new process with its own thread-state and escalation domain
//! ```
//!
//! Every invocation returns a [`FlowHandle`] completing when the invoked work
//! does.

mod context;
mod handle;

pub use context::{FlowContext, JobFunction};
pub use handle::{Escalation, FlowHandle, FlowOutcome};

pub(crate) use handle::FlowCompletion;

use serde::{Deserialize, Serialize};

use crate::team::TeamError;

/// How an invoked flow is scheduled relative to its invoker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowInstigationStrategy {
    /// Run after the invoking job, in the same thread-state
    Sequential,

    /// Run concurrently, in a new thread-state of the same process
    Parallel,

    /// Run in a new process
    Asynchronous,
}

impl std::fmt::Display for FlowInstigationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Asynchronous => write!(f, "asynchronous"),
        }
    }
}

/// Flow invocation errors
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Flow not configured on the invoking job
    #[error("job '{job}' has no flow named '{flow}'")]
    UnknownFlow { job: String, flow: String },

    /// Managed object index not configured on the job
    #[error("job '{job}' has no managed object at index {index}")]
    UnknownObject { job: String, index: usize },

    /// Managed object of another type than requested
    #[error("managed object '{name}' is not a {expected}")]
    ObjectType {
        name: String,
        expected: &'static str,
    },

    /// Managed object failed to load
    #[error("failed to load managed object '{name}': {source}")]
    Load {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Team refused the invoked work
    #[error("team error: {0}")]
    Team(#[from] TeamError),
}
