//! Completion handles for invoked flows

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Failure of a job body or duty, routed to the escalation handler
///
/// Cloneable so one failure can complete several handles.
#[derive(Debug, Clone, thiserror::Error)]
#[error("job '{job}' escalated: {cause}")]
pub struct Escalation {
    job: String,
    cause: Arc<anyhow::Error>,
    abandoned: bool,
}

impl Escalation {
    /// Create an escalation raised by `job`
    pub fn new(job: impl Into<String>, cause: anyhow::Error) -> Self {
        Self {
            job: job.into(),
            cause: Arc::new(cause),
            abandoned: false,
        }
    }

    /// Escalation for work dropped before it could complete
    pub fn abandoned(job: impl Into<String>) -> Self {
        Self {
            abandoned: true,
            ..Self::new(job, anyhow::anyhow!("abandoned before completion"))
        }
    }

    /// Name of the job (or administration) that failed
    pub fn job(&self) -> &str {
        &self.job
    }

    /// Underlying failure
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// Check if this escalation reports abandoned work
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }
}

/// Outcome of a completed flow
pub type FlowOutcome = Result<(), Escalation>;

type Callback = Box<dyn FnOnce(&FlowOutcome) + Send>;

#[derive(Default)]
struct CompletionState {
    outcome: Option<FlowOutcome>,
    callbacks: Vec<Callback>,
}

/// Completion signal shared between the engine and [`FlowHandle`]s
#[derive(Default)]
pub(crate) struct FlowCompletion {
    state: Mutex<CompletionState>,
    completed: Condvar,
}

impl FlowCompletion {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record the outcome and run callbacks; later calls are ignored
    pub(crate) fn complete(&self, outcome: FlowOutcome) {
        let callbacks = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return;
            }
            state.outcome = Some(outcome.clone());
            self.completed.notify_all();
            std::mem::take(&mut state.callbacks)
        };

        for callback in callbacks {
            callback(&outcome);
        }
    }

    pub(crate) fn handle(self: &Arc<Self>) -> FlowHandle {
        FlowHandle {
            completion: Arc::clone(self),
        }
    }
}

impl fmt::Debug for FlowCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowCompletion")
            .field("outcome", &self.state.lock().outcome)
            .finish()
    }
}

/// Handle on an invoked flow or process
///
/// # Example
///
/// ```ignore
/// let handle = engine.invoke_process("task", json!(1))?;
/// handle.on_complete(|outcome| println!("done: {}", outcome.is_ok()));
/// handle.wait()?;
/// ```
#[derive(Debug, Clone)]
pub struct FlowHandle {
    completion: Arc<FlowCompletion>,
}

impl FlowHandle {
    /// Register a callback run once the flow completes
    ///
    /// Runs immediately on the calling thread if the flow already completed,
    /// otherwise on the thread completing the flow.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&FlowOutcome) + Send + 'static,
    {
        let outcome = {
            let mut state = self.completion.state.lock();
            match &state.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    state.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&outcome);
    }

    /// Check if the flow has completed
    pub fn is_complete(&self) -> bool {
        self.completion.state.lock().outcome.is_some()
    }

    /// Outcome, if complete
    pub fn outcome(&self) -> Option<FlowOutcome> {
        self.completion.state.lock().outcome.clone()
    }

    /// Block until the flow completes
    ///
    /// Must not be called from a job of the same flow on a passive team, the
    /// flow would never get to run.
    pub fn wait(&self) -> FlowOutcome {
        let mut state = self.completion.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            self.completion.completed.wait(&mut state);
        }
    }

    /// Block until the flow completes or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<FlowOutcome> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.completion.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return Some(outcome.clone());
            }
            if self
                .completion
                .completed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.outcome.clone();
            }
        }
    }
}
