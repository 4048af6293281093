//! Thread-state: one sequential chain of steps within a process

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use super::process::ProcessState;
use super::EngineInner;
use crate::administration::ActiveGovernance;
use crate::flow::{Escalation, FlowCompletion, FlowContext, FlowOutcome};
use crate::job::JobContext;
use crate::managed::{ContainerSource, ContainerTable, ManagedObjectContainer, ManagedObjectScope};
use crate::team::panic_message;

/// Unit of work within a thread-state
pub(crate) enum Step {
    /// Run a duty of `administration` on behalf of `job`
    Administer { administration: usize, job: usize },

    /// Run the body of `job`
    Execute {
        job: usize,
        argument: Value,
        escalation: Option<Escalation>,
        completion: Option<Arc<FlowCompletion>>,
    },

    /// Complete the handle of a sequential flow
    Notify(Arc<FlowCompletion>),
}

impl Step {
    /// Team required to run this step, `None` for any team
    pub(crate) fn team(&self, engine: &EngineInner) -> Option<usize> {
        match self {
            Self::Administer { administration, .. } => {
                engine.administrations[*administration].team()
            }
            Self::Execute { job, .. } => engine.jobs[*job].team,
            Self::Notify(_) => None,
        }
    }

    /// Step discarded without running: fail the handle it would complete
    fn fail(self, escalation: &Escalation) {
        match self {
            Self::Execute {
                completion: Some(completion),
                ..
            }
            | Self::Notify(completion) => completion.complete(Err(escalation.clone())),
            _ => {}
        }
    }
}

/// Managed objects visible to a thread-state
struct ScopedObjects<'a> {
    thread: &'a mut ContainerTable,
    process: &'a ProcessState,
}

impl ContainerSource for ScopedObjects<'_> {
    fn container(&mut self, index: usize) -> Arc<ManagedObjectContainer> {
        let engine = self.process.engine();
        let metadata = &engine.managed_objects[index];
        match metadata.scope() {
            ManagedObjectScope::Process => self.process.container(index),
            ManagedObjectScope::Thread => self.thread.container(index, metadata, &engine.active),
        }
    }
}

/// Sequential chain of steps, moved between teams as it runs
pub(crate) struct ThreadState {
    process: Arc<ProcessState>,
    steps: VecDeque<Step>,
    objects: ContainerTable,
    governance: Vec<Option<ActiveGovernance>>,
    completion: Option<Arc<FlowCompletion>>,
    escalation: Option<Escalation>,
    handling_escalation: bool,
    finished: bool,
}

impl ThreadState {
    /// Thread-state of `process`, completing `completion` when done
    pub(crate) fn new(process: Arc<ProcessState>, completion: Option<Arc<FlowCompletion>>) -> Self {
        process.thread_started();
        Self {
            process,
            steps: VecDeque::new(),
            objects: ContainerTable::default(),
            governance: Vec::new(),
            completion,
            escalation: None,
            handling_escalation: false,
            finished: false,
        }
    }

    pub(crate) fn process(&self) -> &Arc<ProcessState> {
        &self.process
    }

    pub(crate) fn push_steps(&mut self, steps: impl IntoIterator<Item = Step>) {
        self.steps.extend(steps);
    }

    /// Team required by the next step: `None` when no steps remain,
    /// `Some(None)` when any team will do
    pub(crate) fn next_team(&self) -> Option<Option<usize>> {
        self.steps
            .front()
            .map(|step| step.team(self.process.engine()))
    }

    /// Container of managed object `index`, in the scope it is configured for
    pub(crate) fn container(&mut self, index: usize) -> Arc<ManagedObjectContainer> {
        ScopedObjects {
            thread: &mut self.objects,
            process: &self.process,
        }
        .container(index)
    }

    /// Run the next step
    pub(crate) fn run_step(&mut self, pass: &JobContext<'_>) {
        let Some(step) = self.steps.pop_front() else {
            return;
        };

        match step {
            Step::Administer {
                administration,
                job,
            } => self.administer(administration, job),
            Step::Execute {
                job,
                argument,
                escalation,
                completion,
            } => self.execute(job, argument, escalation, completion, pass),
            Step::Notify(completion) => completion.complete(Ok(())),
        }
    }

    fn administer(&mut self, administration: usize, job: usize) {
        let engine = Arc::clone(self.process.engine());
        let metadata = &engine.administrations[administration];

        let mut objects = ScopedObjects {
            thread: &mut self.objects,
            process: &self.process,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            metadata.administer(&mut objects, &mut self.governance, &engine.governance)
        }))
        .unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            Err(anyhow::anyhow!("duty panicked: {message}"))
        });

        if let Err(error) = result {
            let escalation = Escalation::new(
                engine.jobs[job].name.clone(),
                error.context(format!("administration '{}' failed", metadata.name())),
            );
            self.escalate(escalation, None);
        }
    }

    fn execute(
        &mut self,
        job: usize,
        argument: Value,
        escalation: Option<Escalation>,
        completion: Option<Arc<FlowCompletion>>,
        pass: &JobContext<'_>,
    ) {
        let engine = Arc::clone(self.process.engine());
        let metadata = &engine.jobs[job];

        let mut context = FlowContext::new(metadata, argument, escalation, self, pass);
        let body = AssertUnwindSafe(|| metadata.function.execute(&mut context));
        let result = panic::catch_unwind(body).unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            Err(anyhow::anyhow!("job panicked: {message}"))
        });
        let sequential = context.finish();

        let value = match result {
            Ok(value) => value,
            Err(error) => {
                for step in sequential {
                    step.fail(&Escalation::abandoned(&metadata.name));
                }
                self.escalate(Escalation::new(metadata.name.clone(), error), completion);
                return;
            }
        };

        let mut continuation: Vec<Step> = metadata
            .post_administration
            .iter()
            .map(|&administration| Step::Administer {
                administration,
                job,
            })
            .collect();
        continuation.extend(sequential);
        continuation.extend(completion.map(Step::Notify));
        if let Some(next) = metadata.next {
            continuation.extend(engine.job_steps(next, value, None, None));
        }

        for step in continuation.into_iter().rev() {
            self.steps.push_front(step);
        }
    }

    /// Route a failure to the escalation handler, abandoning the rest of
    /// the chain
    fn escalate(&mut self, escalation: Escalation, failed: Option<Arc<FlowCompletion>>) {
        if let Some(completion) = failed {
            completion.complete(Err(escalation.clone()));
        }

        self.disregard_governance("escalation");
        for step in self.steps.drain(..) {
            step.fail(&escalation);
        }

        let engine = Arc::clone(self.process.engine());
        match engine.escalation_handler {
            Some(handler) if !self.handling_escalation => {
                debug!(
                    process = %self.process.id(),
                    job = %escalation.job(),
                    handler = %engine.jobs[handler].name,
                    "Handling escalation"
                );
                self.handling_escalation = true;
                let steps = engine.job_steps(handler, Value::Null, Some(escalation), None);
                self.steps.extend(steps);
            }
            _ => {
                error!(
                    process = %self.process.id(),
                    job = %escalation.job(),
                    error = %escalation.cause(),
                    "Escalation not handled"
                );
                self.escalation.get_or_insert(escalation);
            }
        }
    }

    /// Disregard every governance still active in this thread-state
    fn disregard_governance(&mut self, reason: &str) {
        for active in self.governance.iter_mut().filter_map(Option::take) {
            debug!(governance = %active.name(), reason, "Disregarding active governance");
            let name = active.name().to_string();
            if let Err(error) = active.disregard() {
                warn!(governance = %name, error = %error, "Failed to disregard governance");
            }
        }
    }

    /// Run the end-of-chain tidy-up and report the outcome to the process
    fn finish(&mut self, outcome: FlowOutcome) {
        if self.finished {
            return;
        }
        self.finished = true;

        self.disregard_governance("tidy up");
        self.objects.unload_all();

        if let Some(completion) = self.completion.take() {
            completion.complete(outcome.clone());
        }
        self.process.thread_completed(outcome);
    }

    /// All steps have run
    pub(crate) fn complete(mut self) {
        let outcome = match self.escalation.take() {
            Some(escalation) => Err(escalation),
            None => Ok(()),
        };
        self.finish(outcome);
    }
}

impl Drop for ThreadState {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let job = self
            .steps
            .iter()
            .find_map(|step| match step {
                Step::Execute { job, .. } => Some(self.process.engine().jobs[*job].name.clone()),
                _ => None,
            })
            .unwrap_or_default();
        warn!(process = %self.process.id(), job = %job, "Thread-state abandoned before completion");

        let escalation = Escalation::abandoned(job);
        for step in self.steps.drain(..) {
            step.fail(&escalation);
        }
        self.finish(Err(escalation));
    }
}

impl std::fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadState")
            .field("process", &self.process.id())
            .field("steps", &self.steps.len())
            .finish()
    }
}
