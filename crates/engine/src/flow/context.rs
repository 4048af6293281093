//! Context handed to a running job body

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{Escalation, FlowCompletion, FlowError, FlowHandle, FlowInstigationStrategy};
use crate::engine::{JobMetaData, Step, ThreadState};
use crate::job::{JobContext, ProcessId};
use crate::managed::ObjectHolds;

/// Body of a configured job
///
/// Implemented for every `Fn(&mut FlowContext<'_>) -> anyhow::Result<Value>`.
/// The returned value is the argument of the job's `next` job, if any. An
/// error escalates.
pub trait JobFunction: Send + Sync + 'static {
    fn execute(&self, context: &mut FlowContext<'_>) -> anyhow::Result<Value>;
}

impl<F> JobFunction for F
where
    F: Fn(&mut FlowContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn execute(&self, context: &mut FlowContext<'_>) -> anyhow::Result<Value> {
        self(context)
    }
}

/// View of the engine available to a job body while it runs
///
/// Provides the job's argument, its managed objects (held until the body
/// returns) and invocation of the flows configured on the job.
pub struct FlowContext<'a> {
    job: &'a JobMetaData,
    argument: Value,
    escalation: Option<Escalation>,
    thread: &'a mut ThreadState,
    pass: &'a JobContext<'a>,
    sequential: Vec<Step>,
    holds: ObjectHolds,
}

impl<'a> FlowContext<'a> {
    pub(crate) fn new(
        job: &'a JobMetaData,
        argument: Value,
        escalation: Option<Escalation>,
        thread: &'a mut ThreadState,
        pass: &'a JobContext<'a>,
    ) -> Self {
        Self {
            job,
            argument,
            escalation,
            thread,
            pass,
            sequential: Vec::new(),
            holds: ObjectHolds::with_capacity(job.managed_objects.len()),
        }
    }

    /// Name of the running job
    pub fn job_name(&self) -> &str {
        &self.job.name
    }

    /// Argument the job was invoked with
    pub fn argument(&self) -> &Value {
        &self.argument
    }

    /// Take the argument, leaving `Value::Null`
    pub fn take_argument(&mut self) -> Value {
        self.argument.take()
    }

    /// Deserialize the argument
    pub fn argument_as<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(T::deserialize(&self.argument)?)
    }

    /// Escalation being handled, set for the escalation handler only
    pub fn escalation(&self) -> Option<&Escalation> {
        self.escalation.as_ref()
    }

    /// Current time, cached for the pass
    pub fn time(&self) -> DateTime<Utc> {
        self.pass.time()
    }

    /// Name of the team running the job
    pub fn team_name(&self) -> &str {
        self.pass.team_name()
    }

    /// Process the job belongs to
    pub fn process_id(&self) -> ProcessId {
        self.thread.process().id()
    }

    /// Whether the running team is still working
    pub fn continue_execution(&self) -> bool {
        self.pass.continue_execution()
    }

    /// Managed object configured on the job at `index`
    ///
    /// The object is loaded on first use in its scope and held until the
    /// body returns.
    pub fn object<M>(&mut self, index: usize) -> Result<Arc<M>, FlowError>
    where
        M: Send + Sync + 'static,
    {
        let Some(&object) = self.job.managed_objects.get(index) else {
            return Err(FlowError::UnknownObject {
                job: self.job.name.clone(),
                index,
            });
        };

        let container = self.thread.container(object);
        let name = container.metadata().name().to_string();
        let instance = self
            .holds
            .acquire(container)
            .map_err(|source| FlowError::Load {
                name: name.clone(),
                source,
            })?;

        instance.downcast::<M>().map_err(|_| FlowError::ObjectType {
            name,
            expected: std::any::type_name::<M>(),
        })
    }

    /// Invoke the flow named `flow` with `argument`
    ///
    /// A sequential flow runs once this job (and its post administration)
    /// has finished. A parallel flow starts a new thread-state of this
    /// process. An asynchronous flow starts a new process; its handle
    /// completes with that process.
    pub fn invoke(&mut self, flow: &str, argument: Value) -> Result<FlowHandle, FlowError> {
        let Some(target) = self.job.flows.get(flow) else {
            return Err(FlowError::UnknownFlow {
                job: self.job.name.clone(),
                flow: flow.to_string(),
            });
        };

        let engine = Arc::clone(self.thread.process().engine());
        debug!(
            job = %self.job.name,
            flow,
            strategy = %target.strategy,
            "Invoking flow"
        );

        match target.strategy {
            FlowInstigationStrategy::Sequential => {
                let completion = FlowCompletion::new();
                let handle = completion.handle();
                let steps = engine.job_steps(target.job, argument, None, Some(completion));
                self.sequential.extend(steps);
                Ok(handle)
            }
            FlowInstigationStrategy::Parallel => {
                let completion = FlowCompletion::new();
                let handle = completion.handle();
                let mut thread =
                    ThreadState::new(Arc::clone(self.thread.process()), Some(completion));
                thread.push_steps(engine.job_steps(target.job, argument, None, None));
                engine.dispatch(thread)?;
                Ok(handle)
            }
            FlowInstigationStrategy::Asynchronous => {
                let process = engine.new_process();
                let handle = process.handle();
                let mut thread = ThreadState::new(process, None);
                thread.push_steps(engine.job_steps(target.job, argument, None, None));
                engine.dispatch(thread)?;
                Ok(handle)
            }
        }
    }

    /// Sequential flows invoked by the body; releases held objects
    pub(crate) fn finish(self) -> Vec<Step> {
        self.sequential
    }
}

impl std::fmt::Debug for FlowContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowContext")
            .field("job", &self.job.name)
            .field("process", &self.thread.process().id())
            .field("sequential", &self.sequential.len())
            .finish()
    }
}
