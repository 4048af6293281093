//! Process state

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::EngineInner;
use crate::flow::{Escalation, FlowCompletion, FlowHandle, FlowOutcome};
use crate::job::ProcessId;
use crate::managed::{ContainerTable, ManagedObjectContainer};

/// State shared by every thread-state started from one invocation
///
/// The process completes when its last thread-state does: process-scoped
/// managed objects are unloaded, the handle completes (with the first
/// unhandled escalation, if any) and teams are told the process is gone.
pub(crate) struct ProcessState {
    id: ProcessId,
    engine: Arc<EngineInner>,
    objects: Mutex<ContainerTable>,
    threads: AtomicUsize,
    escalation: Mutex<Option<Escalation>>,
    completion: Arc<FlowCompletion>,
}

impl ProcessState {
    pub(crate) fn new(engine: Arc<EngineInner>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::now_v7(),
            engine,
            objects: Mutex::new(ContainerTable::default()),
            threads: AtomicUsize::new(0),
            escalation: Mutex::new(None),
            completion: FlowCompletion::new(),
        })
    }

    pub(crate) fn id(&self) -> ProcessId {
        self.id
    }

    pub(crate) fn engine(&self) -> &Arc<EngineInner> {
        &self.engine
    }

    pub(crate) fn handle(&self) -> FlowHandle {
        self.completion.handle()
    }

    /// Process-scoped container of managed object `index`
    pub(crate) fn container(&self, index: usize) -> Arc<ManagedObjectContainer> {
        self.objects.lock().container(
            index,
            &self.engine.managed_objects[index],
            &self.engine.active,
        )
    }

    pub(crate) fn thread_started(&self) {
        self.threads.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn thread_completed(&self, outcome: FlowOutcome) {
        if let Err(escalation) = outcome {
            self.escalation.lock().get_or_insert(escalation);
        }

        if self.threads.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.complete();
        }
    }

    fn complete(&self) {
        let mut objects = std::mem::take(&mut *self.objects.lock());
        objects.unload_all();

        let outcome = match self.escalation.lock().take() {
            Some(escalation) => Err(escalation),
            None => Ok(()),
        };
        debug!(process = %self.id, success = outcome.is_ok(), "Process completed");
        self.completion.complete(outcome);

        for team in self.engine.all_teams() {
            team.process_completed(self.id);
        }
    }
}

impl std::fmt::Debug for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessState")
            .field("id", &self.id)
            .field("threads", &self.threads.load(Ordering::Relaxed))
            .finish()
    }
}
