//! Team executing jobs on the thread that created their process
//!
//! A thread lends itself to the team through [`ProcessContextTeam::run`].
//! Processes created inside `run` are registered against that thread (via
//! [`Team::process_created`]) and their jobs are queued back to it; `run`
//! keeps executing them until every such process has completed. Jobs of
//! processes created elsewhere run inline on the assigning thread.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use super::passive::{run_inline, InlineTeam};
use super::queue::TaskQueue;
use super::worker::execute_pass;
use super::{Team, TeamError};
use crate::job::{BoxedJob, ProcessId};

static NEXT_TEAM_ID: AtomicU64 = AtomicU64::new(1);

/// Jobs waiting for one context thread
#[derive(Debug, Default)]
struct ContextQueue {
    queue: TaskQueue,
    processes: AtomicUsize,
    in_pass: AtomicBool,
}

thread_local! {
    static CONTEXTS: RefCell<Vec<(u64, Arc<ContextQueue>)>> = const { RefCell::new(Vec::new()) };
}

fn current_context(team: u64) -> Option<Arc<ContextQueue>> {
    CONTEXTS.with(|contexts| {
        contexts
            .borrow()
            .iter()
            .rev()
            .find(|(id, _)| *id == team)
            .map(|(_, context)| Arc::clone(context))
    })
}

/// Team borrowing the threads of process creators
#[derive(Debug)]
pub struct ProcessContextTeam {
    id: u64,
    inline: Arc<InlineTeam>,
    contexts: DashMap<ProcessId, Arc<ContextQueue>>,
    poll_interval: Duration,
    passes: Mutex<usize>,
    idle: Condvar,
}

impl ProcessContextTeam {
    /// Create a team whose context threads re-check for shutdown every `poll_interval`
    pub fn new(name: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            id: NEXT_TEAM_ID.fetch_add(1, Ordering::Relaxed),
            inline: InlineTeam::new(name.into()),
            contexts: DashMap::new(),
            poll_interval,
            passes: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    /// Lend the calling thread to the team while `f` runs
    ///
    /// After `f` returns, the thread keeps executing jobs of the processes
    /// created within `f` until they have all completed or the team stops.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let context = Arc::new(ContextQueue::default());
        CONTEXTS.with(|contexts| contexts.borrow_mut().push((self.id, Arc::clone(&context))));

        let result = f();

        loop {
            let working = self.inline.lifecycle.is_working();
            let job = if working && context.processes.load(Ordering::Acquire) > 0 {
                context.queue.dequeue_timeout(self.poll_interval)
            } else {
                context.queue.dequeue()
            };

            match job {
                Some(job) => {
                    if let Some(job) = self.context_pass(&context, job) {
                        context.queue.enqueue(job);
                    }
                }
                None if !working || context.processes.load(Ordering::Acquire) == 0 => break,
                None => {}
            }
        }

        CONTEXTS.with(|contexts| {
            let mut contexts = contexts.borrow_mut();
            if let Some(position) = contexts
                .iter()
                .rposition(|(_, registered)| Arc::ptr_eq(registered, &context))
            {
                contexts.remove(position);
            }
        });
        self.contexts
            .retain(|_, registered| !Arc::ptr_eq(registered, &context));

        result
    }

    /// One pass on a context thread, visible to `stop_working`
    fn context_pass(&self, context: &ContextQueue, job: BoxedJob) -> Option<BoxedJob> {
        *self.passes.lock() += 1;
        context.in_pass.store(true, Ordering::Release);
        let job = execute_pass(&self.inline.name, &self.inline.lifecycle, job);
        context.in_pass.store(false, Ordering::Release);

        let mut passes = self.passes.lock();
        *passes -= 1;
        self.idle.notify_all();
        job
    }

    /// Number of processes currently bound to a context thread
    pub fn bound_processes(&self) -> usize {
        self.contexts.len()
    }
}

impl Team for ProcessContextTeam {
    fn name(&self) -> &str {
        &self.inline.name
    }

    fn start_working(&self) -> Result<(), TeamError> {
        if self.inline.lifecycle.start() {
            info!(team = %self.inline.name, "Team started working");
        }
        Ok(())
    }

    fn assign_job(&self, job: BoxedJob) -> Result<(), TeamError> {
        if !self.inline.lifecycle.is_working() {
            return Err(TeamError::NotWorking(self.inline.name.clone()));
        }

        let context = job
            .process_id()
            .and_then(|process| self.contexts.get(&process))
            .map(|entry| Arc::clone(entry.value()));
        match context {
            Some(context) => context.queue.enqueue(job),
            None => run_inline(&self.inline, job),
        }
        Ok(())
    }

    /// Stop the team, waiting for passes running on context threads
    ///
    /// Context threads belong to their callers and are not joined: each
    /// leaves [`run`](ProcessContextTeam::run) on its own once it observes
    /// the stop. A pass on the calling thread itself is not waited for.
    fn stop_working(&self) {
        if !self.inline.lifecycle.stop() {
            return;
        }
        for entry in self.contexts.iter() {
            entry.value().queue.wake_all();
        }

        let own = current_context(self.id).map_or(0, |context| {
            usize::from(context.in_pass.load(Ordering::Acquire))
        });
        let mut passes = self.passes.lock();
        while *passes > own {
            self.idle.wait(&mut passes);
        }
        info!(team = %self.inline.name, "Team stopped working");
    }

    fn is_working(&self) -> bool {
        self.inline.lifecycle.is_working()
    }

    fn process_created(&self, process: ProcessId) {
        if let Some(context) = current_context(self.id) {
            context.processes.fetch_add(1, Ordering::AcqRel);
            self.contexts.insert(process, context);
            debug!(team = %self.inline.name, %process, "Process bound to context thread");
        }
    }

    fn process_completed(&self, process: ProcessId) {
        if let Some((_, context)) = self.contexts.remove(&process) {
            context.processes.fetch_sub(1, Ordering::AcqRel);
            context.queue.wake_all();
        }
    }
}
