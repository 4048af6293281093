// Stress scenarios
//
// Each scenario builds an engine, drives it for the requested number of
// iterations and reports throughput. A scenario fails fast on the first
// escalation and reports a stall if no progress is made for STALL_TIMEOUT.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::ensure;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use teamwork_engine::administration::{
    AdministrationConfiguration, Governance, GovernanceConfiguration, IssueCollector,
};
use teamwork_engine::managed::ManagedObjectConfiguration;
use teamwork_engine::{
    Engine, EngineBuilder, EngineConfig, EngineError, FlowInstigationStrategy, JobConfiguration,
    TeamConfig,
};

const STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Scenario errors
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("invalid engine configuration: {}", .0.join("; "))]
    Configuration(Vec<String>),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("scenario stalled after {completed} of {expected} iterations")]
    Stalled { completed: u64, expected: u64 },

    #[error("scenario failed: {0}")]
    Failed(String),
}

/// Result of a scenario run
#[derive(Debug, Serialize)]
pub struct Report {
    pub scenario: String,
    pub team: String,
    pub iterations: u64,
    pub elapsed_ms: u64,
    pub per_second: f64,
    pub details: BTreeMap<String, u64>,
}

impl Report {
    fn new(scenario: &str, team: &TeamConfig, iterations: u64, elapsed: Duration) -> Self {
        let seconds = elapsed.as_secs_f64().max(f64::EPSILON);
        Self {
            scenario: scenario.to_string(),
            team: team.kind.to_string(),
            iterations,
            elapsed_ms: elapsed.as_millis() as u64,
            per_second: iterations as f64 / seconds,
            details: BTreeMap::new(),
        }
    }

    fn with_detail(mut self, label: &str, value: u64) -> Self {
        self.details.insert(label.to_string(), value);
        self
    }
}

/// First failure reported by an escalation handler
#[derive(Debug, Default)]
struct FailureSlot(Mutex<Option<String>>);

impl FailureSlot {
    fn record(&self, failure: String) {
        self.0.lock().get_or_insert(failure);
    }

    fn take(&self) -> Option<String> {
        self.0.lock().take()
    }
}

fn build(builder: EngineBuilder) -> Result<Engine, ScenarioError> {
    let mut issues = IssueCollector::new();
    let engine = builder.build(&mut issues);
    let engine = engine.ok_or_else(|| {
        ScenarioError::Configuration(issues.messages().into_iter().map(String::from).collect())
    })?;
    engine.open()?;
    Ok(engine)
}

/// Escalation handler job recording the first failure
fn failure_handler(failures: Arc<FailureSlot>) -> JobConfiguration {
    JobConfiguration::new("escalation", move |context| {
        if let Some(escalation) = context.escalation() {
            failures.record(escalation.to_string());
        }
        Ok(Value::Null)
    })
}

/// Wait until `progress` reaches `expected`, failing on escalation or stall
fn await_progress(
    progress: &AtomicU64,
    expected: u64,
    failures: &FailureSlot,
) -> Result<(), ScenarioError> {
    let mut last = progress.load(Ordering::Acquire);
    let mut last_change = Instant::now();
    loop {
        if let Some(failure) = failures.take() {
            return Err(ScenarioError::Failed(failure));
        }

        let completed = progress.load(Ordering::Acquire);
        if completed >= expected {
            return Ok(());
        }
        if completed != last {
            last = completed;
            last_change = Instant::now();
        } else if last_change.elapsed() > STALL_TIMEOUT {
            return Err(ScenarioError::Stalled {
                completed,
                expected,
            });
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[derive(Default)]
struct Counter {
    pre: AtomicU64,
    post: AtomicU64,
}

/// Administered invocations, chained asynchronously after each post duty
pub fn administration(
    config: EngineConfig,
    team: TeamConfig,
    iterations: u64,
) -> Result<Report, ScenarioError> {
    let counter = Arc::new(Counter::default());
    let bodies = Arc::new(AtomicU64::new(0));
    let failures = Arc::new(FailureSlot::default());
    let executed = bodies.clone();
    let shared = ManagedObjectConfiguration::shared("counter", counter.clone());

    let engine = build(
        EngineBuilder::new(config)
            .with_team_config(team.clone())
            .with_managed_object(shared)
            .with_extension::<Counter, Arc<Counter>, _>(|counter| Arc::clone(counter))
            .with_administration(
                AdministrationConfiguration::<Arc<Counter>>::new("pre")
                    .with_duty(|context| {
                        for counter in context.extensions() {
                            counter.pre.fetch_add(1, Ordering::AcqRel);
                        }
                        Ok(())
                    })
                    .administer("counter"),
            )
            .with_administration(
                AdministrationConfiguration::<Arc<Counter>>::new("post")
                    .with_duty(|context| {
                        for counter in context.extensions() {
                            counter.post.fetch_add(1, Ordering::AcqRel);
                        }
                        Ok(())
                    })
                    .administer("counter"),
            )
            .with_job(
                JobConfiguration::new("work", move |context| {
                    let counter = context.object::<Counter>(0)?;
                    let pre = counter.pre.load(Ordering::Acquire);
                    let post = counter.post.load(Ordering::Acquire);
                    ensure!(
                        pre == post + 1,
                        "pre duty {pre} not one ahead of post duty {post}"
                    );
                    executed.fetch_add(1, Ordering::AcqRel);
                    Ok(context.take_argument())
                })
                .with_team(team.name.clone())
                .with_managed_object("counter")
                .with_pre_administration("pre")
                .with_post_administration("post")
                .with_next("loop"),
            )
            .with_job(
                JobConfiguration::new("loop", |context| {
                    let remaining: u64 = context.argument_as()?;
                    if remaining > 1 {
                        context.invoke("again", json!(remaining - 1))?;
                    }
                    Ok(Value::Null)
                })
                .with_team(team.name.clone())
                .with_flow("again", "work", FlowInstigationStrategy::Asynchronous),
            )
            .with_job(failure_handler(failures.clone()))
            .with_escalation_handler("escalation"),
    )?;

    let started = Instant::now();
    engine.invoke_process("work", json!(iterations))?;
    await_progress(&bodies, iterations, &failures)?;
    let elapsed = started.elapsed();
    engine.close();

    info!(
        iterations,
        elapsed_ms = elapsed.as_millis() as u64,
        "Administration scenario completed"
    );
    Ok(Report::new("administration", &team, iterations, elapsed)
        .with_detail("pre_duties", counter.pre.load(Ordering::Acquire))
        .with_detail("post_duties", counter.post.load(Ordering::Acquire)))
}

trait Transaction: Send + Sync {
    fn begin(&self);
    fn commit(&self);
    fn rollback(&self);
}

#[derive(Default)]
struct CountingConnection {
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl Transaction for CountingConnection {
    fn begin(&self) {
        self.begins.fetch_add(1, Ordering::AcqRel);
    }

    fn commit(&self) {
        self.commits.fetch_add(1, Ordering::AcqRel);
    }

    fn rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Default)]
struct TransactionGovernance {
    transactions: Vec<Arc<dyn Transaction>>,
}

impl Governance<Arc<dyn Transaction>> for TransactionGovernance {
    fn govern_managed_object(&mut self, transaction: Arc<dyn Transaction>) -> anyhow::Result<()> {
        transaction.begin();
        self.transactions.push(transaction);
        Ok(())
    }

    fn enforce_governance(&mut self) -> anyhow::Result<()> {
        for transaction in self.transactions.drain(..) {
            transaction.commit();
        }
        Ok(())
    }

    fn disregard_governance(&mut self) -> anyhow::Result<()> {
        for transaction in self.transactions.drain(..) {
            transaction.rollback();
        }
        Ok(())
    }
}

/// Commit, rollback and tidy-up governance cycles, `iterations` of each
pub fn governance(
    config: EngineConfig,
    team: TeamConfig,
    iterations: u64,
) -> Result<Report, ScenarioError> {
    let connection = Arc::new(CountingConnection::default());
    let shared = ManagedObjectConfiguration::shared("connection", connection.clone());
    type TransactionAdministration = AdministrationConfiguration<Arc<dyn Transaction>>;

    let job = |name: &str, fail: bool| {
        JobConfiguration::new(name, move |_context| {
            ensure!(!fail, "rollback requested");
            Ok(Value::Null)
        })
        .with_team(team.name.clone())
        .with_managed_object("connection")
        .with_pre_administration("begin")
    };

    let engine = build(
        EngineBuilder::new(config)
            .with_team_config(team.clone())
            .with_managed_object(shared)
            .with_extension::<CountingConnection, Arc<dyn Transaction>, _>(|connection| {
                Arc::clone(connection) as Arc<dyn Transaction>
            })
            .with_governance(
                GovernanceConfiguration::new::<Arc<dyn Transaction>, _, _>(
                    "transaction",
                    TransactionGovernance::default,
                )
                .govern("connection"),
            )
            .with_administration(
                TransactionAdministration::new("begin")
                    .with_duty(|context| context.governance(0)?.activate())
                    .link_governance("transaction"),
            )
            .with_administration(
                TransactionAdministration::new("commit")
                    .with_duty(|context| context.governance(0)?.enforce())
                    .link_governance("transaction"),
            )
            .with_job(job("commit", false).with_post_administration("commit"))
            .with_job(job("rollback", true).with_post_administration("commit"))
            .with_job(job("tidy_up", false)),
    )?;

    let started = Instant::now();
    for _ in 0..iterations {
        for (name, succeeds) in [("commit", true), ("rollback", false), ("tidy_up", true)] {
            let outcome = engine.invoke_process(name, Value::Null)?.wait();
            if outcome.is_ok() != succeeds {
                return Err(ScenarioError::Failed(format!(
                    "job '{name}' finished with unexpected outcome {outcome:?}"
                )));
            }
        }
    }
    let elapsed = started.elapsed();

    let active = engine.active_managed_objects().len();
    if active > 0 {
        return Err(ScenarioError::Failed(format!(
            "{active} managed objects still active after all cycles"
        )));
    }
    engine.close();

    info!(
        iterations,
        elapsed_ms = elapsed.as_millis() as u64,
        "Governance scenario completed"
    );
    Ok(Report::new("governance", &team, iterations, elapsed)
        .with_detail("begins", connection.begins.load(Ordering::Acquire))
        .with_detail("commits", connection.commits.load(Ordering::Acquire))
        .with_detail("rollbacks", connection.rollbacks.load(Ordering::Acquire)))
}

/// Chained asynchronous invocations, each checking its predecessor's value
pub fn asynchronous_flow(config: EngineConfig, iterations: u64) -> Result<Report, ScenarioError> {
    let team = config.default_team.clone();
    let counter = Arc::new(AtomicU64::new(0));
    let failures = Arc::new(FailureSlot::default());
    let observed = counter.clone();

    let engine = build(
        EngineBuilder::new(config)
            .with_job(
                JobConfiguration::new("count", move |context| {
                    let expected: u64 = context.argument_as()?;
                    let actual = observed.fetch_add(1, Ordering::AcqRel);
                    ensure!(
                        actual == expected,
                        "expected {expected}, counter was {actual}"
                    );
                    if expected + 1 < iterations {
                        context.invoke("again", json!(expected + 1))?;
                    }
                    Ok(Value::Null)
                })
                .with_flow("again", "count", FlowInstigationStrategy::Asynchronous),
            )
            .with_job(failure_handler(failures.clone()))
            .with_escalation_handler("escalation"),
    )?;

    let started = Instant::now();
    engine.invoke_process("count", json!(0))?;
    await_progress(&counter, iterations, &failures)?;
    let elapsed = started.elapsed();
    engine.close();

    info!(
        iterations,
        elapsed_ms = elapsed.as_millis() as u64,
        "Asynchronous flow scenario completed"
    );
    Ok(Report::new("asynchronous_flow", &team, iterations, elapsed)
        .with_detail("invocations", counter.load(Ordering::Acquire)))
}
