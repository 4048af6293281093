//! Integration tests for job chaining, flow instigation and escalation
//!
//! Run with: cargo test -p teamwork-engine --test flow_test

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;
use serde_json::{json, Value};

use teamwork_engine::prelude::*;
use teamwork_engine::team::ProcessContextTeam;

const WAIT: Duration = Duration::from_secs(10);

/// Build an engine, failing the test with every reported issue
fn build(builder: EngineBuilder) -> Engine {
    let mut issues = IssueCollector::new();
    let engine = builder.build(&mut issues);
    assert!(
        issues.is_empty(),
        "unexpected issues: {:?}",
        issues.messages()
    );
    let engine = engine.expect("engine should build");
    engine.open().expect("engine should open");
    engine
}

fn wait(handle: &FlowHandle) -> FlowOutcome {
    handle
        .wait_timeout(WAIT)
        .expect("flow did not complete in time")
}

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

#[test_log::test]
fn test_next_jobs_hand_over_between_teams() {
    let record = log();
    let (first, second, third) = (record.clone(), record.clone(), record.clone());

    let engine = build(
        EngineBuilder::new(EngineConfig::default())
            .with_team_config(TeamConfig::one_person("io"))
            .with_team_config(TeamConfig::leader_follower("workers", 2))
            .with_job(
                JobConfiguration::new("first", move |context| {
                    first.lock().push(format!("first@{}", context.team_name()));
                    Ok(json!(1))
                })
                .with_team("io")
                .with_next("second"),
            )
            .with_job(
                JobConfiguration::new("second", move |context| {
                    let value: u64 = context.argument_as()?;
                    let entry = format!("second@{}", context.team_name());
                    second.lock().push(entry);
                    Ok(json!(value + 1))
                })
                .with_team("workers")
                .with_next("third"),
            )
            .with_job(JobConfiguration::new("third", move |context| {
                let value: u64 = context.argument_as()?;
                third
                    .lock()
                    .push(format!("third@{}={value}", context.team_name()));
                Ok(Value::Null)
            })),
    );

    let handle = engine.invoke_process("first", Value::Null).unwrap();
    assert!(wait(&handle).is_ok());
    assert_eq!(
        *record.lock(),
        vec!["first@io", "second@workers", "third@workers=2"]
    );
}

#[test_log::test]
fn test_sequential_flow_runs_after_invoker() {
    let record = log();
    let slot: Arc<Mutex<Option<FlowHandle>>> = Arc::new(Mutex::new(None));
    let (parent, child, handles) = (record.clone(), record.clone(), slot.clone());

    let engine = build(
        EngineBuilder::new(EngineConfig::default())
            .with_team_config(TeamConfig::one_person("main"))
            .with_job(
                JobConfiguration::new("parent", move |context| {
                    let handle = context.invoke("child", json!("from parent"))?;
                    assert!(!handle.is_complete());
                    parent.lock().push("parent".to_string());
                    *handles.lock() = Some(handle);
                    Ok(Value::Null)
                })
                .with_team("main")
                .with_flow("child", "child", FlowInstigationStrategy::Sequential),
            )
            .with_job(JobConfiguration::new("child", move |context| {
                let message: String = context.argument_as()?;
                child.lock().push(format!("child: {message}"));
                Ok(Value::Null)
            })),
    );

    let process = engine.invoke_process("parent", Value::Null).unwrap();
    assert!(wait(&process).is_ok());
    assert_eq!(*record.lock(), vec!["parent", "child: from parent"]);

    let handle = slot.lock().take().unwrap();
    assert_eq!(handle.outcome().map(|outcome| outcome.is_ok()), Some(true));
}

#[test_log::test]
fn test_parallel_flows_complete_with_process() {
    let counter = Arc::new(AtomicUsize::new(0));
    let handles: Arc<Mutex<Vec<FlowHandle>>> = Arc::new(Mutex::new(Vec::new()));
    let (workers, collected) = (counter.clone(), handles.clone());

    let engine = build(
        EngineBuilder::new(EngineConfig::default())
            .with_team_config(TeamConfig::leader_follower("workers", 4))
            .with_job(
                JobConfiguration::new("fan-out", move |context| {
                    for index in 0..8 {
                        let handle = context.invoke("work", json!(index))?;
                        collected.lock().push(handle);
                    }
                    Ok(Value::Null)
                })
                .with_team("workers")
                .with_flow("work", "work", FlowInstigationStrategy::Parallel),
            )
            .with_job(
                JobConfiguration::new("work", move |_context| {
                    std::thread::sleep(Duration::from_millis(2));
                    workers.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                })
                .with_team("workers"),
            ),
    );

    let process = engine.invoke_process("fan-out", Value::Null).unwrap();
    assert!(wait(&process).is_ok());
    assert_eq!(counter.load(Ordering::SeqCst), 8);

    let handles = handles.lock();
    assert_eq!(handles.len(), 8);
    assert!(handles.iter().all(|handle| handle.is_complete()));
}

#[test_log::test]
fn test_asynchronous_flow_runs_in_own_process() {
    let processes: Arc<Mutex<Vec<ProcessId>>> = Arc::new(Mutex::new(Vec::new()));
    let slot: Arc<Mutex<Option<FlowHandle>>> = Arc::new(Mutex::new(None));
    let (parent, child, handles) = (processes.clone(), processes.clone(), slot.clone());

    let engine = build(
        EngineBuilder::new(EngineConfig::default())
            .with_team_config(TeamConfig::one_person("main"))
            .with_job(
                JobConfiguration::new("parent", move |context| {
                    parent.lock().push(context.process_id());
                    *handles.lock() = Some(context.invoke("child", Value::Null)?);
                    Ok(Value::Null)
                })
                .with_team("main")
                .with_flow("child", "child", FlowInstigationStrategy::Asynchronous),
            )
            .with_job(
                JobConfiguration::new("child", move |context| {
                    child.lock().push(context.process_id());
                    Ok(Value::Null)
                })
                .with_team("main"),
            ),
    );

    let process = engine.invoke_process("parent", Value::Null).unwrap();
    assert!(wait(&process).is_ok());

    let child_handle = slot.lock().take().unwrap();
    assert!(wait(&child_handle).is_ok());

    let processes = processes.lock();
    assert_eq!(processes.len(), 2);
    assert_ne!(processes[0], processes[1]);
}

#[test_log::test]
fn test_escalation_handler_receives_failure() {
    let record = log();
    let (handler, after) = (record.clone(), record.clone());

    let engine = build(
        EngineBuilder::new(EngineConfig::default())
            .with_job(
                JobConfiguration::new("fail", |_context| Err(anyhow!("boom"))).with_next("after"),
            )
            .with_job(JobConfiguration::new("after", move |_context| {
                after.lock().push("after".to_string());
                Ok(Value::Null)
            }))
            .with_job(JobConfiguration::new("handler", move |context| {
                let escalation = context
                    .escalation()
                    .ok_or_else(|| anyhow!("handler run without escalation"))?;
                handler
                    .lock()
                    .push(format!("{}: {}", escalation.job(), escalation.cause()));
                Ok(Value::Null)
            }))
            .with_escalation_handler("handler"),
    );

    let process = engine.invoke_process("fail", Value::Null).unwrap();
    assert!(wait(&process).is_ok());
    assert_eq!(*record.lock(), vec!["fail: boom"]);
}

#[test_log::test]
fn test_unhandled_escalation_fails_process() {
    let engine = build(
        EngineBuilder::new(EngineConfig::default())
            .with_job(JobConfiguration::new("fail", |_context| Err(anyhow!("boom")))),
    );

    let process = engine.invoke_process("fail", Value::Null).unwrap();
    let escalation = wait(&process).unwrap_err();
    assert_eq!(escalation.job(), "fail");
    assert_eq!(escalation.cause().to_string(), "boom");
    assert!(!escalation.is_abandoned());
}

#[test_log::test]
fn test_failing_escalation_handler_is_not_re_entered() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = calls.clone();

    let engine = build(
        EngineBuilder::new(EngineConfig::default())
            .with_job(JobConfiguration::new("fail", |_context| Err(anyhow!("boom"))))
            .with_job(JobConfiguration::new("handler", move |_context| {
                handler.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("handler failed too"))
            }))
            .with_escalation_handler("handler"),
    );

    let process = engine.invoke_process("fail", Value::Null).unwrap();
    let escalation = wait(&process).unwrap_err();
    assert_eq!(escalation.job(), "handler");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test_log::test]
fn test_panicking_job_escalates() {
    let engine = build(
        EngineBuilder::new(EngineConfig::default())
            .with_team_config(TeamConfig::worker_per_task("tasks"))
            .with_job(
                JobConfiguration::new("explode", |_context| -> anyhow::Result<Value> {
                    panic!("kaboom")
                })
                .with_team("tasks"),
            ),
    );

    let process = engine.invoke_process("explode", Value::Null).unwrap();
    let escalation = wait(&process).unwrap_err();
    assert_eq!(escalation.cause().to_string(), "job panicked: kaboom");
}

#[test_log::test]
fn test_failed_sequential_flow_fails_its_handle() {
    let slot: Arc<Mutex<Option<FlowHandle>>> = Arc::new(Mutex::new(None));
    let handles = slot.clone();

    let engine = build(
        EngineBuilder::new(EngineConfig::default())
            .with_job(
                JobConfiguration::new("parent", move |context| {
                    *handles.lock() = Some(context.invoke("child", Value::Null)?);
                    Ok(Value::Null)
                })
                .with_flow("child", "child", FlowInstigationStrategy::Sequential),
            )
            .with_job(JobConfiguration::new("child", |_context| Err(anyhow!("child failed")))),
    );

    let process = engine.invoke_process("parent", Value::Null).unwrap();
    assert!(wait(&process).is_err());

    let handle = slot.lock().take().unwrap();
    let escalation = handle.outcome().unwrap().unwrap_err();
    assert_eq!(escalation.job(), "child");
}

#[test_log::test]
fn test_flow_and_object_errors() {
    struct Counter;

    let record = log();
    let errors = record.clone();

    let engine = build(
        EngineBuilder::new(EngineConfig::default())
            .with_managed_object(ManagedObjectConfiguration::shared("counter", Arc::new(Counter)))
            .with_job(
                JobConfiguration::new("lookup", move |context| {
                    let mut errors = errors.lock();
                    if let Err(error) = context.invoke("missing", Value::Null) {
                        errors.push(error.to_string());
                    }
                    if let Err(error) = context.object::<String>(0) {
                        errors.push(error.to_string());
                    }
                    if let Err(error) = context.object::<Counter>(1) {
                        errors.push(error.to_string());
                    }
                    context.object::<Counter>(0)?;
                    Ok(Value::Null)
                })
                .with_managed_object("counter"),
            ),
    );

    let process = engine.invoke_process("lookup", Value::Null).unwrap();
    assert!(wait(&process).is_ok());
    assert_eq!(
        *record.lock(),
        vec![
            "job 'lookup' has no flow named 'missing'".to_string(),
            "managed object 'counter' is not a alloc::string::String".to_string(),
            "job 'lookup' has no managed object at index 1".to_string(),
        ]
    );
    assert!(engine.active_managed_objects().is_empty());
}

#[test_log::test]
fn test_managed_object_scopes() {
    struct Connection;

    fn run(scope: ManagedObjectScope) -> (usize, usize) {
        let created = Arc::new(AtomicUsize::new(0));
        let recycled = Arc::new(AtomicUsize::new(0));
        let factory = created.clone();
        let recycle = recycled.clone();

        let engine = build(
            EngineBuilder::new(EngineConfig::default())
                .with_team_config(TeamConfig::leader_follower("workers", 3))
                .with_managed_object(
                    ManagedObjectConfiguration::new("connection", move || {
                        factory.fetch_add(1, Ordering::SeqCst);
                        Ok(Arc::new(Connection))
                    })
                    .with_scope(scope)
                    .with_recycle(move |_: &Connection| {
                        recycle.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .with_job(
                    JobConfiguration::new("spawn", |context| {
                        context.invoke("use", Value::Null)?;
                        context.invoke("use", Value::Null)?;
                        Ok(Value::Null)
                    })
                    .with_team("workers")
                    .with_flow("use", "use", FlowInstigationStrategy::Parallel),
                )
                .with_job(
                    JobConfiguration::new("use", |context| {
                        context.object::<Connection>(0)?;
                        context.object::<Connection>(0)?;
                        Ok(Value::Null)
                    })
                    .with_team("workers")
                    .with_managed_object("connection"),
                ),
        );

        let process = engine.invoke_process("spawn", Value::Null).unwrap();
        assert!(wait(&process).is_ok());
        assert!(engine.active_managed_objects().is_empty());
        (
            created.load(Ordering::SeqCst),
            recycled.load(Ordering::SeqCst),
        )
    }

    assert_eq!(run(ManagedObjectScope::Process), (1, 1));
    assert_eq!(run(ManagedObjectScope::Thread), (2, 2));
}

#[test_log::test]
fn test_process_context_team_runs_on_invoking_thread() {
    let ran_on = Arc::new(Mutex::new(Vec::new()));
    let record = ran_on.clone();
    let team = Arc::new(ProcessContextTeam::new("context", Duration::from_millis(5)));

    let engine = build(
        EngineBuilder::new(EngineConfig::default())
            .with_team(team.clone())
            .with_team_config(TeamConfig::one_person("io"))
            .with_job(
                JobConfiguration::new("fetch", |_context| Ok(json!("data")))
                    .with_team("io")
                    .with_next("apply"),
            )
            .with_job(
                JobConfiguration::new("apply", move |_context| {
                    record.lock().push(std::thread::current().id());
                    Ok(Value::Null)
                })
                .with_team("context"),
            ),
    );

    let handle = team.run(|| engine.invoke_process("fetch", Value::Null).unwrap());
    assert!(handle.is_complete());
    assert!(wait(&handle).is_ok());
    assert_eq!(*ran_on.lock(), vec![std::thread::current().id()]);
    assert_eq!(team.bound_processes(), 0);
}

#[test_log::test]
fn test_close_completes_every_process() {
    let engine = build(
        EngineBuilder::new(EngineConfig::default())
            .with_team_config(TeamConfig::one_person("slow"))
            .with_job(
                JobConfiguration::new("sleep", |_context| {
                    std::thread::sleep(Duration::from_millis(50));
                    Ok(Value::Null)
                })
                .with_team("slow"),
            ),
    );

    let handles: Vec<FlowHandle> = (0..5)
        .map(|_| engine.invoke_process("sleep", Value::Null).unwrap())
        .collect();
    engine.close();

    for handle in &handles {
        assert!(handle.is_complete());
    }
    assert!(matches!(
        engine.invoke_process("sleep", Value::Null),
        Err(EngineError::NotOpen)
    ));
}

#[test_log::test]
fn test_deserialized_zero_steps_per_pass_still_runs_jobs() {
    let mut raw = serde_json::to_value(
        EngineConfig::default().with_default_team(TeamConfig::one_person("main")),
    )
    .unwrap();
    raw["max_steps_per_pass"] = json!(0);
    let config: EngineConfig = serde_json::from_value(raw).unwrap();
    assert_eq!(config.max_steps_per_pass, 0);

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let engine = build(EngineBuilder::new(config).with_job(JobConfiguration::new(
        "noop",
        move |_context| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        },
    )));

    let handle = engine.invoke_process("noop", Value::Null).unwrap();
    assert!(wait(&handle).is_ok());
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}
