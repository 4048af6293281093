//! Stress tests for administered invocations and chained asynchronous flows
//!
//! Run with: cargo test -p teamwork-engine --test stress_test --profile stress
//!
//! Iteration counts default to a quick run and can be raised with
//! `ENGINE_STRESS_ITERATIONS`. The full-size runs are ignored by default:
//!
//! cargo test -p teamwork-engine --test stress_test --profile stress -- --ignored

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::ensure;
use serde_json::{json, Value};

use teamwork_engine::prelude::*;

const DEFAULT_ITERATIONS: u64 = 100_000;

fn iterations() -> u64 {
    std::env::var("ENGINE_STRESS_ITERATIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_ITERATIONS)
}

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

/// Managed object counting duty invocations
#[derive(Default)]
struct Counter {
    pre: AtomicU64,
    post: AtomicU64,
}

/// Run `iterations` administered invocations on `team`
///
/// Each invocation of `work` is bracketed by a pre duty and a post duty
/// incrementing the shared counter; the body checks the pre duty has run and
/// the post duty has not. The follow-on `loop` job starts the next
/// invocation as a new process once the post duty is done.
fn administration_stress(team: TeamConfig, iterations: u64) {
    let counter = Arc::new(Counter::default());
    let bodies = Arc::new(AtomicU64::new(0));
    let team_name = team.name.clone();
    let executed = bodies.clone();
    let shared = ManagedObjectConfiguration::shared("counter", counter.clone());

    let engine = build(
        EngineBuilder::new(EngineConfig::default())
            .with_team_config(team)
            .with_managed_object(shared)
            .with_extension::<Counter, Arc<Counter>, _>(|counter| Arc::clone(counter))
            .with_administration(
                AdministrationConfiguration::<Arc<Counter>>::new("pre")
                    .with_duty(|context| {
                        for counter in context.extensions() {
                            counter.pre.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(())
                    })
                    .administer("counter"),
            )
            .with_administration(
                AdministrationConfiguration::<Arc<Counter>>::new("post")
                    .with_duty(|context| {
                        for counter in context.extensions() {
                            counter.post.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(())
                    })
                    .administer("counter"),
            )
            .with_job(
                JobConfiguration::new("work", move |context| {
                    let counter = context.object::<Counter>(0)?;
                    let pre = counter.pre.load(Ordering::SeqCst);
                    let post = counter.post.load(Ordering::SeqCst);
                    ensure!(
                        pre == post + 1,
                        "pre duty {pre} not one ahead of post duty {post}"
                    );
                    executed.fetch_add(1, Ordering::SeqCst);
                    Ok(context.take_argument())
                })
                .with_team(team_name.clone())
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
                .with_team(team_name)
                .with_flow("again", "work", FlowInstigationStrategy::Asynchronous),
            ),
    );

    let started = Instant::now();
    let handle = engine.invoke_process("work", json!(iterations)).unwrap();
    assert!(handle.wait().is_ok());

    let deadline = Instant::now() + Duration::from_secs(600);
    while bodies.load(Ordering::SeqCst) < iterations
        || !engine.active_managed_objects().is_empty()
    {
        assert!(
            Instant::now() < deadline,
            "stalled after {} of {iterations} invocations",
            bodies.load(Ordering::SeqCst)
        );
        std::thread::sleep(Duration::from_millis(1));
    }

    tracing::info!(
        iterations,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Administration stress completed"
    );
    assert_eq!(bodies.load(Ordering::SeqCst), iterations);
    assert_eq!(counter.pre.load(Ordering::SeqCst), iterations);
    assert_eq!(counter.post.load(Ordering::SeqCst), iterations);
}

/// Chain `iterations` asynchronous invocations on the passive default team
///
/// Every invocation checks it received exactly the value its predecessor
/// passed on.
fn asynchronous_flow_stress(iterations: u64) {
    let counter = Arc::new(AtomicU64::new(0));
    let observed = counter.clone();

    let engine = build(
        EngineBuilder::new(EngineConfig::default()).with_job(
            JobConfiguration::new("count", move |context| {
                let expected: u64 = context.argument_as()?;
                let actual = observed.fetch_add(1, Ordering::SeqCst);
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
        ),
    );

    let started = Instant::now();
    let handle = engine.invoke_process("count", json!(0)).unwrap();
    assert!(handle.wait().is_ok());

    tracing::info!(
        iterations,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Asynchronous flow stress completed"
    );
    assert_eq!(counter.load(Ordering::SeqCst), iterations);
    assert!(engine.active_managed_objects().is_empty());
}

#[test_log::test]
fn test_administration_one_person() {
    administration_stress(TeamConfig::one_person("single"), iterations());
}

#[test_log::test]
fn test_administration_leader_follower() {
    administration_stress(TeamConfig::leader_follower("workers", 4), iterations());
}

#[test_log::test]
fn test_asynchronous_flow() {
    asynchronous_flow_stress(iterations());
}

#[test_log::test]
#[ignore = "million-iteration run, use --ignored with the stress profile"]
fn test_administration_million_one_person() {
    administration_stress(TeamConfig::one_person("single"), 1_000_000);
}

#[test_log::test]
#[ignore = "million-iteration run, use --ignored with the stress profile"]
fn test_administration_million_leader_follower() {
    administration_stress(TeamConfig::leader_follower("workers", 4), 1_000_000);
}

#[test_log::test]
#[ignore = "five-million-iteration run, use --ignored with the stress profile"]
fn test_asynchronous_flow_five_million() {
    asynchronous_flow_stress(5_000_000);
}
