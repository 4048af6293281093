//! Team throughput benchmark
//!
//! Benchmarks the dispatch path: assign → dequeue → execute pass,
//! per team kind, and a full engine invocation on top of it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};

use teamwork_engine::job::{job_fn, JobOutcome};
use teamwork_engine::prelude::*;

fn wait_for(counter: &AtomicU64, expected: u64) {
    while counter.load(Ordering::Acquire) < expected {
        std::hint::spin_loop();
    }
}

/// Benchmark plain jobs through each team kind
fn bench_team_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("team_dispatch");
    group.throughput(Throughput::Elements(1));
    group.measurement_time(Duration::from_secs(5));

    let configs = [
        TeamConfig::one_person("one_person"),
        TeamConfig::leader_follower("leader_follower", 4),
        TeamConfig::worker_per_task("worker_per_task"),
        TeamConfig::passive("passive"),
    ];

    for config in configs {
        group.bench_with_input(
            BenchmarkId::new("kind", config.kind.to_string()),
            &config,
            |b, config| {
                b.iter_custom(|iters| {
                    let team = config.build().unwrap();
                    team.start_working().unwrap();
                    let executed = Arc::new(AtomicU64::new(0));

                    let start = Instant::now();
                    for _ in 0..iters {
                        let executed = executed.clone();
                        team.assign_job(job_fn(move |_context| {
                            executed.fetch_add(1, Ordering::Release);
                            JobOutcome::Complete
                        }))
                        .unwrap();
                    }
                    wait_for(&executed, iters);
                    let elapsed = start.elapsed();

                    team.stop_working();
                    elapsed
                });
            },
        );
    }

    group.finish();
}

/// Benchmark chained asynchronous invocations on the passive default team
fn bench_engine_invocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_invocation");
    group.throughput(Throughput::Elements(1));

    group.bench_function("asynchronous_chain", |b| {
        b.iter_custom(|iters| {
            let mut issues = IssueCollector::new();
            let engine = EngineBuilder::new(EngineConfig::default())
                .with_job(
                    JobConfiguration::new("count", move |context| {
                        let remaining: u64 = context.argument_as()?;
                        if remaining > 1 {
                            context.invoke("again", json!(remaining - 1))?;
                        }
                        Ok(Value::Null)
                    })
                    .with_flow("again", "count", FlowInstigationStrategy::Asynchronous),
                )
                .build(&mut issues)
                .unwrap();
            engine.open().unwrap();

            let start = Instant::now();
            engine
                .invoke_process("count", json!(iters.max(1)))
                .unwrap()
                .wait()
                .unwrap();
            start.elapsed()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_team_dispatch, bench_engine_invocation);
criterion_main!(benches);
