//! Integration tests running plain jobs on every team kind
//!
//! Run with: cargo test -p teamwork-engine --test team_test

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use teamwork_engine::job::{job_fn, JobOutcome};
use teamwork_engine::team::{TeamConfig, TeamError};

const JOBS: usize = 500;
const PASSES: usize = 3;

fn configs() -> Vec<TeamConfig> {
    vec![
        TeamConfig::one_person("one-person"),
        TeamConfig::leader_follower("leader-follower", 4),
        TeamConfig::worker_per_task("worker-per-task"),
        TeamConfig::passive("passive"),
        TeamConfig::process_context("process-context"),
    ]
}

fn wait_for(counter: &AtomicUsize, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while counter.load(Ordering::SeqCst) < expected {
        assert!(
            Instant::now() < deadline,
            "only {} of {expected} passes ran",
            counter.load(Ordering::SeqCst)
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test_log::test]
fn test_every_pass_runs_exactly_once() {
    for config in configs() {
        let team = config.build().unwrap();
        team.start_working().unwrap();

        let passes = Arc::new(AtomicUsize::new(0));
        for _ in 0..JOBS {
            let passes = passes.clone();
            let mut remaining = PASSES;
            team.assign_job(job_fn(move |_context| {
                passes.fetch_add(1, Ordering::SeqCst);
                remaining -= 1;
                JobOutcome::from(remaining == 0)
            }))
            .unwrap();
        }

        wait_for(&passes, JOBS * PASSES);
        team.stop_working();
        assert_eq!(
            passes.load(Ordering::SeqCst),
            JOBS * PASSES,
            "team '{}' ran extra passes",
            team.name()
        );
    }
}

#[test_log::test]
fn test_team_name_is_visible_to_jobs() {
    for config in configs() {
        let team = config.build().unwrap();
        team.start_working().unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(None));
        let slot = seen.clone();
        team.assign_job(job_fn(move |context| {
            *slot.lock() = Some(context.team_name().to_string());
            JobOutcome::Complete
        }))
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while seen.lock().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        team.stop_working();
        assert_eq!(seen.lock().as_deref(), Some(team.name()));
    }
}

#[test_log::test]
fn test_stopped_inline_teams_refuse_work() {
    for config in [
        TeamConfig::passive("passive"),
        TeamConfig::process_context("context"),
    ] {
        let team = config.build().unwrap();
        let refused = team.assign_job(job_fn(|_context| JobOutcome::Complete));
        assert!(matches!(refused, Err(TeamError::NotWorking(name)) if name == team.name()));
    }
}
