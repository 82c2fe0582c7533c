//! Run-lock behaviour across the periodic loop and `update_data`.

use crate::helpers::{Harness, base_config, t0};
use chrono::TimeDelta;
use cpwatch::model::{JobKind, JobOutcome};
use cpwatch::scheduler::{self, JobRunReport};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn crashed_holder_lock_is_overridden_after_stale_timeout() {
    let h = Harness::new(base_config());
    let stale_secs = i64::try_from(h.watcher.config().scheduler.stale_lock_secs).unwrap();
    h.store
        .try_acquire_lock(JobKind::ContestCheck, "crashed-run", t0(), t0() - TimeDelta::hours(1))
        .unwrap();

    let early = h
        .watcher
        .run_job(JobKind::ContestCheck, t0() + TimeDelta::minutes(10), &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(early, JobRunReport::Skipped { ref holder, .. } if holder == "crashed-run"));

    let late = h
        .watcher
        .run_job(
            JobKind::ContestCheck,
            t0() + TimeDelta::seconds(2 * stale_secs),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(matches!(late, JobRunReport::Completed { took_over: true, .. }));
    assert!(h.store.current_lock(JobKind::ContestCheck).unwrap().is_none());

    let outcomes: Vec<JobOutcome> = h
        .store
        .job_runs(JobKind::ContestCheck, 10)
        .unwrap()
        .iter()
        .map(|r| r.outcome)
        .collect();
    assert_eq!(
        outcomes,
        vec![JobOutcome::Completed, JobOutcome::LockStale, JobOutcome::Skipped]
    );
}

#[tokio::test]
async fn update_data_skips_a_kind_that_is_already_running() {
    let h = Harness::new(base_config());
    h.store
        .try_acquire_lock(JobKind::ContestCheck, "periodic-loop", t0(), t0() - TimeDelta::hours(1))
        .unwrap();

    let cancel = CancellationToken::new();
    let report = h
        .watcher
        .update_data(t0() + TimeDelta::minutes(1), &cancel)
        .await
        .unwrap();
    assert!(report.practice_sync.value().is_some());
    assert!(matches!(report.contest_check, JobRunReport::Skipped { .. }));
    assert_eq!(
        h.store
            .current_lock(JobKind::ContestCheck)
            .unwrap()
            .map(|l| l.holder),
        Some("periodic-loop".to_owned())
    );

    assert!(h.store.release_lock(JobKind::ContestCheck, "periodic-loop").unwrap());
    let report = h
        .watcher
        .update_data(t0() + TimeDelta::minutes(2), &cancel)
        .await
        .unwrap();
    assert!(report.practice_sync.ran() && report.contest_check.ran());
    assert!(report.contest_check.value().is_some());
}

#[tokio::test]
async fn periodic_loop_runs_every_kind_and_stops_cleanly() {
    let h = Harness::new(base_config());
    let store = Arc::clone(&h.store);
    let handle = scheduler::spawn(Arc::new(h.watcher));

    let all_ran = async {
        loop {
            let ran = JobKind::ALL
                .iter()
                .all(|job| !store.job_runs(*job, 1).unwrap().is_empty());
            if ran {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), all_ran)
        .await
        .expect("every job kind should run once at startup");

    handle.shutdown().await;
    for job in JobKind::ALL {
        assert!(store.current_lock(job).unwrap().is_none());
        assert_eq!(
            store.job_runs(job, 1).unwrap()[0].outcome,
            JobOutcome::Completed
        );
    }
}
