//! Post-contest reports.

use crate::helpers::{Harness, base_config, cf_contest, t0};
use chrono::{DateTime, TimeDelta, Utc};
use cpwatch::JobReport;
use cpwatch::Dashboard;
use cpwatch::model::{ContestResult, JobKind, Platform, ProblemResult, ReminderKind};
use cpwatch::scheduler::PostContestReport;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn sweep(h: &Harness, at: DateTime<Utc>) -> PostContestReport {
    let report = h
        .watcher
        .run_job(JobKind::PostContest, at, &CancellationToken::new())
        .await
        .unwrap();
    match report.value() {
        Some(JobReport::PostContest(r)) => r.clone(),
        other => panic!("post-contest sweep did not complete: {other:?}"),
    }
}

fn result(old: i32, new: i32) -> ContestResult {
    ContestResult {
        rank: 120,
        solved: 4,
        penalty: Some(95),
        old_rating: Some(old),
        new_rating: Some(new),
        problems: vec![ProblemResult {
            index: "A".to_owned(),
            solved: true,
            solved_after_secs: Some(300),
            rejected_attempts: 0,
        }],
    }
}

#[tokio::test]
async fn finished_contest_is_reported_once() {
    let h = Harness::new(base_config());
    let finished = cf_contest("2300", t0() - TimeDelta::hours(4));
    let no_result = cf_contest("2301", t0() - TimeDelta::hours(5));
    let just_ended = cf_contest("2302", t0() - TimeDelta::minutes(150));
    for c in [&finished, &no_result, &just_ended] {
        h.store
            .upsert_contest(c, false, t0() - TimeDelta::days(1))
            .unwrap();
    }
    h.adapter.set_result("2300", result(1500, 1540));
    h.adapter.set_result("2302", result(1540, 1600));

    let report = sweep(&h, t0()).await;
    assert_eq!(report.reported, vec![finished.id()]);
    assert_eq!(report.pending, vec![no_result.id()]);
    assert!(report.failed.is_empty());

    let mail = h.notifier.sent();
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0].subject, "[cpwatch] Post-contest report: Codeforces Round 2300");
    assert!(mail[0].body.contains("Rating: 1500 -> 1540 (+40)"));

    assert!(h.store.has_receipt(&finished.id(), ReminderKind::PostContest).unwrap());
    assert!(h.store.contest(&finished.id()).unwrap().unwrap().stale);
    let history = h.store.rating_history(Some(Platform::Codeforces)).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].contest_id, "2300");
    assert_eq!(history[0].new_rating, 1540);

    let stored = h.store.contest_result(&finished.id()).unwrap().unwrap();
    assert_eq!(stored.result, result(1500, 1540));
    assert!(h.store.contest_result(&no_result.id()).unwrap().is_none());
    let shown = Dashboard::new(Arc::clone(&h.store)).contest_results(10).unwrap();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].contest, finished.id());

    let again = sweep(&h, t0() + TimeDelta::hours(1)).await;
    assert!(again.reported.iter().all(|id| *id != finished.id()));
    assert!(
        h.notifier
            .subjects()
            .iter()
            .filter(|s| s.ends_with("Codeforces Round 2300"))
            .count()
            == 1
    );
}

#[tokio::test]
async fn undelivered_report_is_retried() {
    let h = Harness::new(base_config());
    let finished = cf_contest("2310", t0() - TimeDelta::hours(6));
    h.store
        .upsert_contest(&finished, false, t0() - TimeDelta::days(1))
        .unwrap();
    h.adapter.set_result("2310", result(1600, 1580));
    h.notifier.set_failing(true);

    let failed = sweep(&h, t0()).await;
    assert_eq!(failed.failed.len(), 1);
    assert!(!h.store.has_receipt(&finished.id(), ReminderKind::PostContest).unwrap());
    assert!(!h.store.contest(&finished.id()).unwrap().unwrap().stale);
    // Kept even though the report did not go out.
    assert!(h.store.contest_result(&finished.id()).unwrap().is_some());

    h.notifier.set_failing(false);
    let retried = sweep(&h, t0() + TimeDelta::hours(1)).await;
    assert_eq!(retried.reported, vec![finished.id()]);
    assert!(h.notifier.sent()[0].body.contains("Rating: 1600 -> 1580 (-20)"));
}

#[tokio::test]
async fn contests_outside_the_lookback_are_ignored() {
    let h = Harness::new(base_config());
    let old = cf_contest("2320", t0() - TimeDelta::days(30));
    h.store
        .upsert_contest(&old, false, t0() - TimeDelta::days(31))
        .unwrap();
    h.adapter.set_result("2320", result(1400, 1450));

    let report = sweep(&h, t0()).await;
    assert!(report.reported.is_empty() && report.pending.is_empty());
    assert!(h.notifier.sent().is_empty());
}
