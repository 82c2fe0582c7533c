//! Practice sync feeding the analytics views.

use crate::helpers::{Harness, base_config, t0};
use chrono::{DateTime, TimeDelta, Utc};
use cpwatch::Dashboard;
use cpwatch::model::{JobKind, Platform, RatingChange, SubmissionRecord, Verdict};
use cpwatch::scheduler::PracticeSyncReport;
use cpwatch::JobReport;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn solve(problem: &str, tags: &[&str], at: DateTime<Utc>, rating: u32) -> SubmissionRecord {
    SubmissionRecord {
        platform: Platform::Codeforces,
        problem_id: problem.to_owned(),
        tags: tags.iter().map(|t| (*t).to_owned()).collect::<BTreeSet<_>>(),
        solved_at: at,
        verdict: Verdict::Accepted,
        rating: Some(rating),
    }
}

async fn sync(h: &Harness, at: DateTime<Utc>) -> PracticeSyncReport {
    let report = h
        .watcher
        .run_job(JobKind::PracticeSync, at, &CancellationToken::new())
        .await
        .unwrap();
    match report.value() {
        Some(JobReport::PracticeSync(r)) => r.clone(),
        other => panic!("practice sync did not complete: {other:?}"),
    }
}

#[tokio::test]
async fn resync_of_the_same_window_does_not_double_count() {
    let h = Harness::new(base_config());
    let first_at = t0() - TimeDelta::days(2);
    let second_at = t0() - TimeDelta::days(1);
    h.adapter.set_submissions(vec![
        solve("1900A", &["greedy", "math"], first_at, 1000),
        solve("1900B", &["dp"], second_at, 1500),
    ]);
    h.adapter.set_ratings(vec![RatingChange {
        platform: Platform::Codeforces,
        contest_id: "1900".to_owned(),
        old_rating: 1480,
        new_rating: 1530,
        at: second_at,
    }]);

    let first = sync(&h, t0()).await;
    assert_eq!(first.submissions_added[&Platform::Codeforces], 2);
    assert_eq!(first.rating_changes_added, 1);

    let second = sync(&h, t0() + TimeDelta::hours(6)).await;
    assert_eq!(second.submissions_added[&Platform::Codeforces], 0);
    assert_eq!(second.rating_changes_added, 0);
    assert_eq!(h.adapter.since_seen(), vec![None, Some(second_at)]);

    let summary = Dashboard::new(Arc::clone(&h.store))
        .practice_summary(30, t0())
        .unwrap();
    assert_eq!(summary.total_solved, 2);
    assert_eq!(summary.by_platform[&Platform::Codeforces], 2);
}

#[tokio::test]
async fn synced_history_drives_tags_and_plan() {
    let h = Harness::new(base_config());
    h.adapter.set_submissions(vec![
        solve("1A", &["greedy"], t0() - TimeDelta::days(3), 1100),
        solve("2A", &["greedy"], t0() - TimeDelta::days(2), 1200),
        solve("3B", &["dp"], t0() - TimeDelta::days(1), 1600),
    ]);
    h.adapter.set_ratings(vec![RatingChange {
        platform: Platform::Codeforces,
        contest_id: "1950".to_owned(),
        old_rating: 1400,
        new_rating: 1450,
        at: t0() - TimeDelta::days(5),
    }]);
    sync(&h, t0()).await;

    let dash = Dashboard::new(Arc::clone(&h.store));
    let tags = dash.weak_strong_tags(30, t0()).unwrap();
    assert_eq!(tags.stats["greedy"].solved_count, 2);
    assert_eq!(tags.profile.strong.first().map(String::as_str), Some("greedy"));
    assert!(!tags.profile.weak.is_empty());

    let plan = dash.training_plan(30, t0()).unwrap();
    // Recent max rating 1450: ceiling 1650, floor 1350.
    assert_eq!(plan.difficulty_range, (1350, 1650));
    assert_eq!(plan.weak_tags, tags.profile.weak);
}
