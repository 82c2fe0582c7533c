//! Contest-check cycles: reminders, rescheduling, upstream outages and
//! restarts.

use crate::helpers::{Harness, RECIPIENT, base_config, cf_contest, t0};
use chrono::TimeDelta;
use cpwatch::model::{JobKind, ReminderKind};
use cpwatch::scheduler::{ContestCheckReport, JobRunReport};
use cpwatch::{JobReport, StateStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn check(h: &Harness, at: chrono::DateTime<chrono::Utc>) -> ContestCheckReport {
    let report = h
        .watcher
        .run_job(JobKind::ContestCheck, at, &CancellationToken::new())
        .await
        .unwrap();
    match report {
        JobRunReport::Completed {
            value: JobReport::ContestCheck(r),
            ..
        } => r,
        other => panic!("contest check did not complete: {other:?}"),
    }
}

#[tokio::test]
async fn contest_23h_out_gets_new_and_day_before_exactly_once() {
    let h = Harness::new(base_config());
    let contest = cf_contest("2100", t0() + TimeDelta::hours(23));
    h.adapter.set_contests(vec![contest.clone()]);

    let first = check(&h, t0()).await;
    assert_eq!(
        first.delivery.sent,
        vec![
            (contest.id(), ReminderKind::New),
            (contest.id(), ReminderKind::DayBefore)
        ]
    );
    assert_eq!(
        h.notifier.subjects(),
        vec![
            "[cpwatch] New contest: Codeforces Round 2100".to_owned(),
            "[cpwatch] Contest in 23 hours: Codeforces Round 2100".to_owned(),
        ]
    );
    assert!(h.notifier.sent().iter().all(|m| m.recipient == RECIPIENT));

    let second = check(&h, t0() + TimeDelta::minutes(1)).await;
    assert!(second.delivery.sent.is_empty());
    assert_eq!(h.notifier.subjects().len(), 2);
    assert_eq!(
        h.store.receipt_kinds(&contest.id()).unwrap(),
        BTreeSet::from([ReminderKind::New, ReminderKind::DayBefore])
    );
}

#[tokio::test]
async fn countdown_walks_through_every_threshold() {
    let h = Harness::new(base_config());
    let start = t0() + TimeDelta::days(3);
    let contest = cf_contest("2101", start);
    h.adapter.set_contests(vec![contest.clone()]);

    let mut sent = Vec::new();
    for at in [
        t0(),
        start - TimeDelta::hours(20),
        start - TimeDelta::minutes(50),
        start - TimeDelta::minutes(10),
        start + TimeDelta::minutes(1),
    ] {
        let report = check(&h, at).await;
        sent.extend(report.delivery.sent.into_iter().map(|(_, kind)| kind));
    }
    assert_eq!(
        sent,
        vec![
            ReminderKind::New,
            ReminderKind::DayBefore,
            ReminderKind::HourBefore,
            ReminderKind::QuarterHourBefore
        ]
    );
}

#[tokio::test]
async fn reschedule_rearms_countdown_but_not_new() {
    let h = Harness::new(base_config());
    let contest = cf_contest("2102", t0() + TimeDelta::minutes(30));
    h.adapter.set_contests(vec![contest.clone()]);
    let first = check(&h, t0()).await;
    let kinds: Vec<ReminderKind> = first.delivery.sent.iter().map(|(_, k)| *k).collect();
    assert_eq!(
        kinds,
        vec![ReminderKind::New, ReminderKind::DayBefore, ReminderKind::HourBefore]
    );
    let subjects = h.notifier.subjects();
    assert_eq!(
        &subjects[1..],
        [
            "[cpwatch] Contest in 30 minutes: Codeforces Round 2102",
            "[cpwatch] Contest in 30 minutes: Codeforces Round 2102",
        ]
    );

    let moved_start = t0() + TimeDelta::days(3);
    let mut moved = contest.clone();
    moved.start_time = moved_start;
    h.adapter.set_contests(vec![moved.clone()]);

    let after_move = check(&h, t0() + TimeDelta::minutes(1)).await;
    assert!(after_move.reconciled[&contest.platform].updated.contains(&contest.id()));
    assert!(after_move.delivery.sent.is_empty());
    assert_eq!(
        h.store.receipt_kinds(&contest.id()).unwrap(),
        BTreeSet::from([ReminderKind::New])
    );

    let day_before = check(&h, moved_start - TimeDelta::hours(23)).await;
    assert_eq!(
        day_before.delivery.sent,
        vec![(contest.id(), ReminderKind::DayBefore)]
    );
}

#[tokio::test]
async fn reminder_times_use_the_configured_zone() {
    let mut config = base_config();
    config.timezone = "Asia/Kolkata".to_owned();
    let h = Harness::new(config);
    let contest = cf_contest("2104", t0() + TimeDelta::days(4));
    h.adapter.set_contests(vec![contest]);

    check(&h, t0()).await;
    let mail = h.notifier.sent();
    assert_eq!(mail.len(), 1);
    // 2026-05-08 12:00 UTC
    assert!(mail[0].body.contains("Start: 2026-05-08 17:30 IST"));
}

#[tokio::test]
async fn failed_delivery_writes_no_receipt_and_retries() {
    let h = Harness::new(base_config());
    let contest = cf_contest("2103", t0() + TimeDelta::days(5));
    h.adapter.set_contests(vec![contest.clone()]);
    h.notifier.set_failing(true);

    let failed = check(&h, t0()).await;
    assert!(failed.delivery.sent.is_empty());
    assert_eq!(failed.delivery.failed.len(), 1);
    assert!(h.store.receipt_kinds(&contest.id()).unwrap().is_empty());

    h.notifier.set_failing(false);
    let retried = check(&h, t0() + TimeDelta::minutes(30)).await;
    assert_eq!(retried.delivery.sent, vec![(contest.id(), ReminderKind::New)]);
}

#[tokio::test]
async fn unavailable_platform_keeps_stored_contests() {
    let h = Harness::new(base_config());
    let running = cf_contest("2104", t0() - TimeDelta::minutes(30));
    let upcoming = cf_contest("2105", t0() + TimeDelta::minutes(40));
    h.adapter.set_contests(vec![running.clone(), upcoming.clone()]);
    check(&h, t0() - TimeDelta::hours(1)).await;
    h.notifier.clear();

    h.adapter.set_contests_down(true);
    let report = check(&h, t0()).await;
    assert_eq!(report.unavailable.len(), 1);
    assert!(report.unavailable[0].reason.contains("503"));
    assert!(report.reconciled.is_empty());

    // Nothing was marked stale and the stored contest still gets its reminder.
    assert!(!h.store.contest(&running.id()).unwrap().unwrap().stale);
    assert_eq!(
        report.delivery.sent,
        vec![(upcoming.id(), ReminderKind::HourBefore)]
    );
}

#[tokio::test]
async fn started_contest_missing_from_fetch_goes_stale() {
    let h = Harness::new(base_config());
    let started = cf_contest("2106", t0() - TimeDelta::minutes(10));
    let future = cf_contest("2107", t0() + TimeDelta::days(2));
    h.adapter.set_contests(vec![started.clone(), future.clone()]);
    check(&h, t0() - TimeDelta::hours(2)).await;

    h.adapter.set_contests(vec![future.clone()]);
    let report = check(&h, t0()).await;
    assert!(report.reconciled[&started.platform].stale.contains(&started.id()));
    assert!(h.store.contest(&started.id()).unwrap().unwrap().stale);
    assert!(!h.store.contest(&future.id()).unwrap().unwrap().stale);
}

#[tokio::test]
async fn restart_on_same_database_sends_nothing_twice() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cpwatch.db");
    let contest = cf_contest("2108", t0() + TimeDelta::hours(10));

    {
        let h = Harness::on_store(base_config(), Arc::new(StateStore::open(&path).unwrap()));
        h.adapter.set_contests(vec![contest.clone()]);
        let report = check(&h, t0()).await;
        assert_eq!(report.delivery.sent.len(), 2);
    }

    let h = Harness::on_store(base_config(), Arc::new(StateStore::open(&path).unwrap()));
    h.adapter.set_contests(vec![contest.clone()]);
    let report = check(&h, t0() + TimeDelta::minutes(5)).await;
    assert!(report.reconciled[&contest.platform].new.is_empty());
    assert!(report.delivery.sent.is_empty());
    assert!(h.notifier.subjects().is_empty());
}

#[tokio::test]
async fn no_recipient_holds_reminders_back() {
    let mut config = base_config();
    config.smtp.notification_email.clear();
    let h = Harness::new(config);
    let contest = cf_contest("2109", t0() + TimeDelta::days(4));
    h.adapter.set_contests(vec![contest.clone()]);

    let report = check(&h, t0()).await;
    assert_eq!(report.delivery.undelivered, 1);
    assert!(h.notifier.subjects().is_empty());
    assert!(h.store.receipt_kinds(&contest.id()).unwrap().is_empty());
}
