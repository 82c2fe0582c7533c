//! Scheduled and manual registration through the service facade.

use crate::helpers::{Harness, base_config, cf_contest, registering_config, t0};
use chrono::{DateTime, TimeDelta, Utc};
use cpwatch::adapters::RegistrationOutcome;
use cpwatch::model::{AttemptOrigin, AttemptStatus, FailureKind, JobKind, Platform};
use cpwatch::WatchError;
use tokio_util::sync::CancellationToken;

async fn check(h: &Harness, at: DateTime<Utc>) {
    let report = h
        .watcher
        .run_job(JobKind::ContestCheck, at, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.value().is_some(), "contest check did not complete: {report:?}");
}

fn registration_subjects(h: &Harness) -> Vec<String> {
    h.notifier
        .subjects()
        .into_iter()
        .filter(|s| s.contains("Registration"))
        .collect()
}

#[tokio::test]
async fn transient_failures_stop_at_the_retry_budget() {
    let h = Harness::new(registering_config());
    let contest = cf_contest("2200", t0() + TimeDelta::days(2));
    h.adapter.set_contests(vec![contest.clone()]);
    for _ in 0..5 {
        h.automation
            .push(RegistrationOutcome::TransientError("page timeout".to_owned()));
    }

    for i in 0..5 {
        check(&h, t0() + TimeDelta::minutes(30 * i)).await;
    }

    assert_eq!(h.automation.calls(), 3);
    let attempts = h.store.attempts(&contest.id()).unwrap();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| a.status == AttemptStatus::Failed
        && a.failure == Some(FailureKind::Transient)
        && a.origin == AttemptOrigin::Scheduled));
    assert!(registration_subjects(&h).is_empty());
}

#[tokio::test]
async fn success_after_transient_is_never_retried() {
    let h = Harness::new(registering_config());
    let contest = cf_contest("2201", t0() + TimeDelta::days(2));
    h.adapter.set_contests(vec![contest.clone()]);
    h.automation
        .push(RegistrationOutcome::TransientError("rate limited".to_owned()));

    check(&h, t0()).await;
    check(&h, t0() + TimeDelta::minutes(30)).await;
    check(&h, t0() + TimeDelta::minutes(60)).await;

    assert_eq!(h.automation.calls(), 2);
    let statuses: Vec<AttemptStatus> = h
        .store
        .attempts(&contest.id())
        .unwrap()
        .iter()
        .map(|a| a.status)
        .collect();
    assert_eq!(statuses, vec![AttemptStatus::Failed, AttemptStatus::Succeeded]);
    assert_eq!(
        registration_subjects(&h),
        vec!["[cpwatch] Registration success: Codeforces Round 2201".to_owned()]
    );
}

#[tokio::test]
async fn already_registered_is_a_success_and_never_retried() {
    let h = Harness::new(registering_config());
    let contest = cf_contest("2206", t0() + TimeDelta::days(2));
    h.adapter.set_contests(vec![contest.clone()]);
    h.automation.push(RegistrationOutcome::AlreadyRegistered);

    check(&h, t0()).await;
    check(&h, t0() + TimeDelta::minutes(30)).await;

    assert_eq!(h.automation.calls(), 1);
    let attempts = h.store.attempts(&contest.id()).unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Succeeded);
    assert_eq!(attempts[0].error_reason.as_deref(), Some("already registered"));
    assert_eq!(
        registration_subjects(&h),
        vec!["[cpwatch] Registration success: Codeforces Round 2206".to_owned()]
    );
}

#[tokio::test]
async fn credential_error_blocks_schedule_until_manual_register() {
    let h = Harness::new(registering_config());
    let contest = cf_contest("2202", t0() + TimeDelta::days(2));
    h.adapter.set_contests(vec![contest.clone()]);
    h.automation
        .push(RegistrationOutcome::CredentialError("wrong password".to_owned()));

    check(&h, t0()).await;
    check(&h, t0() + TimeDelta::minutes(30)).await;
    assert_eq!(h.automation.calls(), 1);
    assert_eq!(
        registration_subjects(&h),
        vec!["[cpwatch] Registration failed: Codeforces Round 2202".to_owned()]
    );

    let manual = h
        .watcher
        .register(Platform::Codeforces, "2202", t0() + TimeDelta::hours(1))
        .await
        .unwrap();
    assert_eq!(manual.status, AttemptStatus::Succeeded);
    assert_eq!(manual.origin, AttemptOrigin::Manual);
    assert_eq!(h.automation.calls(), 2);

    // Registering again returns the recorded success without a new call.
    let again = h
        .watcher
        .register(Platform::Codeforces, "2202", t0() + TimeDelta::hours(2))
        .await
        .unwrap();
    assert_eq!(again.id, manual.id);
    assert_eq!(h.automation.calls(), 2);
}

#[tokio::test]
async fn missing_credentials_record_one_skip() {
    let mut config = base_config();
    config.registration.auto_register_platforms = vec![Platform::Codeforces];
    let h = Harness::new(config);
    let contest = cf_contest("2203", t0() + TimeDelta::days(2));
    h.adapter.set_contests(vec![contest.clone()]);

    check(&h, t0()).await;
    check(&h, t0() + TimeDelta::minutes(30)).await;

    assert_eq!(h.automation.calls(), 0);
    let attempts = h.store.attempts(&contest.id()).unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Skipped);
}

#[tokio::test]
async fn closed_registration_and_opt_out_are_left_alone() {
    let h = Harness::new(registering_config());
    let mut closed = cf_contest("2204", t0() + TimeDelta::days(2));
    closed.registration_open = false;
    h.adapter.set_contests(vec![closed.clone()]);
    check(&h, t0()).await;
    assert_eq!(h.automation.calls(), 0);

    let open = cf_contest("2205", t0() + TimeDelta::days(3));
    h.adapter.set_contests(vec![closed.clone(), open.clone()]);
    h.store.upsert_contest(&open, false, t0()).unwrap();
    h.store.set_auto_register(&open.id(), false).unwrap();
    check(&h, t0() + TimeDelta::minutes(30)).await;
    assert_eq!(h.automation.calls(), 0);
    assert!(h.store.attempts(&open.id()).unwrap().is_empty());
}

#[tokio::test]
async fn manual_register_rejects_unknown_contest() {
    let h = Harness::new(registering_config());
    let err = h
        .watcher
        .register(Platform::Codeforces, "9999", t0())
        .await
        .unwrap_err();
    assert!(matches!(err, WatchError::UnknownContest(_)));
    assert_eq!(h.automation.calls(), 0);
}
