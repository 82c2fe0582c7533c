//! Job bodies for the three job kinds.
//!
//! Each body runs inside [`JobRunner::run_exclusive`](super::runner::JobRunner::run_exclusive);
//! they only decide what one cycle does. Per-platform and per-contest
//! failures are logged and reported, never propagated, so one bad
//! upstream cannot stop the rest of the cycle.

use crate::adapters::PlatformAdapter;
use crate::config::WatchConfig;
use crate::error::{Result, WatchError};
use crate::model::{
    ContestId, Platform, RatingChange, RegistrationAttempt, ReminderKind, SubmissionRecord,
    before,
};
use crate::notify::{self, Notifier};
use crate::registration::RegistrationCoordinator;
use crate::registry::{ContestRegistry, ReconcileReport};
use crate::reminders::{DeliveryReport, NotificationScheduler};
use crate::scheduler::runner::RunSummary;
use crate::store::StateStore;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Adapters keyed by the platform they serve.
pub type AdapterMap = BTreeMap<Platform, Arc<dyn PlatformAdapter>>;

/// Everything a job body needs, borrowed from the service.
pub struct JobContext<'a> {
    pub store: &'a StateStore,
    pub config: &'a WatchConfig,
    pub adapters: &'a AdapterMap,
    pub registry: &'a ContestRegistry,
    pub reminders: &'a NotificationScheduler,
    pub registration: Option<&'a RegistrationCoordinator>,
    pub notifier: &'a dyn Notifier,
    pub cancel: &'a CancellationToken,
}

/// A platform skipped this cycle and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unavailable {
    pub platform: Platform,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContestCheckReport {
    pub reconciled: BTreeMap<Platform, ReconcileReport>,
    pub unavailable: Vec<Unavailable>,
    pub delivery: DeliveryReport,
    pub registrations: Vec<RegistrationAttempt>,
}

impl RunSummary for ContestCheckReport {
    fn summary(&self) -> String {
        let new: usize = self.reconciled.values().map(|r| r.new.len()).sum();
        let updated: usize = self.reconciled.values().map(|r| r.updated.len()).sum();
        let mut out = format!(
            "{new} new, {updated} updated, {} reminder(s) sent, {} failed, {} registration attempt(s)",
            self.delivery.sent.len(),
            self.delivery.failed.len(),
            self.registrations.len()
        );
        append_unavailable(&mut out, &self.unavailable);
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PracticeSyncReport {
    pub submissions_added: BTreeMap<Platform, usize>,
    pub rating_changes_added: usize,
    pub unavailable: Vec<Unavailable>,
}

impl RunSummary for PracticeSyncReport {
    fn summary(&self) -> String {
        let added: usize = self.submissions_added.values().sum();
        let mut out = format!(
            "{added} submission(s) added, {} rating change(s)",
            self.rating_changes_added
        );
        append_unavailable(&mut out, &self.unavailable);
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostContestReport {
    pub reported: Vec<ContestId>,
    /// No result published yet; retried next cycle.
    pub pending: Vec<ContestId>,
    pub failed: Vec<(ContestId, String)>,
    /// Nothing was attempted: no recipient or no handle.
    pub skipped: Option<String>,
}

impl RunSummary for PostContestReport {
    fn summary(&self) -> String {
        if let Some(reason) = &self.skipped {
            return format!("skipped: {reason}");
        }
        format!(
            "{} reported, {} pending, {} failed",
            self.reported.len(),
            self.pending.len(),
            self.failed.len()
        )
    }
}

fn append_unavailable(out: &mut String, unavailable: &[Unavailable]) {
    if unavailable.is_empty() {
        return;
    }
    let names: Vec<&str> = unavailable.iter().map(|u| u.platform.as_str()).collect();
    out.push_str("; unavailable: ");
    out.push_str(&names.join(", "));
}

/// Refresh contests from every adapter, deliver due reminders, then run
/// the registration pass.
pub async fn contest_check(ctx: &JobContext<'_>, now: DateTime<Utc>) -> Result<ContestCheckReport> {
    let timeout = ctx.config.scheduler.call_timeout();
    let mut report = ContestCheckReport::default();

    for (&platform, adapter) in ctx.adapters {
        if ctx.cancel.is_cancelled() {
            return Ok(report);
        }
        match ctx
            .registry
            .refresh(adapter.as_ref(), platform, timeout, now)
            .await
        {
            Ok(reconciled) => {
                report.reconciled.insert(platform, reconciled);
            }
            Err(WatchError::FetchUnavailable { reason, .. }) => {
                warn!("{platform} contests unavailable, keeping stored state: {reason}");
                report.unavailable.push(Unavailable { platform, reason });
            }
            Err(e) => return Err(e),
        }
    }

    report.delivery = ctx
        .reminders
        .deliver_due(
            ctx.store,
            ctx.notifier,
            ctx.config.recipient(),
            timeout,
            now,
            ctx.cancel,
        )
        .await?;

    match ctx.registration {
        Some(coordinator) if !ctx.cancel.is_cancelled() => {
            report.registrations = coordinator.register_due(now, ctx.cancel).await?;
        }
        Some(_) => {}
        None => debug!("no registration automation installed"),
    }
    Ok(report)
}

/// Pull new submissions and rating changes for every configured platform.
pub async fn practice_sync(ctx: &JobContext<'_>, _now: DateTime<Utc>) -> Result<PracticeSyncReport> {
    let timeout = ctx.config.scheduler.call_timeout();
    let mut report = PracticeSyncReport::default();

    for platform in ctx.config.platforms.configured() {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let Some(adapter) = ctx.adapters.get(&platform) else {
            debug!("{platform}: handle configured but no adapter installed");
            continue;
        };

        let since = ctx.store.latest_submission_at(platform)?;
        let fetched = tokio::time::timeout(timeout, adapter.fetch_submissions(platform, since)).await;
        let submissions: Vec<SubmissionRecord> = match fetched {
            Ok(Ok(subs)) => subs.into_iter().filter(|s| s.platform == platform).collect(),
            Ok(Err(e)) => {
                warn!("{platform} submissions unavailable: {e}");
                report.unavailable.push(Unavailable {
                    platform,
                    reason: e.to_string(),
                });
                continue;
            }
            Err(_) => {
                warn!("{platform} submissions timed out after {timeout:?}");
                report.unavailable.push(Unavailable {
                    platform,
                    reason: format!("timed out after {timeout:?}"),
                });
                continue;
            }
        };
        let added = ctx.store.append_submissions(&submissions)?;
        info!("{platform}: {added} new submission(s) of {} fetched", submissions.len());
        report.submissions_added.insert(platform, added);

        match tokio::time::timeout(timeout, adapter.fetch_rating_changes(platform)).await {
            Ok(Ok(changes)) => {
                for change in changes.iter().filter(|c| c.platform == platform) {
                    if ctx.store.upsert_rating_change(change)? {
                        report.rating_changes_added += 1;
                    }
                }
            }
            Ok(Err(e)) => warn!("{platform} rating history unavailable: {e}"),
            Err(_) => warn!("{platform} rating history timed out after {timeout:?}"),
        }
    }
    Ok(report)
}

/// Email one report per finished contest once results are published.
///
/// Considers contests that ended between `now - lookback` and
/// `now - delay` without a `post-contest` receipt. A reported contest is
/// marked stale.
pub async fn post_contest(ctx: &JobContext<'_>, now: DateTime<Utc>) -> Result<PostContestReport> {
    let scheduler = &ctx.config.scheduler;
    let timeout = scheduler.call_timeout();
    let mut report = PostContestReport::default();

    let Some(recipient) = ctx.config.recipient() else {
        report.skipped = Some("no notification email configured".to_owned());
        return Ok(report);
    };
    if ctx.config.platforms.configured().is_empty() {
        report.skipped = Some("no platform handle configured".to_owned());
        return Ok(report);
    }

    let from = before(now, secs(scheduler.post_contest_lookback_secs));
    let to = before(now, secs(scheduler.post_contest_delay_secs));
    let ended = ctx.store.contests_ended_between(from, to)?;

    for stored in ended {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let contest = stored.record;
        let id = contest.id();
        if ctx.config.platforms.handle_for(contest.platform).is_none() {
            continue;
        }
        let Some(adapter) = ctx.adapters.get(&contest.platform) else {
            continue;
        };
        if ctx.store.has_receipt(&id, ReminderKind::PostContest)? {
            continue;
        }

        let fetched = tokio::time::timeout(
            timeout,
            adapter.fetch_contest_result(contest.platform, &contest.external_id),
        )
        .await;
        let result = match fetched {
            Ok(Ok(Some(result))) => result,
            Ok(Ok(None)) => {
                debug!("{id}: no result yet");
                report.pending.push(id);
                continue;
            }
            Ok(Err(e)) => {
                warn!("{id}: result unavailable: {e}");
                report.failed.push((id, e.to_string()));
                continue;
            }
            Err(_) => {
                warn!("{id}: result fetch timed out after {timeout:?}");
                report.failed.push((id, format!("timed out after {timeout:?}")));
                continue;
            }
        };

        ctx.store.upsert_contest_result(&id, &result, now)?;
        if let (Some(old_rating), Some(new_rating)) = (result.old_rating, result.new_rating) {
            ctx.store.upsert_rating_change(&RatingChange {
                platform: contest.platform,
                contest_id: contest.external_id.clone(),
                old_rating,
                new_rating,
                at: contest.end_time(),
            })?;
        }

        let message = notify::post_contest_message(&contest, &result);
        match notify::deliver(ctx.notifier, recipient, &message, timeout).await {
            Ok(()) => {
                ctx.store.record_receipt(&id, ReminderKind::PostContest, now)?;
                ctx.store.mark_stale(&id, now)?;
                info!("{id}: post-contest report sent (rank {})", result.rank);
                report.reported.push(id);
            }
            Err(e) => {
                warn!("{id}: post-contest report not delivered: {e}");
                report.failed.push((id, e.to_string()));
            }
        }
    }

    Ok(report)
}

fn secs(value: u64) -> TimeDelta {
    TimeDelta::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}
