//! Read-only snapshots for the dashboard and the CLI.
//!
//! Nothing here writes to the store.

use crate::analytics::{self, PracticeSummary, TagProfile, TagStats, TrainingPlan};
use crate::error::Result;
use crate::model::{
    ContestRecord, JobKind, JobOutcome, JobRunRecord, Platform, RatingChange, RegistrationAttempt,
    ReminderKind, SchedulerRunLock, StoredContestResult,
};
use crate::store::StateStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Practice window used by the summary view.
pub const DEFAULT_PRACTICE_DAYS: u32 = 30;
/// Tag window used by the analytics views.
pub const DEFAULT_TAG_DAYS: u32 = 90;
pub const DEFAULT_REGISTRATION_LIMIT: usize = 50;
pub const DEFAULT_RATING_LIMIT: usize = 50;
pub const DEFAULT_RESULT_LIMIT: usize = 20;

const RUNS_SCANNED: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpcomingContest {
    #[serde(flatten)]
    pub contest: ContestRecord,
    pub auto_register: bool,
    pub reminders_sent: BTreeSet<ReminderKind>,
    pub last_attempt: Option<RegistrationAttempt>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagReport {
    pub window_days: u32,
    pub stats: BTreeMap<String, TagStats>,
    #[serde(flatten)]
    pub profile: TagProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub job: JobKind,
    /// Present while a run holds the lock.
    pub lock: Option<SchedulerRunLock>,
    pub last_run: Option<JobRunRecord>,
    /// Failed, panicked or overridden runs among the latest few.
    pub recent_failures: Vec<JobRunRecord>,
}

/// Everything the dashboard shows, read in one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub upcoming: Vec<UpcomingContest>,
    pub practice: PracticeSummary,
    pub tags: TagReport,
    pub plan: TrainingPlan,
    pub registrations: Vec<RegistrationAttempt>,
    pub ratings: Vec<RatingChange>,
    pub results: Vec<StoredContestResult>,
    pub jobs: Vec<JobStatus>,
}

pub struct Dashboard {
    store: Arc<StateStore>,
}

impl Dashboard {
    #[must_use]
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }

    /// Non-stale contests that have not started, soonest first.
    pub fn upcoming_contests(&self, now: DateTime<Utc>) -> Result<Vec<UpcomingContest>> {
        let mut out = Vec::new();
        for stored in self.store.active_contests_after(now)? {
            let id = stored.record.id();
            out.push(UpcomingContest {
                reminders_sent: self.store.receipt_kinds(&id)?,
                last_attempt: self.store.attempts(&id)?.pop(),
                auto_register: stored.auto_register,
                contest: stored.record,
            });
        }
        Ok(out)
    }

    pub fn practice_summary(&self, window_days: u32, now: DateTime<Utc>) -> Result<PracticeSummary> {
        analytics::practice_summary(&self.store, window_days, now)
    }

    pub fn weak_strong_tags(&self, window_days: u32, now: DateTime<Utc>) -> Result<TagReport> {
        let stats = analytics::weak_strong_tags(&self.store, window_days, now)?;
        Ok(TagReport {
            window_days,
            profile: analytics::tag_profile(&stats),
            stats,
        })
    }

    pub fn training_plan(&self, window_days: u32, now: DateTime<Utc>) -> Result<TrainingPlan> {
        analytics::training_plan(&self.store, window_days, now)
    }

    /// Latest registration attempts, newest first.
    pub fn registrations(&self, limit: usize) -> Result<Vec<RegistrationAttempt>> {
        Ok(self.store.recent_attempts(limit)?)
    }

    /// The `limit` most recent rating changes, oldest first.
    pub fn rating_history(
        &self,
        platform: Option<Platform>,
        limit: usize,
    ) -> Result<Vec<RatingChange>> {
        let mut history = self.store.rating_history(platform)?;
        let keep_from = history.len().saturating_sub(limit);
        Ok(history.split_off(keep_from))
    }

    /// Kept post-contest results, most recently recorded first.
    pub fn contest_results(&self, limit: usize) -> Result<Vec<StoredContestResult>> {
        Ok(self.store.recent_contest_results(limit)?)
    }

    pub fn job_status(&self) -> Result<Vec<JobStatus>> {
        JobKind::ALL
            .into_iter()
            .map(|job| {
                let runs = self.store.job_runs(job, RUNS_SCANNED)?;
                Ok(JobStatus {
                    job,
                    lock: self.store.current_lock(job)?,
                    last_run: runs.first().cloned(),
                    recent_failures: runs
                        .into_iter()
                        .filter(|r| {
                            matches!(
                                r.outcome,
                                JobOutcome::Failed | JobOutcome::Panicked | JobOutcome::LockStale
                            )
                        })
                        .collect(),
                })
            })
            .collect()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> Result<DashboardSnapshot> {
        Ok(DashboardSnapshot {
            generated_at: now,
            upcoming: self.upcoming_contests(now)?,
            practice: self.practice_summary(DEFAULT_PRACTICE_DAYS, now)?,
            tags: self.weak_strong_tags(DEFAULT_TAG_DAYS, now)?,
            plan: self.training_plan(DEFAULT_TAG_DAYS, now)?,
            registrations: self.registrations(DEFAULT_REGISTRATION_LIMIT)?,
            ratings: self.rating_history(None, DEFAULT_RATING_LIMIT)?,
            results: self.contest_results(DEFAULT_RESULT_LIMIT)?,
            jobs: self.job_status()?,
        })
    }
}
