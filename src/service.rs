//! Service facade.
//!
//! [`Watcher`] owns the configured components and exposes the command entry
//! points: scheduled job runs, `update_data` and manual `register`.

use crate::adapters::{PlatformAdapter, RegistrationAutomation};
use crate::config::WatchConfig;
use crate::error::{Result, WatchError};
use crate::model::{ContestId, JobKind, Platform, RegistrationAttempt};
use crate::notify::Notifier;
use crate::registration::{CredentialSet, RegistrationCoordinator, RegistrationPolicy};
use crate::registry::ContestRegistry;
use crate::reminders::{NotificationScheduler, ReminderPolicy};
use crate::scheduler::jobs::{self, AdapterMap, JobContext};
use crate::scheduler::{
    ContestCheckReport, JobRunReport, JobRunner, JobState, PostContestReport, PracticeSyncReport,
    RunSummary,
};
use crate::store::StateStore;
use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of one job body, whichever kind ran.
#[derive(Debug, Clone, PartialEq)]
pub enum JobReport {
    ContestCheck(ContestCheckReport),
    PracticeSync(PracticeSyncReport),
    PostContest(PostContestReport),
}

impl RunSummary for JobReport {
    fn summary(&self) -> String {
        match self {
            Self::ContestCheck(r) => r.summary(),
            Self::PracticeSync(r) => r.summary(),
            Self::PostContest(r) => r.summary(),
        }
    }
}

/// Outcome of [`Watcher::update_data`].
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateReport {
    pub practice_sync: JobRunReport<JobReport>,
    pub contest_check: JobRunReport<JobReport>,
}

pub struct Watcher {
    config: WatchConfig,
    store: Arc<StateStore>,
    notifier: Arc<dyn Notifier>,
    adapters: AdapterMap,
    registry: ContestRegistry,
    reminders: NotificationScheduler,
    registration: Option<RegistrationCoordinator>,
    credentials: CredentialSet,
    runner: JobRunner,
    time_zone: Tz,
}

impl Watcher {
    pub fn new(config: WatchConfig, store: Arc<StateStore>, notifier: Arc<dyn Notifier>) -> Self {
        let stale_after = TimeDelta::seconds(
            i64::try_from(config.scheduler.stale_lock_secs).unwrap_or(i64::MAX / 1000),
        );
        let runner = JobRunner::new(Arc::clone(&store), stale_after)
            .with_history_limit(config.scheduler.history_limit);
        let time_zone = config.time_zone().unwrap_or_else(|e| {
            tracing::warn!("{e}; rendering times in UTC");
            Tz::UTC
        });
        Self {
            registry: ContestRegistry::new(
                Arc::clone(&store),
                config.registration.auto_register_platforms.clone(),
            ),
            reminders: NotificationScheduler::new(ReminderPolicy::from_config(&config.reminders))
                .with_time_zone(time_zone),
            registration: None,
            credentials: CredentialSet::from_config(&config),
            adapters: BTreeMap::new(),
            runner,
            time_zone,
            notifier,
            store,
            config,
        }
    }

    /// Open the configured database and build a watcher on it.
    pub fn open(config: WatchConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        let store = StateStore::open(&config.database_path()?)?;
        Ok(Self::new(config, Arc::new(store), notifier))
    }

    /// Install the data adapter for `platform`.
    #[must_use]
    pub fn with_adapter(mut self, platform: Platform, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters.insert(platform, adapter);
        self
    }

    /// Install registration automation. Without it no attempts are made.
    #[must_use]
    pub fn with_automation(mut self, automation: Arc<dyn RegistrationAutomation>) -> Self {
        self.registration = Some(RegistrationCoordinator::new(
            Arc::clone(&self.store),
            automation,
            Arc::clone(&self.notifier),
            self.config.recipient().map(str::to_owned),
            self.credentials.clone(),
            RegistrationPolicy::from_config(&self.config),
        )
        .with_time_zone(self.time_zone));
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// In-process state of every job kind.
    #[must_use]
    pub fn job_states(&self) -> BTreeMap<JobKind, JobState> {
        self.runner.states()
    }

    /// Run one job kind under its run lock.
    pub async fn run_job(
        &self,
        job: JobKind,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<JobRunReport<JobReport>> {
        let ctx = JobContext {
            store: &self.store,
            config: &self.config,
            adapters: &self.adapters,
            registry: &self.registry,
            reminders: &self.reminders,
            registration: self.registration.as_ref(),
            notifier: self.notifier.as_ref(),
            cancel,
        };
        let ctx = &ctx;
        self.runner
            .run_exclusive(job, now, move || async move {
                match job {
                    JobKind::ContestCheck => jobs::contest_check(ctx, now)
                        .await
                        .map(JobReport::ContestCheck),
                    JobKind::PracticeSync => jobs::practice_sync(ctx, now)
                        .await
                        .map(JobReport::PracticeSync),
                    JobKind::PostContest => jobs::post_contest(ctx, now)
                        .await
                        .map(JobReport::PostContest),
                }
            })
            .await
    }

    /// Sync practice data, then check contests, through the same run locks
    /// the periodic loop uses. A kind already running elsewhere is reported
    /// as skipped.
    pub async fn update_data(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<UpdateReport> {
        let practice_sync = self.run_job(JobKind::PracticeSync, now, cancel).await?;
        let contest_check = self.run_job(JobKind::ContestCheck, now, cancel).await?;
        Ok(UpdateReport {
            practice_sync,
            contest_check,
        })
    }

    /// Manually register for a stored contest.
    pub async fn register(
        &self,
        platform: Platform,
        contest_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RegistrationAttempt> {
        let coordinator = self.registration.as_ref().ok_or_else(|| {
            WatchError::NotConfigured("no registration automation installed".to_owned())
        })?;
        coordinator
            .register_one(&ContestId::new(platform, contest_id), now)
            .await
    }
}
