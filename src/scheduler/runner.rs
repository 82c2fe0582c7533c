//! Exclusive job execution.
//!
//! Every run of a job kind goes through [`JobRunner::run_exclusive`]: take
//! the stored run lock, run the body under `catch_unwind`, release the lock
//! whatever happened and append a job-run record.

use crate::error::{Result, WatchError};
use crate::model::{JobKind, JobOutcome, JobRunRecord};
use crate::scheduler::authority::{RunDecision, RunLockAuthority};
use crate::store::StateStore;
use chrono::{DateTime, TimeDelta, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Number of run-history entries kept per job kind.
pub const DEFAULT_HISTORY_LIMIT: usize = 400;

/// In-process view of a job kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Running { since: DateTime<Utc> },
    /// Last run failed; the next period retries.
    Failed { at: DateTime<Utc>, detail: String },
}

/// One-line description of a job's result for run history.
pub trait RunSummary {
    fn summary(&self) -> String;
}

impl RunSummary for String {
    fn summary(&self) -> String {
        self.clone()
    }
}

/// Outcome of [`JobRunner::run_exclusive`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobRunReport<T> {
    Completed { value: T, took_over: bool },
    Failed { error: String, took_over: bool },
    Panicked { took_over: bool },
    /// Another holder was running the job; nothing ran.
    Skipped { holder: String, since: DateTime<Utc> },
}

impl<T> JobRunReport<T> {
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Completed { value, .. } => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn ran(&self) -> bool {
        !matches!(self, Self::Skipped { .. })
    }
}

pub struct JobRunner {
    store: Arc<StateStore>,
    authority: RunLockAuthority,
    history_limit: usize,
    states: Mutex<BTreeMap<JobKind, JobState>>,
}

impl JobRunner {
    #[must_use]
    pub fn new(store: Arc<StateStore>, stale_after: TimeDelta) -> Self {
        Self {
            authority: RunLockAuthority::new(Arc::clone(&store), stale_after),
            store,
            history_limit: DEFAULT_HISTORY_LIMIT,
            states: Mutex::new(BTreeMap::new()),
        }
    }

    /// Override the per-kind run-history limit.
    #[must_use]
    pub fn with_history_limit(mut self, max_entries: usize) -> Self {
        self.history_limit = max_entries.max(1);
        self
    }

    /// Current in-process state of every job kind.
    #[must_use]
    pub fn states(&self) -> BTreeMap<JobKind, JobState> {
        let states = match self.states.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        JobKind::ALL
            .into_iter()
            .map(|job| (job, states.get(&job).cloned().unwrap_or_default()))
            .collect()
    }

    /// Run `body` as `job` unless another holder owns a live lock.
    ///
    /// Only lock acquisition errors are returned as `Err`; everything the
    /// body does (error or panic) is folded into the report and history.
    pub async fn run_exclusive<T, F, Fut>(
        &self,
        job: JobKind,
        now: DateTime<Utc>,
        body: F,
    ) -> Result<JobRunReport<T>>
    where
        T: RunSummary,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (holder, took_over) = match self.authority.acquire(job, now)? {
            RunDecision::Skip { holder, since } => {
                debug!("{job} skipped; lock held by '{holder}' since {since}");
                self.record(
                    job,
                    now,
                    now,
                    JobOutcome::Skipped,
                    format!("lock held by {holder} since {since}"),
                );
                return Ok(JobRunReport::Skipped { holder, since });
            }
            RunDecision::Run { holder, takeover } => {
                if let Some(previous) = &takeover {
                    let stale = WatchError::LockStale(format!(
                        "{job} lock held by {} since {}",
                        previous.holder, previous.started_at
                    ));
                    warn!("{stale}");
                    self.record(
                        job,
                        previous.started_at,
                        now,
                        JobOutcome::LockStale,
                        stale.to_string(),
                    );
                }
                (holder, takeover.is_some())
            }
        };

        self.set_state(job, JobState::Running { since: now });
        debug!("{job} started");

        let result = AssertUnwindSafe(body()).catch_unwind().await;

        match self.authority.release(job, &holder) {
            Ok(true) => {}
            Ok(false) => warn!("{job}: lock was taken over before release"),
            Err(e) => error!("{job}: cannot release run lock: {e}"),
        }

        let finished_at = Utc::now().max(now);
        let report = match result {
            Ok(Ok(value)) => {
                let summary = value.summary();
                info!("{job} completed: {summary}");
                self.record(job, now, finished_at, JobOutcome::Completed, summary);
                self.set_state(job, JobState::Idle);
                JobRunReport::Completed { value, took_over }
            }
            Ok(Err(e)) => {
                let detail = e.to_string();
                warn!("{job} failed: {detail}");
                self.record(job, now, finished_at, JobOutcome::Failed, detail.clone());
                self.set_state(
                    job,
                    JobState::Failed {
                        at: finished_at,
                        detail: detail.clone(),
                    },
                );
                JobRunReport::Failed {
                    error: detail,
                    took_over,
                }
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!("{job} panicked: {detail}");
                self.record(job, now, finished_at, JobOutcome::Panicked, detail.clone());
                self.set_state(
                    job,
                    JobState::Failed {
                        at: finished_at,
                        detail,
                    },
                );
                JobRunReport::Panicked { took_over }
            }
        };
        Ok(report)
    }

    fn record(
        &self,
        job: JobKind,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcome: JobOutcome,
        detail: String,
    ) {
        let run = JobRunRecord {
            job,
            started_at,
            finished_at,
            outcome,
            detail,
        };
        if let Err(e) = self.store.record_job_run(&run, self.history_limit) {
            error!("{job}: cannot record run history: {e}");
        }
    }

    fn set_state(&self, job: JobKind, state: JobState) {
        match self.states.lock() {
            Ok(mut states) => {
                states.insert(job, state);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(job, state);
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_owned()
    }
}
