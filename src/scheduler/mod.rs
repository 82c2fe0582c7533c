//! Recurring job driver.
//!
//! One tokio task per [`JobKind`], each on its own period. Runs of the same
//! kind are serialized through the stored run lock, so the loop and an
//! on-demand `update_data` never overlap even across processes.

pub mod authority;
pub mod jobs;
pub mod runner;

pub use authority::{RunDecision, RunLockAuthority};
pub use jobs::{
    AdapterMap, ContestCheckReport, JobContext, PostContestReport, PracticeSyncReport, Unavailable,
};
pub use runner::{DEFAULT_HISTORY_LIMIT, JobRunReport, JobRunner, JobState, RunSummary};

use crate::model::JobKind;
use crate::service::Watcher;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Handle to a running periodic loop.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Token shared by every job task; cancelling it stops new work.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel and wait for every job task to finish its in-flight action.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("scheduler task ended abnormally: {e}");
            }
        }
        info!("scheduler stopped");
    }
}

/// Spawn the periodic loop for every job kind.
///
/// The first run of each kind happens immediately; later runs follow the
/// configured period. A tick that arrives while the previous run of the
/// same kind is still going is delayed rather than bunched up.
pub fn spawn(watcher: Arc<Watcher>) -> SchedulerHandle {
    let cancel = CancellationToken::new();
    let tasks = JobKind::ALL
        .into_iter()
        .map(|job| spawn_job(Arc::clone(&watcher), job, cancel.clone()))
        .collect();
    info!("scheduler started");
    SchedulerHandle { cancel, tasks }
}

fn spawn_job(watcher: Arc<Watcher>, job: JobKind, cancel: CancellationToken) -> JoinHandle<()> {
    let period = watcher.config().scheduler.period(job);
    tokio::spawn(async move {
        debug!("{job} loop every {period:?}");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = watcher.run_job(job, Utc::now(), &cancel).await {
                error!("{job}: cannot start run: {e}");
            }
        }
        debug!("{job} loop stopped");
    })
}
