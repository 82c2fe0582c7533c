//! Run-lock authority: decides whether a job kind may start.
//!
//! The lock row lives in the state store so that every process sharing the
//! database (the periodic loop and an on-demand `update_data`) sees it.

use crate::error::Result;
use crate::model::{JobKind, SchedulerRunLock, before};
use crate::store::{LockAcquisition, StateStore};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

/// Result of a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunDecision {
    /// This caller owns the lock under `holder`.
    Run {
        holder: String,
        /// Stale lock that was overridden, if any.
        takeover: Option<SchedulerRunLock>,
    },
    /// Another holder is running the job.
    Skip {
        holder: String,
        since: DateTime<Utc>,
    },
}

/// Lock controller for one process.
pub struct RunLockAuthority {
    store: Arc<StateStore>,
    instance_id: String,
    stale_after: TimeDelta,
}

impl RunLockAuthority {
    #[must_use]
    pub fn new(store: Arc<StateStore>, stale_after: TimeDelta) -> Self {
        Self {
            store,
            instance_id: format!("pid{}-{}", std::process::id(), uuid::Uuid::new_v4().simple()),
            stale_after,
        }
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Try to take the lock for `job` at `now`.
    ///
    /// Each acquisition gets a fresh holder id so that a run overridden as
    /// stale cannot later release its successor's lock.
    pub fn acquire(&self, job: JobKind, now: DateTime<Utc>) -> Result<RunDecision> {
        let holder = format!("{}/{}", self.instance_id, uuid::Uuid::new_v4().simple());
        let decision = match self
            .store
            .try_acquire_lock(job, &holder, now, before(now, self.stale_after))?
        {
            LockAcquisition::Acquired => RunDecision::Run {
                holder,
                takeover: None,
            },
            LockAcquisition::Overridden { previous } => RunDecision::Run {
                holder,
                takeover: Some(previous),
            },
            LockAcquisition::Held(current) => RunDecision::Skip {
                holder: current.holder,
                since: current.started_at,
            },
        };
        Ok(decision)
    }

    /// Release a lock taken by [`acquire`](Self::acquire). Returns `false`
    /// when the lock was already gone or taken over.
    pub fn release(&self, job: JobKind, holder: &str) -> Result<bool> {
        Ok(self.store.release_lock(job, holder)?)
    }
}
