//! Contest registry: reconciles fetched contest lists against stored state.

use crate::adapters::PlatformAdapter;
use crate::error::{Result, WatchError};
use crate::model::{ContestId, ContestRecord, Platform};
use crate::store::{StateStore, UpsertOutcome};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// What one reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Identities seen for the first time.
    pub new: BTreeSet<ContestId>,
    /// Identities whose start time or registration window changed.
    pub updated: BTreeSet<ContestId>,
    /// Identities that went stale because they were missing after starting.
    pub stale: BTreeSet<ContestId>,
}

/// Keeps the stored contest set in step with what the platforms publish.
pub struct ContestRegistry {
    store: Arc<StateStore>,
    auto_register_platforms: Vec<Platform>,
}

impl ContestRegistry {
    pub fn new(store: Arc<StateStore>, auto_register_platforms: Vec<Platform>) -> Self {
        Self {
            store,
            auto_register_platforms,
        }
    }

    /// Upsert a successful fetch for `platform`.
    ///
    /// Records from other platforms in `fetched` are ignored, as are rows
    /// stored for other platforms.
    pub fn reconcile(
        &self,
        platform: Platform,
        fetched: &[ContestRecord],
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut present = BTreeSet::new();
        let auto_register = self.auto_register_platforms.contains(&platform);

        for record in fetched {
            if record.platform != platform {
                tracing::warn!(
                    "ignoring {} returned by the {platform} fetch",
                    record.id()
                );
                continue;
            }
            present.insert(record.external_id.clone());
            match self.store.upsert_contest(record, auto_register, now)? {
                UpsertOutcome::Inserted => {
                    tracing::info!("new contest {}: {}", record.id(), record.name);
                    report.new.insert(record.id());
                }
                UpsertOutcome::Changed {
                    rescheduled,
                    registration_toggled,
                } => {
                    tracing::info!(
                        "contest {} changed (rescheduled={rescheduled}, registration_toggled={registration_toggled})",
                        record.id()
                    );
                    report.updated.insert(record.id());
                }
                UpsertOutcome::Unchanged => {}
            }
        }

        let flipped = self.store.mark_stale_absent(platform, &present, now)?;
        for id in flipped {
            tracing::debug!("contest {id} marked stale");
            report.stale.insert(id);
        }
        Ok(report)
    }

    /// Fetch from `adapter` under `timeout` and reconcile.
    ///
    /// Any adapter error or timeout is [`WatchError::FetchUnavailable`] and
    /// leaves stored state untouched.
    pub async fn refresh(
        &self,
        adapter: &dyn PlatformAdapter,
        platform: Platform,
        timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let fetched = match tokio::time::timeout(timeout, adapter.fetch_contests(platform)).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => return Err(WatchError::fetch_unavailable(platform, e.to_string())),
            Err(_) => {
                return Err(WatchError::fetch_unavailable(
                    platform,
                    format!("timed out after {timeout:?}"),
                ));
            }
        };
        self.reconcile(platform, &fetched, now)
    }
}
