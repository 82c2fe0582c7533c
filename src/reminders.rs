//! Notification scheduler: decides which reminders are due and delivers
//! them with at-most-once receipts.
//!
//! Nothing is cached between runs. Every decision re-reads the receipts
//! table, so a crash between "send" and "write receipt" can only cause a
//! duplicate email, never a lost one.

use crate::config::RemindersConfig;
use crate::error::Result;
use crate::model::{ContestId, ContestRecord, ReminderKind, before, epoch};
use crate::notify::{self, Notifier};
use crate::store::StateStore;
use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Thresholds and enabled kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderPolicy {
    pub enabled: BTreeSet<ReminderKind>,
    pub day_before: TimeDelta,
    pub hour_before: TimeDelta,
    pub quarter_hour_before: TimeDelta,
    pub grace: TimeDelta,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self::from_config(&RemindersConfig::default())
    }
}

impl ReminderPolicy {
    #[must_use]
    pub fn from_config(config: &RemindersConfig) -> Self {
        Self {
            enabled: config
                .enabled
                .iter()
                .copied()
                .filter(|k| ReminderKind::REMINDERS.contains(k))
                .collect(),
            day_before: secs(config.day_before_secs),
            hour_before: secs(config.hour_before_secs),
            quarter_hour_before: secs(config.quarter_hour_before_secs),
            grace: secs(config.grace_secs),
        }
    }

    /// How close to the start a countdown kind becomes due. `None` for
    /// `new`, which is due as soon as the contest is known.
    #[must_use]
    pub fn lead(&self, kind: ReminderKind) -> Option<TimeDelta> {
        match kind {
            ReminderKind::DayBefore => Some(self.day_before),
            ReminderKind::HourBefore => Some(self.hour_before),
            ReminderKind::QuarterHourBefore => Some(self.quarter_hour_before),
            ReminderKind::New | ReminderKind::PostContest => None,
        }
    }

    fn is_due(&self, kind: ReminderKind, until_start: TimeDelta) -> bool {
        match self.lead(kind) {
            Some(lead) => until_start <= lead,
            None => kind == ReminderKind::New,
        }
    }
}

fn secs(value: u64) -> TimeDelta {
    TimeDelta::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

/// One reminder owed for one contest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueReminder {
    pub contest: ContestRecord,
    pub kind: ReminderKind,
}

/// What one delivery pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: Vec<(ContestId, ReminderKind)>,
    /// Sends that failed; retried on the next pass.
    pub failed: Vec<(ContestId, ReminderKind, String)>,
    /// Due reminders held back because no recipient is configured.
    pub undelivered: usize,
    /// The pass stopped early on cancellation.
    pub cancelled: bool,
}

pub struct NotificationScheduler {
    policy: ReminderPolicy,
    tz: Tz,
}

impl NotificationScheduler {
    #[must_use]
    pub fn new(policy: ReminderPolicy) -> Self {
        Self {
            policy,
            tz: Tz::UTC,
        }
    }

    /// Zone reminder emails render start times in. Defaults to UTC.
    #[must_use]
    pub fn with_time_zone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &ReminderPolicy {
        &self.policy
    }

    /// Reminders owed at `now`, by ascending start time and then kind order
    /// (`new`, `T-24h`, `T-1h`, `T-15m`).
    pub fn due_reminders(&self, store: &StateStore, now: DateTime<Utc>) -> Result<Vec<DueReminder>> {
        let candidates = store.active_contests_after(before(now, self.policy.grace))?;
        let mut due = Vec::new();

        for stored in candidates {
            let contest = stored.record;
            let id = contest.id();
            let sent = store.receipt_kinds(&id)?;
            let until_start = TimeDelta::seconds(epoch(contest.start_time) - epoch(now));

            for kind in ReminderKind::REMINDERS {
                if !self.policy.enabled.contains(&kind) || sent.contains(&kind) {
                    continue;
                }
                if self.policy.is_due(kind, until_start) {
                    due.push(DueReminder {
                        contest: contest.clone(),
                        kind,
                    });
                }
            }
        }

        due.sort_by(|a, b| {
            a.contest
                .start_time
                .cmp(&b.contest.start_time)
                .then_with(|| a.contest.id().cmp(&b.contest.id()))
                .then_with(|| a.kind.cmp(&b.kind))
        });
        Ok(due)
    }

    /// Send every due reminder.
    ///
    /// A receipt is written right after each successful send, before the
    /// next candidate is touched. A failed send writes nothing so the same
    /// reminder is due again next pass. Cancellation is checked before each
    /// send; a send already started always completes.
    pub async fn deliver_due(
        &self,
        store: &StateStore,
        notifier: &dyn Notifier,
        recipient: Option<&str>,
        timeout: Duration,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport> {
        let due = self.due_reminders(store, now)?;
        let mut report = DeliveryReport::default();

        let Some(recipient) = recipient else {
            if !due.is_empty() {
                tracing::warn!(
                    "{} reminder(s) due but no notification email is configured",
                    due.len()
                );
            }
            report.undelivered = due.len();
            return Ok(report);
        };

        for reminder in due {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let id = reminder.contest.id();
            let message = notify::reminder_message(&reminder.contest, reminder.kind, now, self.tz);
            match notify::deliver(notifier, recipient, &message, timeout).await {
                Ok(()) => {
                    if !store.record_receipt(&id, reminder.kind, now)? {
                        tracing::debug!("receipt {id}/{} already recorded", reminder.kind);
                    }
                    tracing::info!("sent {} reminder for {id}", reminder.kind);
                    report.sent.push((id, reminder.kind));
                }
                Err(e) => {
                    tracing::warn!("{} reminder for {id} not delivered: {e}", reminder.kind);
                    report.failed.push((id, reminder.kind, e.to_string()));
                }
            }
        }
        Ok(report)
    }
}
