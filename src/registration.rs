//! Registration coordinator: attempt bookkeeping and retry budget.
//!
//! Each attempt is opened as a `pending` row before the automation is
//! called and closed afterwards. The partial unique index on pending rows
//! makes "one in-flight attempt per contest" hold across processes.

use crate::adapters::{Credentials, RegistrationAutomation, RegistrationOutcome};
use crate::config::WatchConfig;
use crate::error::{Result, WatchError};
use crate::model::{
    AttemptOrigin, AttemptStatus, ContestId, ContestRecord, FailureKind, Platform,
    RegistrationAttempt, before,
};
use crate::notify::{self, Notifier};
use crate::store::StateStore;
use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use futures_util::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Reason recorded on `skipped` attempts.
pub const MISSING_CREDENTIALS: &str = "no credentials configured";

/// Logins per platform.
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    by_platform: BTreeMap<Platform, Credentials>,
}

impl CredentialSet {
    #[must_use]
    pub fn from_config(config: &WatchConfig) -> Self {
        let by_platform = Platform::ALL
            .into_iter()
            .filter_map(|p| config.credentials_for(p).map(|c| (p, c)))
            .collect();
        Self { by_platform }
    }

    pub fn insert(&mut self, platform: Platform, credentials: Credentials) {
        self.by_platform.insert(platform, credentials);
    }

    #[must_use]
    pub fn credentials_for(&self, platform: Platform) -> Option<&Credentials> {
        self.by_platform.get(&platform)
    }
}

/// Budget and timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationPolicy {
    /// Failed attempts allowed before a contest is given up on.
    pub max_attempts: u32,
    /// Pending rows older than this are closed as abandoned.
    pub stale_attempt: TimeDelta,
    pub call_timeout: Duration,
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            stale_attempt: TimeDelta::minutes(30),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RegistrationPolicy {
    #[must_use]
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            max_attempts: config.registration.max_attempts,
            stale_attempt: TimeDelta::seconds(
                i64::try_from(config.registration.stale_attempt_secs).unwrap_or(i64::MAX / 1000),
            ),
            call_timeout: config.scheduler.call_timeout(),
        }
    }
}

/// Whether a scheduled attempt may run for a contest, given its history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    AlreadyRegistered,
    InFlight,
    /// A credential failure is on record; needs operator action.
    CredentialBlocked,
    BudgetExhausted,
    /// No login configured. `recorded` is true when the latest attempt is
    /// already the `skipped` marker.
    MissingCredentials { recorded: bool },
}

/// Classify a contest's attempt history (oldest first).
#[must_use]
pub fn eligibility(
    attempts: &[RegistrationAttempt],
    max_attempts: u32,
    has_credentials: bool,
) -> Eligibility {
    if attempts.iter().any(|a| a.status == AttemptStatus::Succeeded) {
        return Eligibility::AlreadyRegistered;
    }
    if attempts.iter().any(|a| a.status == AttemptStatus::Pending) {
        return Eligibility::InFlight;
    }
    if attempts
        .iter()
        .any(|a| a.failure == Some(FailureKind::Credential))
    {
        return Eligibility::CredentialBlocked;
    }
    let failed = attempts
        .iter()
        .filter(|a| a.status == AttemptStatus::Failed)
        .count();
    if failed >= max_attempts as usize {
        return Eligibility::BudgetExhausted;
    }
    if !has_credentials {
        let recorded = attempts
            .last()
            .is_some_and(|a| a.status == AttemptStatus::Skipped);
        return Eligibility::MissingCredentials { recorded };
    }
    Eligibility::Eligible
}

pub struct RegistrationCoordinator {
    store: Arc<StateStore>,
    automation: Arc<dyn RegistrationAutomation>,
    notifier: Arc<dyn Notifier>,
    recipient: Option<String>,
    credentials: CredentialSet,
    policy: RegistrationPolicy,
    tz: Tz,
}

impl RegistrationCoordinator {
    pub fn new(
        store: Arc<StateStore>,
        automation: Arc<dyn RegistrationAutomation>,
        notifier: Arc<dyn Notifier>,
        recipient: Option<String>,
        credentials: CredentialSet,
        policy: RegistrationPolicy,
    ) -> Self {
        Self {
            store,
            automation,
            notifier,
            recipient,
            credentials,
            policy,
            tz: Tz::UTC,
        }
    }

    /// Zone result emails render start times in. Defaults to UTC.
    #[must_use]
    pub fn with_time_zone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    /// Attempt every eligible auto-register contest. Returns the attempts
    /// written during this pass (including `skipped` markers).
    pub async fn register_due(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RegistrationAttempt>> {
        self.abandon_stale(now)?;

        let mut written = Vec::new();
        for stored in self.store.active_contests_after(now)? {
            if !stored.auto_register || !stored.record.registration_open {
                continue;
            }
            if cancel.is_cancelled() {
                tracing::debug!("registration pass cancelled");
                break;
            }
            let contest = stored.record;
            let id = contest.id();
            let attempts = self.store.attempts(&id)?;
            let credentials = self.credentials.credentials_for(contest.platform);

            match eligibility(&attempts, self.policy.max_attempts, credentials.is_some()) {
                Eligibility::Eligible => {
                    let Some(credentials) = credentials else {
                        continue;
                    };
                    match self
                        .run_attempt(&contest, AttemptOrigin::Scheduled, credentials, now)
                        .await
                    {
                        Ok(attempt) => written.push(attempt),
                        Err(WatchError::AttemptInFlight(_)) => {
                            tracing::debug!("{id}: another attempt started concurrently");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Eligibility::MissingCredentials { recorded: false } => {
                    tracing::info!("{id}: skipping registration, {MISSING_CREDENTIALS}");
                    written.push(self.store.record_skipped(
                        &id,
                        AttemptOrigin::Scheduled,
                        MISSING_CREDENTIALS,
                        now,
                    )?);
                }
                other => tracing::debug!("{id}: not attempting registration ({other:?})"),
            }
        }
        Ok(written)
    }

    /// Operator-requested registration.
    ///
    /// Ignores the retry budget and any credential block. Returns the
    /// existing succeeded attempt without calling the automation again. A
    /// failed attempt is recorded first and then returned as
    /// [`WatchError::CredentialError`] or [`WatchError::TransientError`].
    pub async fn register_one(
        &self,
        id: &ContestId,
        now: DateTime<Utc>,
    ) -> Result<RegistrationAttempt> {
        let stored = self
            .store
            .contest(id)?
            .ok_or_else(|| WatchError::UnknownContest(id.to_string()))?;
        self.abandon_stale(now)?;

        let attempts = self.store.attempts(id)?;
        if let Some(done) = attempts
            .iter()
            .rev()
            .find(|a| a.status == AttemptStatus::Succeeded)
        {
            return Ok(done.clone());
        }
        if attempts.iter().any(|a| a.status == AttemptStatus::Pending) {
            return Err(WatchError::AttemptInFlight(id.to_string()));
        }

        match self.credentials.credentials_for(id.platform) {
            Some(credentials) => {
                let attempt = self
                    .run_attempt(&stored.record, AttemptOrigin::Manual, credentials, now)
                    .await?;
                let reason = || attempt.error_reason.clone().unwrap_or_default();
                match attempt.failure {
                    Some(FailureKind::Credential) => Err(WatchError::CredentialError(reason())),
                    Some(FailureKind::Transient) => Err(WatchError::TransientError(reason())),
                    None => Ok(attempt),
                }
            }
            None => {
                tracing::warn!("{id}: manual registration requested but {MISSING_CREDENTIALS}");
                Ok(self
                    .store
                    .record_skipped(id, AttemptOrigin::Manual, MISSING_CREDENTIALS, now)?)
            }
        }
    }

    fn abandon_stale(&self, now: DateTime<Utc>) -> Result<()> {
        let abandoned = self
            .store
            .abandon_stale_pending(before(now, self.policy.stale_attempt), now)?;
        if abandoned > 0 {
            tracing::warn!("closed {abandoned} abandoned registration attempt(s)");
        }
        Ok(())
    }

    async fn run_attempt(
        &self,
        contest: &ContestRecord,
        origin: AttemptOrigin,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<RegistrationAttempt> {
        let id = contest.id();
        let attempt_id = self
            .store
            .begin_attempt(&id, origin, now)?
            .ok_or_else(|| WatchError::AttemptInFlight(id.to_string()))?;

        let call = AssertUnwindSafe(self.automation.attempt_register(
            contest.platform,
            &contest.external_id,
            credentials,
        ))
        .catch_unwind();
        let outcome = match tokio::time::timeout(self.policy.call_timeout, call).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => RegistrationOutcome::TransientError("automation panicked".to_owned()),
            Err(_) => RegistrationOutcome::TransientError(format!(
                "timed out after {:?}",
                self.policy.call_timeout
            )),
        };

        let attempt = match &outcome {
            RegistrationOutcome::Registered => {
                tracing::info!("{id}: registered");
                self.store
                    .finish_attempt(attempt_id, AttemptStatus::Succeeded, None, None, now)?
            }
            RegistrationOutcome::AlreadyRegistered => {
                tracing::info!("{id}: already registered");
                self.store.finish_attempt(
                    attempt_id,
                    AttemptStatus::Succeeded,
                    None,
                    Some("already registered"),
                    now,
                )?
            }
            RegistrationOutcome::TransientError(reason) => {
                tracing::warn!("{id}: registration failed, will retry: {reason}");
                self.store.finish_attempt(
                    attempt_id,
                    AttemptStatus::Failed,
                    Some(FailureKind::Transient),
                    Some(reason),
                    now,
                )?
            }
            RegistrationOutcome::CredentialError(reason) => {
                tracing::warn!("{id}: credentials rejected, not retrying: {reason}");
                self.store.finish_attempt(
                    attempt_id,
                    AttemptStatus::Failed,
                    Some(FailureKind::Credential),
                    Some(reason),
                    now,
                )?
            }
        };

        self.report(contest, &outcome).await;
        Ok(attempt)
    }

    /// Best-effort result email for outcomes the user must know about.
    async fn report(&self, contest: &ContestRecord, outcome: &RegistrationOutcome) {
        let message = match outcome {
            RegistrationOutcome::Registered => {
                notify::registration_message(contest, true, "You are registered.", self.tz)
            }
            RegistrationOutcome::AlreadyRegistered => {
                notify::registration_message(contest, true, "You were already registered.", self.tz)
            }
            RegistrationOutcome::CredentialError(reason) => notify::registration_message(
                contest,
                false,
                &format!("Login was rejected ({reason}). Update the password and register manually."),
                self.tz,
            ),
            RegistrationOutcome::TransientError(_) => return,
        };
        let Some(recipient) = self.recipient.as_deref() else {
            return;
        };
        if let Err(e) =
            notify::deliver(self.notifier.as_ref(), recipient, &message, self.policy.call_timeout)
                .await
        {
            tracing::warn!("registration email for {} not sent: {e}", contest.id());
        }
    }
}
