//! Collaborator contracts: platform data adapters and registration automation.
//!
//! HTTP/scraping clients and the browser login flow live outside this crate.
//! They hand the core normalized records through these traits.

use crate::model::{ContestRecord, ContestResult, Platform, RatingChange, SubmissionRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

/// Source of contest and practice data for one or more platforms.
///
/// Implementations are constructed knowing the user's handle.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Upcoming (and possibly running) contests on `platform`.
    async fn fetch_contests(&self, platform: Platform) -> anyhow::Result<Vec<ContestRecord>>;

    /// The user's submissions, optionally only those at or after `since`.
    async fn fetch_submissions(
        &self,
        platform: Platform,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<SubmissionRecord>>;

    /// Rated-contest history.
    async fn fetch_rating_changes(&self, _platform: Platform) -> anyhow::Result<Vec<RatingChange>> {
        Ok(Vec::new())
    }

    /// The user's standing in a finished contest, `None` if they did not
    /// take part or results are not published yet.
    async fn fetch_contest_result(
        &self,
        _platform: Platform,
        _external_id: &str,
    ) -> anyhow::Result<Option<ContestResult>> {
        Ok(None)
    }
}

/// Platform login used by registration automation.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What the automation reports back for one registration attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered,
    AlreadyRegistered,
    /// Network trouble, rate limit, page timeout. Retryable.
    TransientError(String),
    /// Login rejected. Not retried until an operator fixes credentials.
    CredentialError(String),
}

/// Opaque capability that signs the user up for a contest.
#[async_trait]
pub trait RegistrationAutomation: Send + Sync {
    async fn attempt_register(
        &self,
        platform: Platform,
        contest_id: &str,
        credentials: &Credentials,
    ) -> RegistrationOutcome;
}
