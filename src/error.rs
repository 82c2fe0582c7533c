//! Error types for the contest watcher.

use crate::model::Platform;
use crate::store::StoreError;

/// Top-level error type for the watcher core.
///
/// The first five variants are the operational taxonomy. Inside a cycle each
/// one is caught where the collaborator failed and turned into stored state
/// (skipped platform, un-sent receipt, failed attempt, `lock_stale` run
/// record) so it never aborts the cycle. Manual registration returns the
/// two registration variants to its caller.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Upstream platform could not return data (error or timeout).
    #[error("fetch unavailable for {platform}: {reason}")]
    FetchUnavailable {
        /// Platform whose adapter failed.
        platform: Platform,
        /// Adapter-supplied reason.
        reason: String,
    },

    /// Notifier failed to deliver a message.
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    /// Permanent registration failure; needs operator intervention.
    #[error("credential error: {0}")]
    CredentialError(String),

    /// Retryable registration or network failure.
    #[error("transient error: {0}")]
    TransientError(String),

    /// A stuck job lock was overridden during crash recovery.
    #[error("stale lock overridden: {0}")]
    LockStale(String),

    /// Contest identity not present in the store.
    #[error("unknown contest: {0}")]
    UnknownContest(String),

    /// Another registration attempt for the contest has not finished yet.
    #[error("registration already in flight: {0}")]
    AttemptInFlight(String),

    /// No adapter or automation wired for the requested platform.
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// State store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    pub fn fetch_unavailable(platform: Platform, reason: impl Into<String>) -> Self {
        Self::FetchUnavailable {
            platform,
            reason: reason.into(),
        }
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::DeliveryFailed(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, WatchError>;
