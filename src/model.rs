//! Domain records shared by the store and the scheduling core.
//!
//! Everything here is plain data. Timestamps are `DateTime<Utc>` in memory
//! and whole epoch seconds on disk; [`epoch`] and [`from_epoch`] convert.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

/// Whole epoch seconds for storage.
#[must_use]
pub fn epoch(t: DateTime<Utc>) -> i64 {
    t.timestamp()
}

/// `now - delta`, saturating at the earliest representable instant.
#[must_use]
pub fn before(now: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Inverse of [`epoch`]. Out-of-range values collapse to the Unix epoch.
#[must_use]
pub fn from_epoch(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default()
}

/// Parse failure for the string forms of the enums below.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized {what}: {value}")]
pub struct ParseEnumError {
    what: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Platforms and contest identity
// ---------------------------------------------------------------------------

/// A supported contest platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Codeforces,
    Leetcode,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Codeforces, Platform::Leetcode];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Codeforces => "codeforces",
            Self::Leetcode => "leetcode",
        }
    }

    /// Human-facing name used in emails.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Codeforces => "Codeforces",
            Self::Leetcode => "LeetCode",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "codeforces" | "cf" => Ok(Self::Codeforces),
            "leetcode" | "lc" => Ok(Self::Leetcode),
            _ => Err(ParseEnumError::new("platform", s)),
        }
    }
}

/// Stable contest identity across fetch cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContestId {
    pub platform: Platform,
    pub external_id: String,
}

impl ContestId {
    pub fn new(platform: Platform, external_id: impl Into<String>) -> Self {
        Self {
            platform,
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for ContestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.external_id)
    }
}

/// Normalized contest as handed over by a platform adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestRecord {
    pub platform: Platform,
    pub external_id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub duration_secs: i64,
    pub url: String,
    pub registration_open: bool,
}

impl ContestRecord {
    #[must_use]
    pub fn id(&self) -> ContestId {
        ContestId::new(self.platform, self.external_id.clone())
    }

    #[must_use]
    pub fn end_time(&self) -> DateTime<Utc> {
        TimeDelta::try_seconds(self.duration_secs.max(0))
            .and_then(|d| self.start_time.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// A contest row together with the bookkeeping columns the store keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredContest {
    pub record: ContestRecord,
    /// Flagged for automatic registration.
    pub auto_register: bool,
    /// Absent from a fetch after it started, or already reported on.
    pub stale: bool,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Kind of notification tracked by a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReminderKind {
    /// Contest announced.
    #[serde(rename = "new")]
    New,
    #[serde(rename = "T-24h")]
    DayBefore,
    #[serde(rename = "T-1h")]
    HourBefore,
    #[serde(rename = "T-15m")]
    QuarterHourBefore,
    /// Result report after the contest ended.
    #[serde(rename = "post-contest")]
    PostContest,
}

impl ReminderKind {
    /// Kinds driven by the notification scheduler, in evaluation order.
    pub const REMINDERS: [ReminderKind; 4] = [
        ReminderKind::New,
        ReminderKind::DayBefore,
        ReminderKind::HourBefore,
        ReminderKind::QuarterHourBefore,
    ];

    /// Kinds that are re-armed when a contest is rescheduled.
    pub const COUNTDOWN: [ReminderKind; 3] = [
        ReminderKind::DayBefore,
        ReminderKind::HourBefore,
        ReminderKind::QuarterHourBefore,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::DayBefore => "T-24h",
            Self::HourBefore => "T-1h",
            Self::QuarterHourBefore => "T-15m",
            Self::PostContest => "post-contest",
        }
    }
}

impl fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "new" | "new_contest" => Ok(Self::New),
            "T-24h" | "24h" => Ok(Self::DayBefore),
            "T-1h" | "1h" => Ok(Self::HourBefore),
            "T-15m" | "15m" => Ok(Self::QuarterHourBefore),
            "post-contest" | "post_contest" => Ok(Self::PostContest),
            _ => Err(ParseEnumError::new("reminder kind", s)),
        }
    }
}

/// Proof that a notification was delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationReceipt {
    pub contest: ContestId,
    pub kind: ReminderKind,
    pub sent_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Succeeded,
    Failed,
    Skipped,
}

impl AttemptStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl FromStr for AttemptStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(ParseEnumError::new("attempt status", s)),
        }
    }
}

/// Why a failed attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Network/timeout; eligible for retry.
    Transient,
    /// Bad or expired credentials; never retried automatically.
    Credential,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Credential => "credential",
        }
    }
}

impl FromStr for FailureKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(Self::Transient),
            "credential" => Ok(Self::Credential),
            _ => Err(ParseEnumError::new("failure kind", s)),
        }
    }
}

/// What started an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOrigin {
    Scheduled,
    Manual,
}

impl AttemptOrigin {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for AttemptOrigin {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "manual" => Ok(Self::Manual),
            _ => Err(ParseEnumError::new("attempt origin", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationAttempt {
    pub id: i64,
    pub contest: ContestId,
    pub status: AttemptStatus,
    pub origin: AttemptOrigin,
    pub attempted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure: Option<FailureKind>,
    pub error_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Practice history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accepted,
    Rejected,
}

impl Verdict {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

impl FromStr for Verdict {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" | "OK" | "AC" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            _ => Err(ParseEnumError::new("verdict", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub platform: Platform,
    pub problem_id: String,
    pub tags: BTreeSet<String>,
    pub solved_at: DateTime<Utc>,
    pub verdict: Verdict,
    /// Problem difficulty on the Codeforces scale, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingChange {
    pub platform: Platform,
    pub contest_id: String,
    pub old_rating: i32,
    pub new_rating: i32,
    pub at: DateTime<Utc>,
}

/// User's standing in a finished contest, as reported by an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestResult {
    pub rank: u32,
    pub solved: u32,
    #[serde(default)]
    pub penalty: Option<i64>,
    #[serde(default)]
    pub old_rating: Option<i32>,
    #[serde(default)]
    pub new_rating: Option<i32>,
    /// Per-problem breakdown, when the platform publishes one.
    #[serde(default)]
    pub problems: Vec<ProblemResult>,
}

/// One problem's line in a [`ContestResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemResult {
    /// Problem label within the contest ("A", "B1", "Q3").
    pub index: String,
    pub solved: bool,
    /// Seconds from contest start to the accepted submission.
    #[serde(default)]
    pub solved_after_secs: Option<i64>,
    #[serde(default)]
    pub rejected_attempts: u32,
}

/// A contest result kept by the post-contest sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredContestResult {
    pub contest: ContestId,
    #[serde(flatten)]
    pub result: ContestResult,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Scheduler jobs
// ---------------------------------------------------------------------------

/// Recurring job kinds driven by the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    ContestCheck,
    PracticeSync,
    PostContest,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        JobKind::ContestCheck,
        JobKind::PracticeSync,
        JobKind::PostContest,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContestCheck => "contest-check",
            Self::PracticeSync => "practice-sync",
            Self::PostContest => "post-contest",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contest-check" => Ok(Self::ContestCheck),
            "practice-sync" => Ok(Self::PracticeSync),
            "post-contest" => Ok(Self::PostContest),
            _ => Err(ParseEnumError::new("job kind", s)),
        }
    }
}

/// Marker row held while a job kind is executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerRunLock {
    pub job: JobKind,
    pub holder: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Failed,
    Panicked,
    /// Another holder owned the run lock; nothing ran.
    Skipped,
    /// A stale lock was overridden before this run.
    LockStale,
}

impl JobOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Panicked => "panicked",
            Self::Skipped => "skipped",
            Self::LockStale => "lock_stale",
        }
    }
}

impl FromStr for JobOutcome {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "panicked" => Ok(Self::Panicked),
            "skipped" => Ok(Self::Skipped),
            "lock_stale" => Ok(Self::LockStale),
            _ => Err(ParseEnumError::new("job outcome", s)),
        }
    }
}

/// One entry of job-run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRunRecord {
    pub job: JobKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: JobOutcome,
    pub detail: String,
}
