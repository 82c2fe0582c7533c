//! Configuration types for the contest watcher.
//!
//! Loaded from TOML (every section is `#[serde(default)]`), then overlaid
//! with the `.env`-style keys the deployment uses, then validated once at
//! startup.

use crate::adapters::Credentials;
use crate::error::{Result, WatchError};
use crate::model::{JobKind, Platform, ReminderKind};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest duration any `*_secs` setting may hold (ten years).
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 86_400;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// State database location.
    pub store: StoreConfig,
    /// Outgoing email.
    pub smtp: SmtpConfig,
    /// User handles on each platform.
    pub platforms: PlatformsConfig,
    /// Automatic registration policy and credentials.
    pub registration: RegistrationConfig,
    /// Reminder thresholds.
    pub reminders: RemindersConfig,
    /// Job periods and timeouts.
    pub scheduler: SchedulerConfig,
    /// IANA zone every email renders times in.
    pub timezone: String,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            smtp: SmtpConfig::default(),
            platforms: PlatformsConfig::default(),
            registration: RegistrationConfig::default(),
            reminders: RemindersConfig::default(),
            scheduler: SchedulerConfig::default(),
            timezone: "UTC".to_owned(),
            log_level: "info".to_owned(),
        }
    }
}

/// State store location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file path or `sqlite://` URI. Empty means the default
    /// database under the data directory.
    pub uri: String,
}

/// SMTP settings for the default notifier.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Sender address. Falls back to `user` when unset.
    pub from: Option<String>,
    /// Recipient of every notification.
    pub notification_email: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_owned(),
            port: 587,
            user: String::new(),
            password: String::new(),
            from: None,
            notification_email: String::new(),
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &redact(&self.password))
            .field("from", &self.from)
            .field("notification_email", &self.notification_email)
            .finish()
    }
}

impl SmtpConfig {
    /// Address used in the `From:` header.
    #[must_use]
    pub fn sender(&self) -> &str {
        self.from.as_deref().unwrap_or(&self.user)
    }
}

/// User identity on each platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformsConfig {
    pub codeforces_handle: Option<String>,
    pub leetcode_username: Option<String>,
}

impl PlatformsConfig {
    #[must_use]
    pub fn handle_for(&self, platform: Platform) -> Option<&str> {
        let handle = match platform {
            Platform::Codeforces => self.codeforces_handle.as_deref(),
            Platform::Leetcode => self.leetcode_username.as_deref(),
        };
        handle.filter(|h| !h.trim().is_empty())
    }

    /// Platforms with a configured handle, in canonical order.
    #[must_use]
    pub fn configured(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.handle_for(*p).is_some())
            .collect()
    }
}

/// Automatic registration policy.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Failed attempts allowed per contest before giving up.
    pub max_attempts: u32,
    /// New contests on these platforms start with `auto_register = true`.
    pub auto_register_platforms: Vec<Platform>,
    pub codeforces_password: Option<String>,
    pub leetcode_password: Option<String>,
    /// Pending attempts older than this are closed as abandoned.
    pub stale_attempt_secs: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            auto_register_platforms: Vec::new(),
            codeforces_password: None,
            leetcode_password: None,
            stale_attempt_secs: 1800,
        }
    }
}

impl fmt::Debug for RegistrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationConfig")
            .field("max_attempts", &self.max_attempts)
            .field("auto_register_platforms", &self.auto_register_platforms)
            .field(
                "codeforces_password",
                &self.codeforces_password.as_deref().map(redact),
            )
            .field(
                "leetcode_password",
                &self.leetcode_password.as_deref().map(redact),
            )
            .field("stale_attempt_secs", &self.stale_attempt_secs)
            .finish()
    }
}

impl RegistrationConfig {
    #[must_use]
    pub fn password_for(&self, platform: Platform) -> Option<&str> {
        let password = match platform {
            Platform::Codeforces => self.codeforces_password.as_deref(),
            Platform::Leetcode => self.leetcode_password.as_deref(),
        };
        password.filter(|p| !p.is_empty())
    }

    #[must_use]
    pub fn auto_registers(&self, platform: Platform) -> bool {
        self.auto_register_platforms.contains(&platform)
    }
}

/// Reminder thresholds, in seconds before contest start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemindersConfig {
    /// Kinds emitted by the notification scheduler.
    pub enabled: Vec<ReminderKind>,
    pub day_before_secs: u64,
    pub hour_before_secs: u64,
    pub quarter_hour_before_secs: u64,
    /// Contests that started less than this long ago are still candidates.
    pub grace_secs: u64,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            enabled: ReminderKind::REMINDERS.to_vec(),
            day_before_secs: 86_400,
            hour_before_secs: 3_600,
            quarter_hour_before_secs: 900,
            grace_secs: 300,
        }
    }
}

/// Job periods and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub contest_check_secs: u64,
    pub practice_sync_secs: u64,
    pub post_contest_secs: u64,
    /// A run lock older than this may be overridden.
    pub stale_lock_secs: u64,
    /// Upper bound on every adapter, notifier and automation call.
    pub call_timeout_secs: u64,
    /// Wait after a contest ends before asking for results.
    pub post_contest_delay_secs: u64,
    /// Ended contests older than this are no longer swept.
    pub post_contest_lookback_secs: u64,
    /// Job-run history rows kept per job kind.
    pub history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            contest_check_secs: 1_800,
            practice_sync_secs: 21_600,
            post_contest_secs: 3_600,
            stale_lock_secs: 3_600,
            call_timeout_secs: 30,
            post_contest_delay_secs: 3_600,
            post_contest_lookback_secs: 7 * 86_400,
            history_limit: 400,
        }
    }
}

impl SchedulerConfig {
    /// Period between runs of `job`.
    #[must_use]
    pub fn period(&self, job: JobKind) -> Duration {
        let secs = match job {
            JobKind::ContestCheck => self.contest_check_secs,
            JobKind::PracticeSync => self.practice_sync_secs,
            JobKind::PostContest => self.post_contest_secs,
        };
        Duration::from_secs(secs)
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl WatchConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| WatchError::config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| WatchError::config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `config_dir()/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::config_file()
    }

    /// Read `path` if it exists (defaults otherwise), overlay the process
    /// environment and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("no config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from `.env`-style keys.
    ///
    /// `lookup` returns the raw value for a key; empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(uri) = get("CPWATCH_DB").or_else(|| get("MONGODB_URI")) {
            self.store.uri = uri;
        }
        if let Some(host) = get("SMTP_HOST") {
            self.smtp.host = host;
        }
        if let Some(port) = get("SMTP_PORT") {
            self.smtp.port = port
                .trim()
                .parse()
                .map_err(|_| WatchError::config(format!("SMTP_PORT is not a port: {port}")))?;
        }
        if let Some(user) = get("SMTP_USER") {
            self.smtp.user = user;
        }
        if let Some(password) = get("SMTP_PASSWORD") {
            self.smtp.password = password;
        }
        if let Some(email) = get("NOTIFICATION_EMAIL") {
            self.smtp.notification_email = email;
        }
        if let Some(handle) = get("CODEFORCES_HANDLE") {
            self.platforms.codeforces_handle = Some(handle);
        }
        if let Some(username) = get("LEETCODE_USERNAME") {
            self.platforms.leetcode_username = Some(username);
        }
        if let Some(password) = get("CODEFORCES_PASSWORD") {
            self.registration.codeforces_password = Some(password);
        }
        if let Some(password) = get("LEETCODE_PASSWORD") {
            self.registration.leetcode_password = Some(password);
        }
        if let Some(zone) = get("TIMEZONE").or_else(|| get("USER_TIMEZONE")) {
            self.timezone = zone.trim().to_owned();
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.log_level = level.to_ascii_lowercase();
        }
        Ok(())
    }

    /// Check invariants the rest of the crate relies on.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Config`] listing every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if let Err(e) = self.database_path() {
            problems.push(e.to_string());
        }
        if let Err(e) = self.time_zone() {
            problems.push(e.to_string());
        }
        if self.smtp.port == 0 {
            problems.push("smtp.port must be non-zero".to_owned());
        }
        let email = self.smtp.notification_email.trim();
        if !email.is_empty() && !email.contains('@') {
            problems.push(format!("notification email is not an address: {email}"));
        }
        if self.registration.max_attempts == 0 {
            problems.push("registration.max_attempts must be at least 1".to_owned());
        }
        if self.registration.stale_attempt_secs == 0 {
            problems.push("registration.stale_attempt_secs must be non-zero".to_owned());
        }
        for platform in Platform::ALL {
            if self.registration.password_for(platform).is_some()
                && self.platforms.handle_for(platform).is_none()
            {
                problems.push(format!("{platform} password set without a {platform} handle"));
            }
        }

        let r = &self.reminders;
        if r.quarter_hour_before_secs == 0 || r.hour_before_secs == 0 || r.day_before_secs == 0 {
            problems.push("reminder thresholds must be non-zero".to_owned());
        }
        if r.enabled.contains(&ReminderKind::PostContest) {
            problems.push("post-contest is not a reminder kind".to_owned());
        }

        let s = &self.scheduler;
        for job in JobKind::ALL {
            if s.period(job).is_zero() {
                problems.push(format!("scheduler period for {job} must be non-zero"));
            }
        }
        if s.call_timeout_secs == 0 {
            problems.push("scheduler.call_timeout_secs must be non-zero".to_owned());
        }
        if s.stale_lock_secs <= s.call_timeout_secs {
            problems.push("scheduler.stale_lock_secs must exceed call_timeout_secs".to_owned());
        }
        if s.history_limit == 0 {
            problems.push("scheduler.history_limit must be non-zero".to_owned());
        }

        for (key, value) in self.durations() {
            if value > MAX_DURATION_SECS {
                problems.push(format!("{key} must be at most {MAX_DURATION_SECS} seconds"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(WatchError::config(problems.join("; ")))
        }
    }

    fn durations(&self) -> [(&'static str, u64); 12] {
        let (r, s) = (&self.reminders, &self.scheduler);
        [
            ("registration.stale_attempt_secs", self.registration.stale_attempt_secs),
            ("reminders.day_before_secs", r.day_before_secs),
            ("reminders.hour_before_secs", r.hour_before_secs),
            ("reminders.quarter_hour_before_secs", r.quarter_hour_before_secs),
            ("reminders.grace_secs", r.grace_secs),
            ("scheduler.contest_check_secs", s.contest_check_secs),
            ("scheduler.practice_sync_secs", s.practice_sync_secs),
            ("scheduler.post_contest_secs", s.post_contest_secs),
            ("scheduler.stale_lock_secs", s.stale_lock_secs),
            ("scheduler.call_timeout_secs", s.call_timeout_secs),
            ("scheduler.post_contest_delay_secs", s.post_contest_delay_secs),
            ("scheduler.post_contest_lookback_secs", s.post_contest_lookback_secs),
        ]
    }

    /// Resolve `store.uri` to a database file.
    pub fn database_path(&self) -> Result<PathBuf> {
        let uri = self.store.uri.trim();
        if uri.is_empty() {
            return Ok(crate::app_dirs::database_file());
        }
        if uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://") {
            return Err(WatchError::config(
                "store.uri points at MongoDB; only SQLite paths are supported",
            ));
        }
        let path = uri.strip_prefix("sqlite://").unwrap_or(uri);
        if path.is_empty() {
            return Err(WatchError::config("store.uri has an empty sqlite path"));
        }
        Ok(PathBuf::from(path))
    }

    /// Parsed [`timezone`](Self::timezone). Empty means UTC.
    pub fn time_zone(&self) -> Result<Tz> {
        let name = self.timezone.trim();
        if name.is_empty() {
            return Ok(Tz::UTC);
        }
        name.parse::<Tz>()
            .map_err(|_| WatchError::config(format!("unknown timezone: {name}")))
    }

    /// Login for automated registration, when both halves are configured.
    #[must_use]
    pub fn credentials_for(&self, platform: Platform) -> Option<Credentials> {
        let username = self.platforms.handle_for(platform)?;
        let password = self.registration.password_for(platform)?;
        Some(Credentials::new(username, password))
    }

    /// Recipient for notifications, `None` when unset.
    #[must_use]
    pub fn recipient(&self) -> Option<&str> {
        let email = self.smtp.notification_email.trim();
        (!email.is_empty()).then_some(email)
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "<redacted>" }
}
