//! Shared fakes and fixtures for integration tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use cpwatch::adapters::{Credentials, PlatformAdapter, RegistrationAutomation, RegistrationOutcome};
use cpwatch::model::{ContestResult, ContestRecord, Platform, RatingChange, SubmissionRecord};
use cpwatch::{Notifier, StateStore, WatchConfig, Watcher};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) const RECIPIENT: &str = "me@example.com";

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()
}

pub(crate) fn cf_contest(id: &str, start: DateTime<Utc>) -> ContestRecord {
    ContestRecord {
        platform: Platform::Codeforces,
        external_id: id.to_owned(),
        name: format!("Codeforces Round {id}"),
        start_time: start,
        duration_secs: 7200,
        url: format!("https://codeforces.com/contest/{id}"),
        registration_open: true,
    }
}

/// Config with a recipient and a Codeforces handle, no auto-registration.
pub(crate) fn base_config() -> WatchConfig {
    let mut config = WatchConfig::default();
    config.smtp.notification_email = RECIPIENT.to_owned();
    config.platforms.codeforces_handle = Some("tourist".to_owned());
    config.scheduler.call_timeout_secs = 2;
    config
}

/// `base_config` plus Codeforces credentials and auto-registration.
pub(crate) fn registering_config() -> WatchConfig {
    let mut config = base_config();
    config.registration.codeforces_password = Some("hunter2".to_owned());
    config.registration.auto_register_platforms = vec![Platform::Codeforces];
    config
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct FakeAdapter {
    contests: Mutex<Vec<ContestRecord>>,
    contests_down: AtomicBool,
    submissions: Mutex<Vec<SubmissionRecord>>,
    ratings: Mutex<Vec<RatingChange>>,
    results: Mutex<BTreeMap<String, ContestResult>>,
    since_seen: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl FakeAdapter {
    pub(crate) fn set_contests(&self, contests: Vec<ContestRecord>) {
        *self.contests.lock().unwrap() = contests;
    }

    pub(crate) fn set_contests_down(&self, down: bool) {
        self.contests_down.store(down, Ordering::SeqCst);
    }

    pub(crate) fn set_submissions(&self, submissions: Vec<SubmissionRecord>) {
        *self.submissions.lock().unwrap() = submissions;
    }

    pub(crate) fn set_ratings(&self, ratings: Vec<RatingChange>) {
        *self.ratings.lock().unwrap() = ratings;
    }

    pub(crate) fn set_result(&self, external_id: &str, result: ContestResult) {
        self.results
            .lock()
            .unwrap()
            .insert(external_id.to_owned(), result);
    }

    /// `since` arguments passed to `fetch_submissions`, in call order.
    pub(crate) fn since_seen(&self) -> Vec<Option<DateTime<Utc>>> {
        self.since_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformAdapter for FakeAdapter {
    async fn fetch_contests(&self, _platform: Platform) -> anyhow::Result<Vec<ContestRecord>> {
        if self.contests_down.load(Ordering::SeqCst) {
            anyhow::bail!("HTTP 503 from contest.list");
        }
        Ok(self.contests.lock().unwrap().clone())
    }

    async fn fetch_submissions(
        &self,
        _platform: Platform,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<SubmissionRecord>> {
        self.since_seen.lock().unwrap().push(since);
        Ok(self.submissions.lock().unwrap().clone())
    }

    async fn fetch_rating_changes(&self, _platform: Platform) -> anyhow::Result<Vec<RatingChange>> {
        Ok(self.ratings.lock().unwrap().clone())
    }

    async fn fetch_contest_result(
        &self,
        _platform: Platform,
        external_id: &str,
    ) -> anyhow::Result<Option<ContestResult>> {
        Ok(self.results.lock().unwrap().get(external_id).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentMail {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<SentMail>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.subject.clone())
            .collect()
    }

    pub(crate) fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        self.sent.lock().unwrap().push(SentMail {
            recipient: recipient.to_owned(),
            subject: subject.to_owned(),
            body: body.to_owned(),
        });
        Ok(())
    }
}

/// Plays back queued outcomes, then `Registered` once the queue is empty.
#[derive(Default)]
pub(crate) struct ScriptedAutomation {
    script: Mutex<VecDeque<RegistrationOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedAutomation {
    pub(crate) fn push(&self, outcome: RegistrationOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistrationAutomation for ScriptedAutomation {
    async fn attempt_register(
        &self,
        _platform: Platform,
        _contest_id: &str,
        _credentials: &Credentials,
    ) -> RegistrationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RegistrationOutcome::Registered)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub(crate) struct Harness {
    pub watcher: Watcher,
    pub store: Arc<StateStore>,
    pub adapter: Arc<FakeAdapter>,
    pub notifier: Arc<RecordingNotifier>,
    pub automation: Arc<ScriptedAutomation>,
}

impl Harness {
    pub(crate) fn new(config: WatchConfig) -> Self {
        Self::on_store(config, Arc::new(StateStore::open_in_memory().unwrap()))
    }

    pub(crate) fn on_store(config: WatchConfig, store: Arc<StateStore>) -> Self {
        let adapter = Arc::new(FakeAdapter::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let automation = Arc::new(ScriptedAutomation::default());
        let watcher = Watcher::new(config, Arc::clone(&store), notifier.clone())
            .with_adapter(Platform::Codeforces, adapter.clone())
            .with_automation(automation.clone());
        Self {
            watcher,
            store,
            adapter,
            notifier,
            automation,
        }
    }
}
