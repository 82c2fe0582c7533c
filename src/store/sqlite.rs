//! SQLite-backed state store.
//!
//! Thread-safe via an internal `Mutex<Connection>`. Cross-process safety
//! (the periodic runner and an on-demand `update_data` may share one file)
//! comes from SQLite itself: receipts and attempts are written with
//! `INSERT OR IGNORE` against their uniqueness keys, and run locks are taken
//! inside an `IMMEDIATE` transaction.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use super::schema::{apply_schema, read_schema_version};
use crate::model::{
    AttemptOrigin, AttemptStatus, ContestId, ContestRecord, ContestResult, FailureKind, JobKind,
    JobRunRecord, NotificationReceipt, ParseEnumError, Platform, RatingChange,
    RegistrationAttempt, ReminderKind, SchedulerRunLock, StoredContest, StoredContestResult,
    SubmissionRecord, epoch, from_epoch,
};

const CONTEST_COLUMNS: &str = "platform, external_id, name, start_time, duration_secs, url, \
                               registration_open, auto_register, stale, first_seen_at, updated_at";

const RESULT_COLUMNS: &str = "platform, external_id, rank, solved, penalty, old_rating, \
                              new_rating, problems, recorded_at";

const ATTEMPT_COLUMNS: &str = "id, platform, external_id, status, origin, attempted_at, \
                               finished_at, failure, error_reason";

/// How long a writer waits on another process's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of reconciling one fetched contest against the stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No stored row shared the identity.
    Inserted,
    /// Start time or registration window changed.
    Changed {
        rescheduled: bool,
        registration_toggled: bool,
    },
    /// Nothing the scheduler cares about changed.
    Unchanged,
}

/// Result of a run-lock compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquisition {
    /// No lock existed; the caller now holds it.
    Acquired,
    /// A stale lock was replaced; the caller now holds it.
    Overridden { previous: SchedulerRunLock },
    /// A live lock is held by someone else.
    Held(SchedulerRunLock),
}

/// SQLite-backed store for every persisted entity.
pub struct StateStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        apply_schema(&conn)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Fresh in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    // -----------------------------------------------------------------------
    // Contests
    // -----------------------------------------------------------------------

    /// Insert or update one fetched contest.
    ///
    /// `auto_register` only applies to newly inserted rows. A changed start
    /// time clears the countdown receipts (`T-24h`, `T-1h`, `T-15m`) for this
    /// identity in the same transaction and revives a stale row; the `new`
    /// receipt is kept.
    pub fn upsert_contest(
        &self,
        record: &ContestRecord,
        auto_register: bool,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let platform = record.platform.as_str();
        let start = epoch(record.start_time);
        let now = epoch(now);

        let existing: Option<(i64, bool)> = tx
            .query_row(
                "SELECT start_time, registration_open FROM contests \
                 WHERE platform = ?1 AND external_id = ?2",
                params![platform, record.external_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                tx.execute(
                    "INSERT INTO contests \
                     (platform, external_id, name, start_time, duration_secs, url, \
                      registration_open, auto_register, stale, first_seen_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
                    params![
                        platform,
                        record.external_id,
                        record.name,
                        start,
                        record.duration_secs,
                        record.url,
                        record.registration_open,
                        auto_register,
                        now
                    ],
                )?;
                UpsertOutcome::Inserted
            }
            Some((old_start, old_open)) => {
                let rescheduled = old_start != start;
                let registration_toggled = old_open != record.registration_open;
                tx.execute(
                    "UPDATE contests SET name = ?3, start_time = ?4, duration_secs = ?5, \
                     url = ?6, registration_open = ?7, \
                     stale = CASE WHEN ?8 THEN 0 ELSE stale END, updated_at = ?9 \
                     WHERE platform = ?1 AND external_id = ?2",
                    params![
                        platform,
                        record.external_id,
                        record.name,
                        start,
                        record.duration_secs,
                        record.url,
                        record.registration_open,
                        rescheduled,
                        now
                    ],
                )?;
                if rescheduled {
                    for kind in ReminderKind::COUNTDOWN {
                        tx.execute(
                            "DELETE FROM notification_receipts \
                             WHERE platform = ?1 AND external_id = ?2 AND kind = ?3",
                            params![platform, record.external_id, kind.as_str()],
                        )?;
                    }
                }
                if rescheduled || registration_toggled {
                    UpsertOutcome::Changed {
                        rescheduled,
                        registration_toggled,
                    }
                } else {
                    UpsertOutcome::Unchanged
                }
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    pub fn contest(&self, id: &ContestId) -> Result<Option<StoredContest>, StoreError> {
        let conn = self.lock()?;
        let sql =
            format!("SELECT {CONTEST_COLUMNS} FROM contests WHERE platform = ?1 AND external_id = ?2");
        Ok(conn
            .query_row(
                &sql,
                params![id.platform.as_str(), id.external_id],
                row_to_contest,
            )
            .optional()?)
    }

    /// Every stored contest, ordered by start time.
    pub fn contests(&self) -> Result<Vec<StoredContest>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {CONTEST_COLUMNS} FROM contests ORDER BY start_time, platform, external_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_contest)?;
        collect_rows(rows)
    }

    /// Non-stale contests starting strictly after `after`, soonest first.
    pub fn active_contests_after(
        &self,
        after: DateTime<Utc>,
    ) -> Result<Vec<StoredContest>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {CONTEST_COLUMNS} FROM contests WHERE stale = 0 AND start_time > ?1 \
             ORDER BY start_time, platform, external_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![epoch(after)], row_to_contest)?;
        collect_rows(rows)
    }

    /// Contests whose end time falls within `[from, to]`, stale or not.
    pub fn contests_ended_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredContest>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {CONTEST_COLUMNS} FROM contests \
             WHERE start_time + duration_secs BETWEEN ?1 AND ?2 \
             ORDER BY start_time, platform, external_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![epoch(from), epoch(to)], row_to_contest)?;
        collect_rows(rows)
    }

    /// Mark contests of `platform` stale when they are missing from a
    /// successful fetch and have already started. Returns the identities
    /// that flipped.
    pub fn mark_stale_absent(
        &self,
        platform: Platform,
        present: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ContestId>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let candidates: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT external_id FROM contests \
                 WHERE platform = ?1 AND stale = 0 AND start_time <= ?2",
            )?;
            let rows = stmt.query_map(params![platform.as_str(), epoch(now)], |row| row.get(0))?;
            collect_rows(rows)?
        };

        let mut flipped = Vec::new();
        for external_id in candidates {
            if present.contains(&external_id) {
                continue;
            }
            tx.execute(
                "UPDATE contests SET stale = 1, updated_at = ?3 \
                 WHERE platform = ?1 AND external_id = ?2",
                params![platform.as_str(), external_id, epoch(now)],
            )?;
            flipped.push(ContestId::new(platform, external_id));
        }
        tx.commit()?;
        Ok(flipped)
    }

    pub fn mark_stale(&self, id: &ContestId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE contests SET stale = 1, updated_at = ?3 \
             WHERE platform = ?1 AND external_id = ?2",
            params![id.platform.as_str(), id.external_id, epoch(now)],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn set_auto_register(&self, id: &ContestId, enabled: bool) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE contests SET auto_register = ?3 WHERE platform = ?1 AND external_id = ?2",
            params![id.platform.as_str(), id.external_id, enabled],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Notification receipts
    // -----------------------------------------------------------------------

    /// Record a delivered notification. Returns `false` when a receipt for
    /// the same (contest, kind) already existed.
    pub fn record_receipt(
        &self,
        id: &ContestId,
        kind: ReminderKind,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "INSERT OR IGNORE INTO notification_receipts (platform, external_id, kind, sent_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id.platform.as_str(),
                id.external_id,
                kind.as_str(),
                epoch(sent_at)
            ],
        )?;
        Ok(rows == 1)
    }

    pub fn has_receipt(&self, id: &ContestId, kind: ReminderKind) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM notification_receipts \
                 WHERE platform = ?1 AND external_id = ?2 AND kind = ?3",
                params![id.platform.as_str(), id.external_id, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Kinds already delivered for one contest.
    pub fn receipt_kinds(&self, id: &ContestId) -> Result<BTreeSet<ReminderKind>, StoreError> {
        Ok(self.receipts(id)?.into_iter().map(|r| r.kind).collect())
    }

    pub fn receipts(&self, id: &ContestId) -> Result<Vec<NotificationReceipt>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT platform, external_id, kind, sent_at FROM notification_receipts \
             WHERE platform = ?1 AND external_id = ?2 ORDER BY sent_at, kind",
        )?;
        let rows = stmt.query_map(
            params![id.platform.as_str(), id.external_id],
            row_to_receipt,
        )?;
        collect_rows(rows)
    }

    // -----------------------------------------------------------------------
    // Registration attempts
    // -----------------------------------------------------------------------

    /// Open a `pending` attempt. Returns `None` when another attempt for the
    /// contest is already pending.
    pub fn begin_attempt(
        &self,
        id: &ContestId,
        origin: AttemptOrigin,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "INSERT OR IGNORE INTO registration_attempts \
             (platform, external_id, status, origin, attempted_at) \
             VALUES (?1, ?2, 'pending', ?3, ?4)",
            params![
                id.platform.as_str(),
                id.external_id,
                origin.as_str(),
                epoch(now)
            ],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        Ok(Some(conn.last_insert_rowid()))
    }

    /// Close a pending attempt.
    pub fn finish_attempt(
        &self,
        attempt_id: i64,
        status: AttemptStatus,
        failure: Option<FailureKind>,
        error_reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RegistrationAttempt, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE registration_attempts \
             SET status = ?2, failure = ?3, error_reason = ?4, finished_at = ?5 \
             WHERE id = ?1 AND status = 'pending'",
            params![
                attempt_id,
                status.as_str(),
                failure.map(FailureKind::as_str),
                error_reason,
                epoch(now)
            ],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("pending attempt {attempt_id}")));
        }
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM registration_attempts WHERE id = ?1");
        Ok(conn.query_row(&sql, params![attempt_id], row_to_attempt)?)
    }

    /// Record a finished `skipped` attempt (no credentials configured).
    pub fn record_skipped(
        &self,
        id: &ContestId,
        origin: AttemptOrigin,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<RegistrationAttempt, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO registration_attempts \
             (platform, external_id, status, origin, attempted_at, finished_at, error_reason) \
             VALUES (?1, ?2, 'skipped', ?3, ?4, ?4, ?5)",
            params![
                id.platform.as_str(),
                id.external_id,
                origin.as_str(),
                epoch(now),
                reason
            ],
        )?;
        let attempt_id = conn.last_insert_rowid();
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM registration_attempts WHERE id = ?1");
        Ok(conn.query_row(&sql, params![attempt_id], row_to_attempt)?)
    }

    /// All attempts for one contest, oldest first.
    pub fn attempts(&self, id: &ContestId) -> Result<Vec<RegistrationAttempt>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM registration_attempts \
             WHERE platform = ?1 AND external_id = ?2 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![id.platform.as_str(), id.external_id], row_to_attempt)?;
        collect_rows(rows)
    }

    /// Most recent attempts across all contests, newest first.
    pub fn recent_attempts(&self, limit: usize) -> Result<Vec<RegistrationAttempt>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM registration_attempts ORDER BY id DESC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit_param(limit)], row_to_attempt)?;
        collect_rows(rows)
    }

    /// Close pending attempts started before `cutoff` as transient failures.
    pub fn abandon_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        Ok(conn.execute(
            "UPDATE registration_attempts \
             SET status = 'failed', failure = 'transient', error_reason = 'abandoned', \
                 finished_at = ?2 \
             WHERE status = 'pending' AND attempted_at < ?1",
            params![epoch(cutoff), epoch(now)],
        )?)
    }

    // -----------------------------------------------------------------------
    // Practice history
    // -----------------------------------------------------------------------

    /// Append submissions, ignoring rows already stored. Returns how many
    /// were new.
    pub fn append_submissions(&self, submissions: &[SubmissionRecord]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO submissions \
                 (platform, problem_id, tags, solved_at, verdict, rating) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for sub in submissions {
                let tags_json = serde_json::to_string(&sub.tags).unwrap_or_else(|_| "[]".to_owned());
                inserted += stmt.execute(params![
                    sub.platform.as_str(),
                    sub.problem_id,
                    tags_json,
                    epoch(sub.solved_at),
                    sub.verdict.as_str(),
                    sub.rating
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Submissions at or after `since`, newest first.
    pub fn submissions_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<SubmissionRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT platform, problem_id, tags, solved_at, verdict, rating FROM submissions \
             WHERE solved_at >= ?1 ORDER BY solved_at DESC, platform, problem_id",
        )?;
        let rows = stmt.query_map(params![epoch(since)], row_to_submission)?;
        collect_rows(rows)
    }

    pub fn latest_submission_at(
        &self,
        platform: Platform,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.lock()?;
        let latest: Option<i64> = conn.query_row(
            "SELECT MAX(solved_at) FROM submissions WHERE platform = ?1",
            params![platform.as_str()],
            |row| row.get(0),
        )?;
        Ok(latest.map(from_epoch))
    }

    /// Insert or refresh a rating change. Returns `true` when it was new.
    pub fn upsert_rating_change(&self, change: &RatingChange) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO rating_history \
             (platform, contest_id, old_rating, new_rating, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                change.platform.as_str(),
                change.contest_id,
                change.old_rating,
                change.new_rating,
                epoch(change.at)
            ],
        )?;
        if inserted == 0 {
            conn.execute(
                "UPDATE rating_history SET old_rating = ?3, new_rating = ?4, recorded_at = ?5 \
                 WHERE platform = ?1 AND contest_id = ?2",
                params![
                    change.platform.as_str(),
                    change.contest_id,
                    change.old_rating,
                    change.new_rating,
                    epoch(change.at)
                ],
            )?;
        }
        Ok(inserted == 1)
    }

    /// Rating history, oldest first, optionally for one platform.
    pub fn rating_history(
        &self,
        platform: Option<Platform>,
    ) -> Result<Vec<RatingChange>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT platform, contest_id, old_rating, new_rating, recorded_at FROM rating_history \
             WHERE ?1 IS NULL OR platform = ?1 ORDER BY recorded_at, contest_id",
        )?;
        let rows = stmt.query_map(params![platform.map(Platform::as_str)], row_to_rating)?;
        collect_rows(rows)
    }

    // -----------------------------------------------------------------------
    // Contest results
    // -----------------------------------------------------------------------

    /// Insert or replace the stored result for a contest.
    pub fn upsert_contest_result(
        &self,
        id: &ContestId,
        result: &ContestResult,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let problems = serde_json::to_string(&result.problems).unwrap_or_else(|_| "[]".to_owned());
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO contest_results \
             (platform, external_id, rank, solved, penalty, old_rating, new_rating, problems, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(platform, external_id) DO UPDATE SET \
             rank = excluded.rank, solved = excluded.solved, penalty = excluded.penalty, \
             old_rating = excluded.old_rating, new_rating = excluded.new_rating, \
             problems = excluded.problems, recorded_at = excluded.recorded_at",
            params![
                id.platform.as_str(),
                id.external_id,
                result.rank,
                result.solved,
                result.penalty,
                result.old_rating,
                result.new_rating,
                problems,
                epoch(now)
            ],
        )?;
        Ok(())
    }

    pub fn contest_result(&self, id: &ContestId) -> Result<Option<StoredContestResult>, StoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM contest_results \
                     WHERE platform = ?1 AND external_id = ?2"
                ),
                params![id.platform.as_str(), id.external_id],
                row_to_result,
            )
            .optional()?)
    }

    /// Most recently recorded results, newest first.
    pub fn recent_contest_results(
        &self,
        limit: usize,
    ) -> Result<Vec<StoredContestResult>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RESULT_COLUMNS} FROM contest_results \
             ORDER BY recorded_at DESC, platform, external_id LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit_param(limit)], row_to_result)?;
        collect_rows(rows)
    }

    // -----------------------------------------------------------------------
    // Run locks and job history
    // -----------------------------------------------------------------------

    /// Atomically take the run lock for `job`.
    ///
    /// An existing lock whose `started_at` is before `stale_before` is
    /// replaced and returned as [`LockAcquisition::Overridden`].
    pub fn try_acquire_lock(
        &self,
        job: JobKind,
        holder: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<LockAcquisition, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing = tx
            .query_row(
                "SELECT job, holder, started_at FROM run_locks WHERE job = ?1",
                params![job.as_str()],
                row_to_lock,
            )
            .optional()?;

        let acquisition = match existing {
            None => {
                tx.execute(
                    "INSERT INTO run_locks (job, holder, started_at) VALUES (?1, ?2, ?3)",
                    params![job.as_str(), holder, epoch(now)],
                )?;
                LockAcquisition::Acquired
            }
            Some(previous) if previous.started_at < stale_before => {
                tx.execute(
                    "UPDATE run_locks SET holder = ?2, started_at = ?3 WHERE job = ?1",
                    params![job.as_str(), holder, epoch(now)],
                )?;
                LockAcquisition::Overridden { previous }
            }
            Some(current) => LockAcquisition::Held(current),
        };

        tx.commit()?;
        Ok(acquisition)
    }

    /// Release the lock for `job` if `holder` still owns it.
    pub fn release_lock(&self, job: JobKind, holder: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM run_locks WHERE job = ?1 AND holder = ?2",
            params![job.as_str(), holder],
        )?;
        Ok(rows == 1)
    }

    pub fn current_lock(&self, job: JobKind) -> Result<Option<SchedulerRunLock>, StoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT job, holder, started_at FROM run_locks WHERE job = ?1",
                params![job.as_str()],
                row_to_lock,
            )
            .optional()?)
    }

    /// Append a job-run record, keeping at most `keep` rows for its kind.
    pub fn record_job_run(&self, run: &JobRunRecord, keep: usize) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO job_runs (job, started_at, finished_at, outcome, detail) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.job.as_str(),
                epoch(run.started_at),
                epoch(run.finished_at),
                run.outcome.as_str(),
                run.detail
            ],
        )?;
        tx.execute(
            "DELETE FROM job_runs WHERE job = ?1 AND id NOT IN \
             (SELECT id FROM job_runs WHERE job = ?1 ORDER BY id DESC LIMIT ?2)",
            params![run.job.as_str(), limit_param(keep)],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Most recent runs of `job`, newest first.
    pub fn job_runs(&self, job: JobKind, limit: usize) -> Result<Vec<JobRunRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT job, started_at, finished_at, outcome, detail FROM job_runs \
             WHERE job = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![job.as_str(), limit_param(limit)], row_to_job_run)?;
        collect_rows(rows)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

/// Errors from the SQLite state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("lock poisoned: {0}")]
    Lock(String),
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn parse_col<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_opt_col<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = ParseEnumError>,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse::<T>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn row_to_contest(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredContest> {
    Ok(StoredContest {
        record: ContestRecord {
            platform: parse_col(row, 0)?,
            external_id: row.get(1)?,
            name: row.get(2)?,
            start_time: from_epoch(row.get(3)?),
            duration_secs: row.get(4)?,
            url: row.get(5)?,
            registration_open: row.get(6)?,
        },
        auto_register: row.get(7)?,
        stale: row.get(8)?,
        first_seen_at: from_epoch(row.get(9)?),
        updated_at: from_epoch(row.get(10)?),
    })
}

fn row_to_receipt(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationReceipt> {
    Ok(NotificationReceipt {
        contest: ContestId::new(parse_col(row, 0)?, row.get::<_, String>(1)?),
        kind: parse_col(row, 2)?,
        sent_at: from_epoch(row.get(3)?),
    })
}

fn row_to_attempt(row: &rusqlite::Row<'_>) -> rusqlite::Result<RegistrationAttempt> {
    let finished_at: Option<i64> = row.get(6)?;
    Ok(RegistrationAttempt {
        id: row.get(0)?,
        contest: ContestId::new(parse_col(row, 1)?, row.get::<_, String>(2)?),
        status: parse_col(row, 3)?,
        origin: parse_col(row, 4)?,
        attempted_at: from_epoch(row.get(5)?),
        finished_at: finished_at.map(from_epoch),
        failure: parse_opt_col(row, 7)?,
        error_reason: row.get(8)?,
    })
}

fn row_to_submission(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubmissionRecord> {
    let tags_json: String = row.get(2)?;
    Ok(SubmissionRecord {
        platform: parse_col(row, 0)?,
        problem_id: row.get(1)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        solved_at: from_epoch(row.get(3)?),
        verdict: parse_col(row, 4)?,
        rating: row.get(5)?,
    })
}

fn row_to_rating(row: &rusqlite::Row<'_>) -> rusqlite::Result<RatingChange> {
    Ok(RatingChange {
        platform: parse_col(row, 0)?,
        contest_id: row.get(1)?,
        old_rating: row.get(2)?,
        new_rating: row.get(3)?,
        at: from_epoch(row.get(4)?),
    })
}

fn row_to_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredContestResult> {
    let problems_json: String = row.get(7)?;
    Ok(StoredContestResult {
        contest: ContestId::new(parse_col(row, 0)?, row.get::<_, String>(1)?),
        result: ContestResult {
            rank: row.get(2)?,
            solved: row.get(3)?,
            penalty: row.get(4)?,
            old_rating: row.get(5)?,
            new_rating: row.get(6)?,
            problems: serde_json::from_str(&problems_json).unwrap_or_default(),
        },
        recorded_at: from_epoch(row.get(8)?),
    })
}

fn row_to_lock(row: &rusqlite::Row<'_>) -> rusqlite::Result<SchedulerRunLock> {
    Ok(SchedulerRunLock {
        job: parse_col(row, 0)?,
        holder: row.get(1)?,
        started_at: from_epoch(row.get(2)?),
    })
}

fn row_to_job_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRunRecord> {
    Ok(JobRunRecord {
        job: parse_col(row, 0)?,
        started_at: from_epoch(row.get(1)?),
        finished_at: from_epoch(row.get(2)?),
        outcome: parse_col(row, 3)?,
        detail: row.get(4)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
