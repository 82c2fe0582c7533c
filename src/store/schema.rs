//! SQLite DDL for the cpwatch state store.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation.

use rusqlite::Connection;

/// Version stamped into `schema_meta` on first open.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Complete DDL for the state database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Contests, keyed by (platform, external_id). Never deleted.
CREATE TABLE IF NOT EXISTS contests (
    platform          TEXT NOT NULL,
    external_id       TEXT NOT NULL,
    name              TEXT NOT NULL,
    start_time        INTEGER NOT NULL,
    duration_secs     INTEGER NOT NULL DEFAULT 0,
    url               TEXT NOT NULL DEFAULT '',
    registration_open INTEGER NOT NULL DEFAULT 0,
    auto_register     INTEGER NOT NULL DEFAULT 0,
    stale             INTEGER NOT NULL DEFAULT 0,
    first_seen_at     INTEGER NOT NULL,
    updated_at        INTEGER NOT NULL,
    PRIMARY KEY (platform, external_id)
);

CREATE INDEX IF NOT EXISTS idx_contests_start ON contests(start_time);

-- At most one receipt per (contest, kind).
CREATE TABLE IF NOT EXISTS notification_receipts (
    platform    TEXT NOT NULL,
    external_id TEXT NOT NULL,
    kind        TEXT NOT NULL,      -- new | T-24h | T-1h | T-15m | post-contest
    sent_at     INTEGER NOT NULL,
    PRIMARY KEY (platform, external_id, kind)
);

CREATE TABLE IF NOT EXISTS registration_attempts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    platform     TEXT NOT NULL,
    external_id  TEXT NOT NULL,
    status       TEXT NOT NULL,     -- pending | succeeded | failed | skipped
    origin       TEXT NOT NULL,     -- scheduled | manual
    attempted_at INTEGER NOT NULL,
    finished_at  INTEGER,
    failure      TEXT,              -- transient | credential
    error_reason TEXT
);

CREATE INDEX IF NOT EXISTS idx_attempts_contest
    ON registration_attempts(platform, external_id, id);

-- At most one in-flight attempt per contest.
CREATE UNIQUE INDEX IF NOT EXISTS idx_attempts_one_pending
    ON registration_attempts(platform, external_id) WHERE status = 'pending';

-- Append-only; the key makes re-syncing a window a no-op.
CREATE TABLE IF NOT EXISTS submissions (
    platform   TEXT NOT NULL,
    problem_id TEXT NOT NULL,
    tags       TEXT NOT NULL DEFAULT '[]',  -- JSON array of strings
    solved_at  INTEGER NOT NULL,
    verdict    TEXT NOT NULL,
    rating     INTEGER,
    PRIMARY KEY (platform, problem_id, solved_at, verdict)
);

CREATE INDEX IF NOT EXISTS idx_submissions_solved_at ON submissions(solved_at);

CREATE TABLE IF NOT EXISTS rating_history (
    platform    TEXT NOT NULL,
    contest_id  TEXT NOT NULL,
    old_rating  INTEGER NOT NULL,
    new_rating  INTEGER NOT NULL,
    recorded_at INTEGER NOT NULL,
    PRIMARY KEY (platform, contest_id)
);

-- Latest known standing per finished contest.
CREATE TABLE IF NOT EXISTS contest_results (
    platform    TEXT NOT NULL,
    external_id TEXT NOT NULL,
    rank        INTEGER NOT NULL,
    solved      INTEGER NOT NULL,
    penalty     INTEGER,
    old_rating  INTEGER,
    new_rating  INTEGER,
    problems    TEXT NOT NULL DEFAULT '[]',  -- JSON array of per-problem lines
    recorded_at INTEGER NOT NULL,
    PRIMARY KEY (platform, external_id)
);

CREATE INDEX IF NOT EXISTS idx_contest_results_recorded ON contest_results(recorded_at);

-- One row per running job kind.
CREATE TABLE IF NOT EXISTS run_locks (
    job        TEXT PRIMARY KEY,
    holder     TEXT NOT NULL,
    started_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS job_runs (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    job         TEXT NOT NULL,
    started_at  INTEGER NOT NULL,
    finished_at INTEGER NOT NULL,
    outcome     TEXT NOT NULL,
    detail      TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_job_runs_job ON job_runs(job, id);
"#;

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times. Seeds the schema version into
/// `schema_meta` if not already present.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Read the current schema version from the database.
///
/// Returns `None` if the key is missing.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn apply_schema_creates_tables() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("apply_schema");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare")
            .query_map([], |row| row.get(0))
            .expect("query")
            .filter_map(|r| r.ok())
            .collect();

        for table in [
            "contests",
            "notification_receipts",
            "registration_attempts",
            "submissions",
            "rating_history",
            "contest_results",
            "run_locks",
            "job_runs",
            "schema_meta",
        ] {
            assert!(tables.contains(&table.to_owned()), "missing table {table}");
        }
    }

    #[test]
    fn apply_schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("first apply_schema");
        apply_schema(&conn).expect("second apply_schema");
        assert_eq!(
            read_schema_version(&conn).expect("read"),
            Some(CURRENT_SCHEMA_VERSION)
        );
    }

    #[test]
    fn second_pending_attempt_is_rejected_by_index() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("apply_schema");

        let insert = "INSERT INTO registration_attempts \
                      (platform, external_id, status, origin, attempted_at) \
                      VALUES ('codeforces', '1', ?1, 'scheduled', 0)";
        conn.execute(insert, ["pending"]).expect("first pending");
        assert!(conn.execute(insert, ["pending"]).is_err());
        conn.execute(insert, ["failed"]).expect("non-pending rows are unconstrained");
    }

    #[test]
    fn schema_version_not_overwritten_on_reapply() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        apply_schema(&conn).expect("first apply");
        conn.execute(
            "UPDATE schema_meta SET value = '999' WHERE key = 'schema_version'",
            [],
        )
        .expect("bump version");

        apply_schema(&conn).expect("second apply");
        assert_eq!(read_schema_version(&conn).expect("read"), Some(999));
    }
}
