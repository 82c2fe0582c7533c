//! Durable state for the watcher.
//!
//! A single SQLite database owns every entity: contests, notification
//! receipts, registration attempts, submissions, rating history, run locks
//! and job-run history. Components read and write through [`StateStore`]
//! and cache nothing beyond one operation.

mod schema;
mod sqlite;

pub use schema::CURRENT_SCHEMA_VERSION;
pub use sqlite::{LockAcquisition, StateStore, StoreError, UpsertOutcome};
