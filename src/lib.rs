//! cpwatch: contest monitor for competitive programming platforms.
//!
//! Watches Codeforces and LeetCode for upcoming contests and the user's
//! practice history, then drives reminders, automated registration and
//! practice analytics from a single SQLite state store.
//!
//! # Architecture
//!
//! - **Adapters**: platform data and registration automation are injected
//!   through [`adapters::PlatformAdapter`] and
//!   [`adapters::RegistrationAutomation`]
//! - **Registry**: reconciles fetched contests into the store
//! - **Reminders**: at-most-once reminder delivery through [`notify::Notifier`]
//! - **Registration**: attempt bookkeeping with a retry budget
//! - **Scheduler**: periodic job kinds serialized by stored run locks
//! - **Dashboard**: read-only snapshots
//! - **Service**: [`Watcher`] wires everything together

pub mod adapters;
pub mod analytics;
pub mod app_dirs;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod model;
pub mod notify;
pub mod registration;
pub mod registry;
pub mod reminders;
pub mod scheduler;
pub mod service;
pub mod store;

pub use adapters::{Credentials, PlatformAdapter, RegistrationAutomation, RegistrationOutcome};
pub use config::WatchConfig;
pub use dashboard::{Dashboard, DashboardSnapshot};
pub use error::{Result, WatchError};
pub use model::{ContestId, ContestRecord, JobKind, Platform, ReminderKind};
pub use notify::{Notifier, SmtpNotifier};
pub use service::{JobReport, UpdateReport, Watcher};
pub use store::StateStore;
