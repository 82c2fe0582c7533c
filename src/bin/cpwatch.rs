//! CLI binary for cpwatch: configuration checks and read-only views.

use chrono::Utc;
use clap::{Parser, Subcommand};
use cpwatch::dashboard::{self, Dashboard};
use cpwatch::{Platform, StateStore, WatchConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Contest monitor for Codeforces and LeetCode.
#[derive(Parser)]
#[command(name = "cpwatch", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load and validate the configuration, then print it with secrets redacted.
    CheckConfig,

    /// Upcoming contests and job status.
    Status,

    /// Per-tag statistics with strong and weak tags.
    Tags {
        /// Window in days.
        #[arg(long, default_value_t = dashboard::DEFAULT_TAG_DAYS, value_parser = window_days())]
        days: u32,
    },

    /// Training plan from recent practice and rating history.
    Plan {
        #[arg(long, default_value_t = dashboard::DEFAULT_TAG_DAYS, value_parser = window_days())]
        days: u32,
    },

    /// Latest registration attempts.
    Registrations {
        #[arg(long, default_value_t = dashboard::DEFAULT_REGISTRATION_LIMIT)]
        limit: usize,
    },

    /// Rating history.
    Ratings {
        /// Only this platform (codeforces or leetcode).
        #[arg(long)]
        platform: Option<Platform>,
        #[arg(long, default_value_t = dashboard::DEFAULT_RATING_LIMIT)]
        limit: usize,
    },

    /// Stored post-contest results.
    Results {
        #[arg(long, default_value_t = dashboard::DEFAULT_RESULT_LIMIT)]
        limit: usize,
    },

    /// Full dashboard snapshot.
    Snapshot,
}

/// Windows from one day up to a century.
fn window_days() -> clap::builder::RangedI64ValueParser<u32> {
    clap::value_parser!(u32).range(1..=36_500)
}

#[derive(Serialize)]
struct StatusView {
    upcoming: Vec<dashboard::UpcomingContest>,
    jobs: Vec<dashboard::JobStatus>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(WatchConfig::default_config_path);
    let config = WatchConfig::load(&config_path)?;

    let default_filter = format!("cpwatch={}", config.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Command::CheckConfig = cli.command {
        println!("config: {}", config_path.display());
        println!("database: {}", config.database_path()?.display());
        println!("{config:#?}");
        return Ok(());
    }

    let store = Arc::new(StateStore::open(&config.database_path()?)?);
    let dash = Dashboard::new(store);
    let now = Utc::now();

    match cli.command {
        Command::CheckConfig => Ok(()),
        Command::Status => print_json(&StatusView {
            upcoming: dash.upcoming_contests(now)?,
            jobs: dash.job_status()?,
        }),
        Command::Tags { days } => print_json(&dash.weak_strong_tags(days, now)?),
        Command::Plan { days } => print_json(&dash.training_plan(days, now)?),
        Command::Registrations { limit } => print_json(&dash.registrations(limit)?),
        Command::Ratings { platform, limit } => print_json(&dash.rating_history(platform, limit)?),
        Command::Results { limit } => print_json(&dash.contest_results(limit)?),
        Command::Snapshot => print_json(&dash.snapshot(now)?),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
