//! Application directory paths for cpwatch.
//!
//! Uses the [`dirs`] crate for platform-appropriate resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data | `~/Library/Application Support/cpwatch/` | `~/.local/share/cpwatch/` |
//! | Config | `~/Library/Application Support/cpwatch/` | `~/.config/cpwatch/` |
//!
//! # Environment Overrides
//!
//! - `CPWATCH_DATA_DIR` overrides [`data_dir`]
//! - `CPWATCH_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root. Holds the state database.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("CPWATCH_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("cpwatch"))
        .unwrap_or_else(|| PathBuf::from("/tmp/cpwatch-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("CPWATCH_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("cpwatch"))
        .unwrap_or_else(|| PathBuf::from("/tmp/cpwatch-config"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default state database (`data_dir()/cpwatch.db`).
#[must_use]
pub fn database_file() -> PathBuf {
    data_dir().join("cpwatch.db")
}
