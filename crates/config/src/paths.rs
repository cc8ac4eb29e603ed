//! Persistent data directory layout.
//!
//! All user data (config, conversations, custom plugins, logs) lives under
//! `~/.parley/` so nothing is lost when the binary is updated or moved.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;

/// Root of all persistent user data.  Falls back to a cwd-relative `.parley`
/// when no home directory can be resolved (containers, stripped-down CI).
pub fn data_home() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".parley"))
        .unwrap_or_else(|| PathBuf::from(".parley"))
}

/// `~/.parley/config.toml`
pub fn config_path() -> PathBuf {
    data_home().join("config.toml")
}

/// `~/.parley/data/conversations/`
pub fn conversations_dir() -> PathBuf {
    data_home().join("data").join("conversations")
}

/// `~/.parley/plugins/custom/` — user-authored plugin manifests.
pub fn custom_plugins_dir() -> PathBuf {
    data_home().join("plugins").join("custom")
}

/// `~/.parley/data/logs/` — daemon log files.
pub fn logs_dir() -> PathBuf {
    data_home().join("data").join("logs")
}

/// Create the directory tree on first run.
pub fn ensure_dirs() -> Result<()> {
    for dir in [
        data_home(),
        conversations_dir(),
        custom_plugins_dir(),
        logs_dir(),
    ] {
        fs::create_dir_all(&dir)?;
    }
    Ok(())
}
