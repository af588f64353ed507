//! Configuration and log locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/olmtest/` and `~/.local/share/olmtest/logs/`
//! - macOS: `~/Library/Application Support/olmtest/`

use std::io;
use std::path::PathBuf;

/// Name used for the config and data directories
const APP_NAME: &str = "olmtest";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
///
/// `OLMTEST_CONFIG` overrides the platform location.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("OLMTEST_CONFIG") {
        return Some(PathBuf::from(path));
    }
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory used by scenario runs
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// File name of the scenario-run log; one file, appended across runs
pub const SCENARIO_LOG_FILE: &str = "scenarios.log";

/// Full path of the scenario-run log
pub fn scenario_log_path() -> Option<PathBuf> {
    log_dir().map(|dir| dir.join(SCENARIO_LOG_FILE))
}

/// Ensure the log directory exists
pub fn ensure_log_dir() -> io::Result<Option<PathBuf>> {
    if let Some(dir) = log_dir() {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(Some(dir))
    } else {
        Ok(None)
    }
}
