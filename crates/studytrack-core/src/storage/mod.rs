mod config;
mod migrations;
pub mod database;
mod snapshot_store;

pub use config::{ApiConfig, Config, TimerConfig};
pub use database::{Database, EndOutcome, HistoryTotals, SessionRecord};
pub use snapshot_store::{MemorySnapshotStore, SnapshotStore};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the data directory, creating it if needed.
///
/// `STUDYTRACK_DATA_DIR` wins when set. Otherwise `~/.config/studytrack[-dev]/`
/// based on STUDYTRACK_ENV; set STUDYTRACK_ENV=dev to use the development
/// data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("STUDYTRACK_DATA_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("STUDYTRACK_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("studytrack-dev")
            } else {
                base_dir.join("studytrack")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
