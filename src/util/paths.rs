//! Path utilities for ultimatectl data directories

use std::path::PathBuf;
use std::sync::OnceLock;

/// Global storage for custom data directory path
static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Initialize the data directory with an optional custom path.
/// Must be called early in main() before any other path functions are used.
/// If custom_path is None, uses the default ~/.ultimatectl location.
pub fn init_data_dir(custom_path: Option<PathBuf>) {
    let path = custom_path.unwrap_or_else(default_data_dir);
    // Ignore error if already set (shouldn't happen in normal usage)
    if DATA_DIR.set(path.clone()).is_err() {
        let existing = DATA_DIR
            .get()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        tracing::debug!(
            path = %path.display(),
            existing = %existing,
            "Data directory already initialized"
        );
    }
}

/// Get the default data directory path (~/.ultimatectl)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".ultimatectl"))
        .unwrap_or_else(|| PathBuf::from(".ultimatectl"))
}

/// Get the base data directory.
/// Returns the custom path if set via init_data_dir(), otherwise ~/.ultimatectl
pub fn data_dir() -> PathBuf {
    DATA_DIR.get().cloned().unwrap_or_else(default_data_dir)
}

/// Get the logs directory (~/.ultimatectl/logs)
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Get the default log file path (~/.ultimatectl/logs/ultimatectl.log)
pub fn log_file_path() -> PathBuf {
    logs_dir().join("ultimatectl.log")
}

/// Get the config file path (~/.ultimatectl/config.toml)
pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}

/// Get the captures directory (~/.ultimatectl/captures)
pub fn captures_dir() -> PathBuf {
    data_dir().join("captures")
}

/// Get the config snapshots directory (~/.ultimatectl/snapshots)
pub fn snapshots_dir() -> PathBuf {
    data_dir().join("snapshots")
}
