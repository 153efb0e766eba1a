use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the device's REST API
    pub host: String,
    /// API password, sent as the X-Password header when set
    pub password: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Bytes per device read when capturing memory
    pub capture_chunk_size: usize,
    /// Extra attempts per capture chunk after the first
    pub capture_retries: usize,
    /// Data directory override (None = ~/.ultimatectl)
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "http://ultimate64.local".into(),
            password: None,
            timeout_secs: 10,
            capture_chunk_size: 256,
            capture_retries: 2,
            data_dir: None,
        }
    }
}

/// TOML representation of the [device] section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlDeviceConfig {
    pub host: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// TOML representation of the [capture] section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlCaptureConfig {
    pub chunk_size: Option<usize>,
    pub retries: Option<usize>,
}

/// TOML representation of the [storage] section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlStorageConfig {
    pub data_dir: Option<PathBuf>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub device: Option<TomlDeviceConfig>,
    pub capture: Option<TomlCaptureConfig>,
    pub storage: Option<TomlStorageConfig>,
}

impl Config {
    /// Load configuration from file, merging with defaults. Environment
    /// variables win over the file.
    pub fn load() -> Self {
        let mut config = Config::default();

        let config_file = config_path();

        // Create example config on first run
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }

        if config_file.exists() {
            if let Ok(contents) = fs::read_to_string(&config_file) {
                match toml::from_str::<TomlConfig>(&contents) {
                    Ok(toml_config) => config.merge_toml(toml_config),
                    Err(e) => {
                        tracing::warn!(path = %config_file.display(), error = %e, "Config file ignored");
                    }
                }
            }
        }

        config.apply_env();
        config
    }

    /// Merge user config on top of defaults
    fn merge_toml(&mut self, toml_config: TomlConfig) {
        if let Some(device) = toml_config.device {
            if let Some(host) = device.host {
                self.host = host;
            }
            if device.password.is_some() {
                self.password = device.password;
            }
            if let Some(timeout_secs) = device.timeout_secs {
                self.timeout_secs = timeout_secs;
            }
        }
        if let Some(capture) = toml_config.capture {
            if let Some(chunk_size) = capture.chunk_size {
                self.capture_chunk_size = chunk_size;
            }
            if let Some(retries) = capture.retries {
                self.capture_retries = retries;
            }
        }
        if let Some(storage) = toml_config.storage {
            if storage.data_dir.is_some() {
                self.data_dir = storage.data_dir;
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("ULTIMATECTL_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }
        if let Ok(password) = std::env::var("ULTIMATECTL_PASSWORD") {
            if !password.is_empty() {
                self.password = Some(password);
            }
        }
        if let Ok(dir) = std::env::var("ULTIMATECTL_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = Some(PathBuf::from(dir));
            }
        }
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &PathBuf) {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    eprintln!("Failed to create config directory: {}", e);
                    return;
                }
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            eprintln!("Failed to write default config: {}", e);
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}
