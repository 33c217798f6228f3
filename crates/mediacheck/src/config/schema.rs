use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_log_directory")]
    pub log_directory: PathBuf,
    /// Workers spawned per started mode when the caller does not say.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub checker: CheckerConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: default_database_path(),
            log_directory: default_log_directory(),
            concurrency: default_concurrency(),
            checker: CheckerConfig::default(),
            events: EventsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn default_database_path() -> PathBuf {
    crate::db::default_database_path().unwrap_or_else(|| PathBuf::from("mediacheck.db"))
}

pub fn default_log_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mediacheck")
        .join("logs")
}

/// Three quarters of the available cores, at least one.
pub fn default_concurrency() -> usize {
    (num_cpus::get() * 3 / 4).max(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckerConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    /// Error text stored on a job is cut to this many characters.
    #[serde(default = "default_max_error_length")]
    pub max_error_length: usize,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_max_error_length() -> usize {
    500
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            max_error_length: default_max_error_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsConfig {
    #[serde(default = "default_check_capacity")]
    pub check_capacity: usize,
    #[serde(default = "default_worker_capacity")]
    pub worker_capacity: usize,
    #[serde(default = "default_keep_alive_seconds")]
    pub keep_alive_seconds: u64,
}

fn default_check_capacity() -> usize {
    1024
}

fn default_worker_capacity() -> usize {
    4096
}

fn default_keep_alive_seconds() -> u64 {
    15
}

impl EventsConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_seconds.max(1))
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            check_capacity: default_check_capacity(),
            worker_capacity: default_worker_capacity(),
            keep_alive_seconds: default_keep_alive_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "mediacheck=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}
