//! Application configuration

use crate::core::digest::DEFAULT_DIGEST_WORKERS;
use crate::core::executor::{DEFAULT_COPY_BUFFER_SIZE, DEFAULT_MAX_CONCURRENCY};
use crate::core::planner::CompareConfig;
use crate::core::scanner::ScanConfig;
use crate::core::SyncConfig;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "config.json";

/// What an empty answer at the confirmation prompt means
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmDefault {
    #[default]
    Accept,
    Decline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Actions applied at the same time
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_digest_workers")]
    pub digest_workers: usize,
    /// Subtrees scanned at the same time
    #[serde(default = "default_scan_concurrency")]
    pub scan_concurrency: usize,
    #[serde(default = "default_copy_buffer_size")]
    pub copy_buffer_size: usize,
    /// Actions listed before the plan summary is cut short
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,
    /// Allowed mtime difference in whole seconds
    #[serde(default)]
    pub mtime_tolerance_secs: i64,
    #[serde(default)]
    pub confirm_default: ConfirmDefault,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_digest_workers() -> usize {
    DEFAULT_DIGEST_WORKERS
}

fn default_scan_concurrency() -> usize {
    ScanConfig::default().max_concurrent
}

fn default_copy_buffer_size() -> usize {
    DEFAULT_COPY_BUFFER_SIZE
}

fn default_sample_limit() -> usize {
    20
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            digest_workers: default_digest_workers(),
            scan_concurrency: default_scan_concurrency(),
            copy_buffer_size: default_copy_buffer_size(),
            sample_limit: default_sample_limit(),
            mtime_tolerance_secs: 0,
            confirm_default: ConfirmDefault::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `config.json` in `config_dir`, falling back to defaults.
    pub fn load(config_dir: &Path) -> Self {
        let config_file = config_dir.join(CONFIG_FILE_NAME);
        let content = match fs::read_to_string(&config_file) {
            Ok(content) => content,
            Err(e) => {
                debug!("No config at {}: {}", config_file.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(e) => {
                debug!("Ignoring malformed config {}: {}", config_file.display(), e);
                Self::default()
            }
        }
    }

    /// Write this configuration into `config.json`, keeping unknown keys.
    pub fn save(&self, config_dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(config_dir)?;
        let config_file = config_dir.join(CONFIG_FILE_NAME);

        // keys written by other tools survive a save
        let mut config: serde_json::Value = match fs::read_to_string(&config_file) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({})),
            Err(e) if e.kind() == io::ErrorKind::NotFound => serde_json::json!({}),
            Err(e) => return Err(e),
        };
        if !config.is_object() {
            config = serde_json::json!({});
        }

        if let (Some(existing), serde_json::Value::Object(ours)) =
            (config.as_object_mut(), serde_json::to_value(self)?)
        {
            existing.extend(ours);
        }

        fs::write(&config_file, serde_json::to_string_pretty(&config)?)?;
        Ok(config_file)
    }

    /// Engine settings derived from this configuration
    pub fn sync_config(&self, exclude: Vec<String>) -> SyncConfig {
        SyncConfig {
            max_concurrency: self.max_concurrency.max(1),
            digest_workers: self.digest_workers.max(1),
            scan: ScanConfig {
                max_concurrent: self.scan_concurrency.max(1),
            },
            copy_buffer_size: self.copy_buffer_size,
            compare: CompareConfig {
                time_tolerance_seconds: self.mtime_tolerance_secs.max(0),
            },
            exclude,
        }
    }
}

/// Directory holding `config.json` and the log files
pub fn config_dir() -> PathBuf {
    crate::dirs::config_dir()
        .map(|p| p.join("syncdir"))
        .unwrap_or_else(|| PathBuf::from(".syncdir"))
}
