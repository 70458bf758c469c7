pub mod commands;
pub mod config;
pub mod core;
pub mod logging;

pub use crate::config::AppConfig;
pub use crate::core::{Plan, SyncConfig, SyncEngine, SyncReport};

/// Per-user configuration directory, resolved from the environment
pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // XDG_CONFIG_HOME wins over ~/.config
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
        }
    }
}
