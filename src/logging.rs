//! Logging: console output plus an optional size-limited log file

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "app.log";

/// Log file settings, stored under `log` in `config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// Write a log file next to the configuration
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Size at which the log file is rotated (MB)
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// "error", "warn", "info", "debug" or "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    pub fn tracing_level(&self) -> tracing::Level {
        parse_level(&self.level)
    }
}

fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    }
}

/// Log file writer that moves `app.log` to `app.log.old` once it grows past
/// the size limit.
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    written: u64,
    writer: BufWriter<File>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        Self::with_max_bytes(log_dir, (max_size_mb as u64) * 1024 * 1024)
    }

    pub fn with_max_bytes(log_dir: &Path, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        let file_path = log_dir.join(LOG_FILE_NAME);

        if let Ok(metadata) = fs::metadata(&file_path) {
            if metadata.len() > max_size {
                rotate_log(&file_path)?;
            }
        }

        let (writer, written) = open_file(&file_path)?;
        Ok(Self {
            file_path,
            max_size: max_size.max(1),
            written,
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        rotate_log(&self.file_path)?;
        let (writer, written) = open_file(&self.file_path)?;
        self.writer = writer;
        self.written = written;
        Ok(())
    }
}

fn open_file(file_path: &Path) -> io::Result<(BufWriter<File>, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(file_path)?;
    let len = file.metadata()?.len();
    Ok((BufWriter::new(file), len))
}

fn rotate_log(file_path: &Path) -> io::Result<()> {
    let backup_path = file_path.with_extension("log.old");
    if backup_path.exists() {
        fs::remove_file(&backup_path)?;
    }
    fs::rename(file_path, &backup_path)
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let n = self.writer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Directory holding the log files
pub fn get_log_dir() -> PathBuf {
    crate::config::config_dir().join("logs")
}

/// Install the global subscriber.
///
/// `verbosity` overrides the configured level; `RUST_LOG` directives refine
/// either. The returned guard flushes the log file when dropped and must be
/// held for the life of the process.
pub fn init_logging(verbosity: Option<&str>, config: &LogConfig, log_dir: &Path) -> Option<WorkerGuard> {
    let level = verbosity.map(parse_level).unwrap_or_else(|| config.tracing_level());
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .without_time();

    let mut guard = None;
    let file_layer = if config.enabled {
        match SizeRotatingWriter::new(log_dir, config.max_size_mb) {
            Ok(writer) => {
                let (non_blocking, worker_guard) = tracing_appender::non_blocking(writer);
                guard = Some(worker_guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false),
                )
            }
            Err(e) => {
                eprintln!("Log file disabled, cannot open {}: {}", log_dir.display(), e);
                None
            }
        }
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("Logging already initialised: {}", e);
    }

    guard
}
