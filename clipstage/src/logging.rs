//! Structured logging setup.
//!
//! Events are written as JSON lines through a non-blocking rolling file
//! appender, optionally mirrored to stderr in human form. Keep the returned
//! [`WorkerGuard`] alive for as long as logs should be flushed.

use anyhow::{Context, Result};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub log_dir: PathBuf,
    pub file_prefix: CompactString,

    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub filter: CompactString,

    /// Rotated files kept on disk
    pub retained_files: usize,
    pub rotation: LogRotation,

    /// Also print events to stderr
    pub console: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Never,
    Hourly,
    Daily,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            file_prefix: CompactString::const_new("clipstage"),
            filter: CompactString::const_new("clipstage=info"),
            retained_files: 10,
            rotation: LogRotation::Daily,
            console: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("A global subscriber is already installed")]
    AlreadyInitialized,

    #[error("Unusable log directory {path}: {reason}")]
    InvalidLogDirectory { path: PathBuf, reason: &'static str },

    #[error("Invalid logger setting: {0}")]
    InvalidSetting(String),
}

pub struct LoggerBuilder {
    config: LoggerConfig,
}

impl LoggerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: LoggerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: LoggerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the fallback filter, e.g. `"clipstage=debug"`.
    #[must_use]
    pub fn with_filter(mut self, filter: &str) -> Self {
        self.config.filter = CompactString::new(filter);
        self
    }

    #[must_use]
    pub fn with_console(mut self, console: bool) -> Self {
        self.config.console = console;
        self
    }

    /// Install the global subscriber.
    pub fn build(self) -> Result<WorkerGuard> {
        let LoggerConfig {
            log_dir,
            file_prefix,
            filter,
            retained_files,
            rotation,
            console,
        } = self.config;

        check_settings(&log_dir, &file_prefix, retained_files)?;
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("creating log directory {}", log_dir.display()))?;

        let appender = RollingFileAppender::builder()
            .rotation(rotation.into())
            .filename_prefix(file_prefix.as_str())
            .filename_suffix("jsonl")
            .max_log_files(retained_files)
            .build(&log_dir)
            .context("building rolling file appender")?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(writer)
            .with_filter(env_filter(&filter)?);

        let console_layer = console.then(|| {
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
        });

        tracing_subscriber::registry()
            .with(file_layer)
            .with(console_layer)
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)?;

        tracing::debug!(dir = %log_dir.display(), "Logging initialized");
        Ok(guard)
    }
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `RUST_LOG` wins over the configured fallback.
fn env_filter(fallback: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(fallback)
            .map_err(|e| LoggingError::InvalidSetting(format!("filter '{fallback}': {e}"))),
    }
}

fn check_settings(log_dir: &Path, file_prefix: &str, retained_files: usize) -> Result<(), LoggingError> {
    if retained_files == 0 {
        return Err(LoggingError::InvalidSetting(
            "retained_files must be at least 1".into(),
        ));
    }

    if file_prefix.is_empty() {
        return Err(LoggingError::InvalidSetting("file_prefix is empty".into()));
    }

    if log_dir.as_os_str().is_empty() {
        return Err(LoggingError::InvalidLogDirectory {
            path: log_dir.to_path_buf(),
            reason: "empty path",
        });
    }

    if log_dir.components().any(|c| c == Component::ParentDir) {
        return Err(LoggingError::InvalidLogDirectory {
            path: log_dir.to_path_buf(),
            reason: "contains '..'",
        });
    }

    Ok(())
}

pub fn init_default_logging() -> Result<WorkerGuard> {
    LoggerBuilder::new().build()
}

pub fn init_logging_with_config(config: LoggerConfig) -> Result<WorkerGuard> {
    LoggerBuilder::new().with_config(config).build()
}
