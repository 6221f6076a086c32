//! clipstage/src/config.rs
//! ============================================================================
//! # StagingConfig: tunables of the copy/paste staging engine
//!
//! Loaded and saved as TOML from the platform config directory using the
//! [`directories`](https://docs.rs/directories) crate. Durations are written in
//! human form (`"12h"`, `"30s"`) through `humantime-serde`.
//!
//! ## Example
//! ```rust,ignore
//! let config = StagingConfig::load().await?;
//! let engine = StagingEngine::new(config)?;
//! ```

use compact_str::CompactString;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs as TokioFs;
use tracing::info;

use crate::error::{StageError, StageResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// How long a copy record (and its staged data) stays pasteable
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Delay before the first expiration sweep
    #[serde(with = "humantime_serde")]
    pub sweep_initial_delay: Duration,

    /// Period between expiration sweeps
    #[serde(with = "humantime_serde")]
    pub sweep_period: Duration,

    /// Upper bound on archive jobs running at once
    pub max_concurrent_archives: usize,

    /// Prefix of process-temp staging directories
    pub staging_prefix: CompactString,

    /// Numbered " - Copy (n)" names probed before falling back to a random suffix
    pub copy_probe_limit: usize,

    /// Shards of the per-node rename lock table
    pub lock_shards: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(12 * 60 * 60),
            sweep_initial_delay: Duration::from_secs(30),
            sweep_period: Duration::from_secs(60),
            max_concurrent_archives: 4,
            staging_prefix: CompactString::const_new("clipstage-"),
            copy_probe_limit: 100,
            lock_shards: 64,
        }
    }
}

impl StagingConfig {
    pub fn validate(&self) -> StageResult<()> {
        if self.sweep_period.is_zero() {
            return Err(StageError::Config("sweep_period must be greater than 0".into()));
        }

        if self.max_concurrent_archives == 0 {
            return Err(StageError::Config(
                "max_concurrent_archives must be greater than 0".into(),
            ));
        }

        if self.lock_shards == 0 {
            return Err(StageError::Config("lock_shards must be greater than 0".into()));
        }

        if self.staging_prefix.is_empty() {
            return Err(StageError::Config("staging_prefix must not be empty".into()));
        }

        Ok(())
    }

    /// Loads config from the platform config dir, writing defaults if the file is missing.
    pub async fn load() -> StageResult<Self> {
        let path = Self::config_path()?;
        if TokioFs::try_exists(&path).await? {
            Self::load_from_file(&path).await
        } else {
            info!(
                "No staging config found at {}, creating it with defaults",
                path.display()
            );

            let default_config = Self::default();
            default_config.save_to_file(&path).await?;

            Ok(default_config)
        }
    }

    pub async fn load_from_file(path: impl AsRef<Path>) -> StageResult<Self> {
        let path = path.as_ref();
        info!("Loading staging config from {}", path.display());

        let text = TokioFs::read_to_string(path).await?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;

        Ok(config)
    }

    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> StageResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            TokioFs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        TokioFs::write(path, toml_str).await?;

        Ok(())
    }

    pub fn config_path() -> StageResult<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "clipstage", "clipstage")
            .ok_or_else(|| StageError::Config("Could not determine config directory".into()))?;
        Ok(proj_dirs.config_dir().join("staging.toml"))
    }
}
