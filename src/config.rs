//! Configuration module for sharebox.

use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::{Result, StorageError};

/// Storage layout configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one sub-directory per tenant space.
    #[serde(default = "default_root")]
    pub root: String,
    /// Directory for per-tenant metadata side-tables.
    #[serde(default = "default_metadata_dir")]
    pub metadata_dir: String,
    /// Scratch directory for raw uploads and temporary archives.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
}

fn default_root() -> String {
    "data/users".to_string()
}

fn default_metadata_dir() -> String {
    "data/metadata".to_string()
}

fn default_scratch_dir() -> String {
    "data/downloads".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            metadata_dir: default_metadata_dir(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

/// Upper bound for `share.link_ttl_minutes` (one year).
pub const MAX_LINK_TTL_MINUTES: u64 = 365 * 24 * 60;

/// Share link configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ShareConfig {
    /// How long an issued link stays redeemable, in minutes.
    #[serde(default = "default_link_ttl")]
    pub link_ttl_minutes: u64,
    /// Interval between sweeps of expired links, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_link_ttl() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    300 // 5 minutes
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            link_ttl_minutes: default_link_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl ShareConfig {
    /// Link lifetime as a chrono duration.
    pub fn link_ttl(&self) -> chrono::Duration {
        let minutes = self.link_ttl_minutes.min(MAX_LINK_TTL_MINUTES) as i64;
        chrono::Duration::minutes(minutes)
    }

    /// Sweep interval as a std duration.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Compression/archive worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of codec jobs running at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Seconds to wait for a job's terminal report (0 = no limit).
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
}

fn default_pool_size() -> usize {
    2
}

fn default_job_timeout() -> u64 {
    300
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            job_timeout_secs: default_job_timeout(),
        }
    }
}

impl WorkerConfig {
    /// Job timeout, `None` when disabled.
    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file. Empty disables file logging.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/sharebox.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage layout.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Share links.
    #[serde(default)]
    pub share: ShareConfig,
    /// Codec workers.
    #[serde(default)]
    pub workers: WorkerConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(StorageError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| StorageError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `SHAREBOX_USERS_DIR`: tenant space root
    /// - `SHAREBOX_METADATA_DIR`: metadata side-table directory
    /// - `SHAREBOX_DOWNLOADS_DIR`: scratch directory
    /// - `SHAREBOX_LINK_TTL_MINUTES`: share link lifetime
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(root) = non_empty_env("SHAREBOX_USERS_DIR") {
            self.storage.root = root;
        }
        if let Some(dir) = non_empty_env("SHAREBOX_METADATA_DIR") {
            self.storage.metadata_dir = dir;
        }
        if let Some(dir) = non_empty_env("SHAREBOX_DOWNLOADS_DIR") {
            self.storage.scratch_dir = dir;
        }
        if let Some(ttl) = non_empty_env("SHAREBOX_LINK_TTL_MINUTES") {
            self.share.link_ttl_minutes = ttl.parse().map_err(|_| {
                StorageError::Config(format!("SHAREBOX_LINK_TTL_MINUTES is not a number: {ttl}"))
            })?;
        }
        Ok(())
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - the link TTL is zero or longer than a year
    /// - the worker pool size is zero
    /// - the scratch or metadata directory lives inside the tenant root
    pub fn validate(&self) -> Result<()> {
        if self.share.link_ttl_minutes == 0 {
            return Err(StorageError::Config(
                "share.link_ttl_minutes must be greater than zero".to_string(),
            ));
        }
        if self.share.link_ttl_minutes > MAX_LINK_TTL_MINUTES {
            return Err(StorageError::Config(format!(
                "share.link_ttl_minutes must not exceed {MAX_LINK_TTL_MINUTES}"
            )));
        }
        if self.workers.pool_size == 0 {
            return Err(StorageError::Config(
                "workers.pool_size must be greater than zero".to_string(),
            ));
        }

        let cwd = std::env::current_dir()?;
        let root = normalize(&cwd, Path::new(&self.storage.root));
        for (key, dir) in [
            ("storage.scratch_dir", &self.storage.scratch_dir),
            ("storage.metadata_dir", &self.storage.metadata_dir),
        ] {
            if normalize(&cwd, Path::new(dir)).starts_with(&root) {
                return Err(StorageError::Config(format!(
                    "{key} must not be inside storage.root ({})",
                    self.storage.root
                )));
            }
        }
        Ok(())
    }
}

/// Absolute, lexically cleaned form of `path` (`.` dropped, `..` applied).
///
/// Symlinks are not resolved; the directories need not exist yet.
fn normalize(cwd: &Path, path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in cwd.join(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
