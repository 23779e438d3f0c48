//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::entities::CacheLevel;
use crate::infrastructure::image::{LoaderOptions, WorkerPoolConfig, default_cache_dir};

pub(crate) const APP_NAME: &str = "pixcache";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "pixcache";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration, read from `config.toml`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Cache tiers.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Worker pool shape.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Network fetcher settings.
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Disk cache directory. Defaults to the platform cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    /// Disk budget in megabytes.
    #[serde(default = "default_disk_budget_mb")]
    pub disk_budget_mb: u64,

    /// Tiers a miss may fall through to (full, memory, disk).
    #[serde(default)]
    pub level: CacheLevel,

    /// Memory budget in kilobytes. Unset means 1/8 of available memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_kb: Option<usize>,

    /// Share one fetch among concurrent requests for the same image.
    #[serde(default)]
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: None,
            disk_budget_mb: default_disk_budget_mb(),
            level: CacheLevel::default(),
            memory_kb: None,
            single_flight: false,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Async worker threads.
    #[serde(default = "default_core_workers")]
    pub core_workers: usize,

    /// Maximum blocking threads.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Seconds an idle blocking thread is kept.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Resolutions running at once.
    #[serde(default = "default_max_workers")]
    pub max_concurrent: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_workers: default_core_workers(),
            max_workers: default_max_workers(),
            keep_alive_secs: default_keep_alive_secs(),
            max_concurrent: default_max_workers(),
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_disk_budget_mb() -> u64 {
    50
}

fn default_core_workers() -> usize {
    4
}

fn default_max_workers() -> usize {
    8
}

fn default_keep_alive_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    30
}

use super::args::CliArgs;

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache.directory = Some(cache_dir.clone());
        }
        if let Some(level) = args.cache_level {
            self.cache.level = level;
        }
        if let Some(disk_budget_mb) = args.disk_budget_mb {
            self.cache.disk_budget_mb = disk_budget_mb;
        }
        if let Some(single_flight) = args.single_flight {
            self.cache.single_flight = single_flight;
        }
        if let Some(timeout) = args.timeout {
            self.network.timeout_secs = timeout;
        }
    }

    /// Builds loader options from this configuration.
    #[must_use]
    pub fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            cache_dir: self.effective_cache_dir(),
            disk_budget_bytes: self.cache.disk_budget_mb.saturating_mul(1024 * 1024),
            cache_level: self.cache.level,
            memory_cache_kb: self.cache.memory_kb,
            pool: WorkerPoolConfig {
                core_workers: self.pool.core_workers,
                max_workers: self.pool.max_workers,
                keep_alive: Duration::from_secs(self.pool.keep_alive_secs),
                max_concurrent: self.pool.max_concurrent,
            },
            single_flight: self.cache.single_flight,
            http_timeout: Duration::from_secs(self.network.timeout_secs),
            space_probe: Arc::new(crate::infrastructure::image::FsSpaceProbe),
            fetcher: None,
            dispatcher: None,
        }
    }

    /// Returns effective disk cache directory.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache.directory.clone().unwrap_or_else(default_cache_dir)
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Returns effective config file path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("pixcache.log"))
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}
