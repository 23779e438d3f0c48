use super::app_config::LogLevel;
use crate::domain::entities::CacheLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "pixcache",
    version,
    about = "Tiered memory/disk/network image cache",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Tiers a miss may fall through to.
    #[arg(long, value_enum, global = true)]
    pub cache_level: Option<CacheLevel>,

    /// Disk budget in megabytes.
    #[arg(long, value_name = "MB", global = true)]
    pub disk_budget_mb: Option<u64>,

    /// Share one fetch among concurrent requests for the same image.
    #[arg(long, global = true)]
    pub single_flight: Option<bool>,

    /// Request timeout in seconds.
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve images and print where each came from.
    Fetch {
        /// Resource ids (URLs).
        #[arg(required = true)]
        ids: Vec<String>,

        /// Requested width; 0 keeps full resolution.
        #[arg(long, default_value_t = 0)]
        width: u32,

        /// Requested height; 0 keeps full resolution.
        #[arg(long, default_value_t = 0)]
        height: u32,
    },

    /// Print the cache key derived from a resource id.
    Key {
        /// Resource id (URL).
        id: String,
    },

    /// Print disk cache usage.
    Stats,
}
