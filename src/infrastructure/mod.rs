//! Infrastructure layer with adapters for the filesystem, network and runtime.

/// Application configuration.
pub mod config;
/// Image handling (caching, fetching, decoding, loading).
pub mod image;

pub use config::{AppConfig, CliArgs, Command, LogLevel, StorageManager};
pub use image::{
    CacheStats, DiskLruStore, DispatchQueue, HttpFetcher, ImageLoader, InlineDispatcher,
    LoaderOptions, MemoryImageCache, QueueDispatcher, WorkerPoolConfig, dispatch_queue,
};
