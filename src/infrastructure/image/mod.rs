//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory caching with weight-bounded LRU eviction
//! - A journaled disk store for fetched bytes
//! - HTTP fetching and downsampling decode
//! - The worker pool, dispatchers and the resolution orchestrator

pub mod coalesce;
pub mod decoder;
pub mod dispatch;
pub mod disk_cache;
pub mod http_fetcher;
pub mod loader;
pub mod memory_cache;
pub mod system;
pub mod worker_pool;

pub use coalesce::SingleFlight;
pub use decoder::{calculate_sample_size, decode, probe_dimensions};
pub use dispatch::{DispatchQueue, InlineDispatcher, QueueDispatcher, dispatch_queue};
pub use disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskLruStore, Editor, Snapshot};
pub use http_fetcher::HttpFetcher;
pub use loader::{DISK_FORMAT_VERSION, ImageLoader, LoaderOptions, default_cache_dir};
pub use memory_cache::{CacheStats, MemoryImageCache};
pub use system::{FixedSpace, FsSpaceProbe, SpaceProbe, detect_available_memory};
pub use worker_pool::{WorkerPool, WorkerPoolConfig};
