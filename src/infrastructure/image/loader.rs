//! Image resolution orchestrator.
//!
//! Implements a three-tier cascade: Memory -> Disk -> Network. The memory
//! tier is checked on the caller's thread; misses run on the worker pool and
//! are handed back through a [`Dispatcher`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use directories::ProjectDirs;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{
    CacheKey, CacheLevel, ImageSource, LoadedImage, PixelBuffer, RequestedSize, ResourceId, Tier,
};
use crate::domain::errors::{CacheResult, FetchError, LoaderError, ResolveError};
use crate::domain::ports::{ByteStream, Dispatcher, ImageFetcherPort, ImageTarget, PendingResult};
use crate::domain::services::CascadePolicy;

use super::coalesce::SingleFlight;
use super::decoder::decode_blocking;
use super::dispatch::InlineDispatcher;
use super::disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskLruStore, Editor};
use super::http_fetcher::{DEFAULT_TIMEOUT_SECS, HttpFetcher};
use super::memory_cache::{CacheStats, MemoryImageCache};
use super::system::{FsSpaceProbe, SpaceProbe, detect_available_memory};
use super::worker_pool::{WorkerPool, WorkerPoolConfig};

/// Disk store format version. Bump when the stored bytes change meaning.
pub const DISK_FORMAT_VERSION: u32 = 1;
const DISK_VALUE_COUNT: usize = 1;
const DISK_VALUE_INDEX: usize = 0;

/// Default disk cache directory: `<platform cache dir>/images`.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    ProjectDirs::from("com", "pixcache", "pixcache").map_or_else(
        || std::env::temp_dir().join("pixcache").join("images"),
        |dirs| dirs.cache_dir().join("images"),
    )
}

/// Configuration for the image loader, fixed at construction.
#[derive(Clone)]
pub struct LoaderOptions {
    /// Directory of the disk store.
    pub cache_dir: PathBuf,
    /// Disk budget in bytes. The disk tier is enabled only if the filesystem
    /// has more free space than this.
    pub disk_budget_bytes: u64,
    /// Tiers a miss may fall through to.
    pub cache_level: CacheLevel,
    /// Memory budget in kilobytes. Defaults to 1/8 of available memory.
    pub memory_cache_kb: Option<usize>,
    /// Worker pool shape.
    pub pool: WorkerPoolConfig,
    /// Share one cascade among concurrent misses for the same key.
    pub single_flight: bool,
    /// Timeout of the default HTTP fetcher.
    pub http_timeout: Duration,
    /// Free space source for the disk tier check.
    pub space_probe: Arc<dyn SpaceProbe>,
    /// Fetcher override. Defaults to [`HttpFetcher`].
    pub fetcher: Option<Arc<dyn ImageFetcherPort>>,
    /// Dispatcher used by [`ImageLoader::resolve`]. Defaults to
    /// [`InlineDispatcher`].
    pub dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            disk_budget_bytes: DEFAULT_MAX_CACHE_SIZE,
            cache_level: CacheLevel::Full,
            memory_cache_kb: None,
            pool: WorkerPoolConfig::default(),
            single_flight: false,
            http_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            space_probe: Arc::new(FsSpaceProbe),
            fetcher: None,
            dispatcher: None,
        }
    }
}

impl LoaderOptions {
    /// Uses `fetcher` instead of the HTTP default.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ImageFetcherPort>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Delivers `resolve` results through `dispatcher`.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Sets the cache level.
    #[must_use]
    pub const fn with_cache_level(mut self, level: CacheLevel) -> Self {
        self.cache_level = level;
        self
    }
}

impl std::fmt::Debug for LoaderOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderOptions")
            .field("cache_dir", &self.cache_dir)
            .field("disk_budget_bytes", &self.disk_budget_bytes)
            .field("cache_level", &self.cache_level)
            .field("memory_cache_kb", &self.memory_cache_kb)
            .field("pool", &self.pool)
            .field("single_flight", &self.single_flight)
            .field("http_timeout", &self.http_timeout)
            .finish_non_exhaustive()
    }
}

/// Resolves resource ids to decoded images through memory, disk and network.
///
/// Owns its worker pool and caches; dropping the loader stops the pool.
/// Results of requests still running at that point are never delivered.
pub struct ImageLoader {
    cascade: Arc<Cascade>,
    pool: WorkerPool,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ImageLoader {
    /// Creates a loader.
    ///
    /// Opening the disk tier never fails the loader: with too little free
    /// space, or if the store cannot be opened, the disk tier stays disabled
    /// for the loader's lifetime.
    ///
    /// # Errors
    /// Returns error if the worker pool or the default fetcher cannot be created.
    pub async fn new(options: LoaderOptions) -> Result<Self, LoaderError> {
        let memory = match options.memory_cache_kb {
            Some(capacity_kb) => MemoryImageCache::new(capacity_kb),
            None => MemoryImageCache::for_available_memory(detect_available_memory()),
        };

        let fetcher: Arc<dyn ImageFetcherPort> = match options.fetcher.clone() {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(options.http_timeout)?),
        };

        let disk = open_disk_tier(&options).await;
        let policy = CascadePolicy::new(options.cache_level, disk.is_some());
        let pool = WorkerPool::new(options.pool.clone())?;

        info!(
            cache_level = %options.cache_level,
            memory_kb = memory.capacity_kb(),
            disk_enabled = disk.is_some(),
            single_flight = options.single_flight,
            "Image loader ready"
        );

        Ok(Self {
            cascade: Arc::new(Cascade {
                memory,
                disk,
                fetcher,
                policy,
                flights: options.single_flight.then(SingleFlight::new),
            }),
            pool,
            dispatcher: options
                .dispatcher
                .unwrap_or_else(|| Arc::new(InlineDispatcher)),
        })
    }

    /// Resolves `id` at the requested size and reports to `target` through the
    /// configured dispatcher. A zero width or height means full resolution.
    ///
    /// On a memory hit `target` is called before this returns, on the
    /// caller's thread.
    pub fn resolve(
        &self,
        id: impl Into<ResourceId>,
        width: u32,
        height: u32,
        target: impl ImageTarget,
    ) {
        self.resolve_with(id, width, height, target, Arc::clone(&self.dispatcher));
    }

    /// Like [`resolve`](Self::resolve), delivering misses through `dispatcher`.
    pub fn resolve_with(
        &self,
        id: impl Into<ResourceId>,
        width: u32,
        height: u32,
        target: impl ImageTarget,
        dispatcher: Arc<dyn Dispatcher>,
    ) {
        let id = id.into();
        let key = CacheKey::derive(&id);

        if let Some(buffer) = self.cascade.memory.get(&key) {
            debug!(id = %id, "Resolved from memory");
            Box::new(target).on_resolved(buffer);
            return;
        }

        let requested = RequestedSize::new(width, height);
        let target: Box<dyn ImageTarget> = Box::new(target);
        let cascade = Arc::clone(&self.cascade);
        self.pool.execute(async move {
            let outcome = cascade.resolve_miss(&id, &key, requested).await;
            if let Err(e) = &outcome {
                debug!(id = %id, error = %e, "Resolution failed");
            }
            dispatcher.dispatch(PendingResult::new(target, outcome));
        });
    }

    /// Resolves `id` on the calling task.
    ///
    /// # Errors
    /// Returns the cascade's terminal failure.
    pub async fn load(
        &self,
        id: impl Into<ResourceId>,
        requested: RequestedSize,
    ) -> Result<LoadedImage, ResolveError> {
        self.cascade.load(id.into(), requested).await
    }

    /// Resolves `id` on the worker pool.
    pub fn spawn_load(
        &self,
        id: impl Into<ResourceId>,
        requested: RequestedSize,
    ) -> JoinHandle<Result<LoadedImage, ResolveError>> {
        let cascade = Arc::clone(&self.cascade);
        let id = id.into();
        self.pool
            .spawn(async move { cascade.load(id, requested).await })
    }

    /// Returns true if the disk tier was opened.
    #[must_use]
    pub fn is_disk_enabled(&self) -> bool {
        self.cascade.policy.disk_enabled()
    }

    /// Configured cache level.
    #[must_use]
    pub fn cache_level(&self) -> CacheLevel {
        self.cascade.policy.level()
    }

    /// Memory tier.
    #[must_use]
    pub fn memory_cache(&self) -> &MemoryImageCache {
        &self.cascade.memory
    }

    /// Disk tier, if enabled.
    #[must_use]
    pub fn disk_store(&self) -> Option<&Arc<DiskLruStore>> {
        self.cascade.disk.as_ref()
    }

    /// Returns memory cache statistics.
    #[must_use]
    pub fn memory_cache_stats(&self) -> CacheStats {
        self.cascade.memory.stats()
    }

    /// Drops every decoded image held in memory. The disk tier is untouched.
    pub fn clear_memory(&self) {
        self.cascade.memory.clear();
    }
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("policy", &self.cascade.policy)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

async fn open_disk_tier(options: &LoaderOptions) -> Option<Arc<DiskLruStore>> {
    let dir = &options.cache_dir;
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!(path = %dir.display(), error = %e, "Cannot create disk cache directory, disk tier disabled");
        return None;
    }

    match options.space_probe.available_space(dir) {
        Ok(available) if available <= options.disk_budget_bytes => {
            info!(
                available,
                required = options.disk_budget_bytes,
                "Not enough free space, disk tier disabled"
            );
            return None;
        }
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "Could not query free space, opening disk tier anyway");
        }
    }

    match DiskLruStore::open(
        dir,
        DISK_FORMAT_VERSION,
        DISK_VALUE_COUNT,
        options.disk_budget_bytes,
    )
    .await
    {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Failed to open disk cache, disk tier disabled");
            None
        }
    }
}

/// State shared by every resolution of one loader.
struct Cascade {
    memory: MemoryImageCache,
    disk: Option<Arc<DiskLruStore>>,
    fetcher: Arc<dyn ImageFetcherPort>,
    policy: CascadePolicy,
    flights: Option<SingleFlight>,
}

impl Cascade {
    async fn load(
        &self,
        id: ResourceId,
        requested: RequestedSize,
    ) -> Result<LoadedImage, ResolveError> {
        let key = CacheKey::derive(&id);
        if let Some(buffer) = self.memory.get(&key) {
            return Ok(LoadedImage {
                key,
                buffer,
                source: ImageSource::MemoryCache,
            });
        }
        self.resolve_miss(&id, &key, requested).await
    }

    async fn resolve_miss(
        &self,
        id: &ResourceId,
        key: &CacheKey,
        requested: RequestedSize,
    ) -> Result<LoadedImage, ResolveError> {
        match &self.flights {
            Some(flights) => flights.run(key, requested, self.run(id, key, requested)).await,
            None => self.run(id, key, requested).await,
        }
    }

    async fn run(
        &self,
        id: &ResourceId,
        key: &CacheKey,
        requested: RequestedSize,
    ) -> Result<LoadedImage, ResolveError> {
        if self.policy.after_memory_miss()? == Tier::Disk {
            if let Some(buffer) = self.read_disk(key, requested).await {
                debug!(id = %id, "Resolved from disk");
                return Ok(loaded(key, buffer, ImageSource::DiskCache));
            }
            self.policy.after_disk_miss()?;
        }

        let buffer = self.fetch(id, key, requested).await?;
        debug!(id = %id, "Resolved from network");
        Ok(loaded(key, buffer, ImageSource::Network))
    }

    /// Decodes the stored blob, populating memory on success. A blob that
    /// does not decode is removed.
    async fn read_disk(&self, key: &CacheKey, requested: RequestedSize) -> Option<PixelBuffer> {
        let disk = self.disk.as_ref()?;
        let bytes = match disk.get(key).await {
            Ok(Some(mut snapshot)) => match snapshot.read_value(DISK_VALUE_INDEX).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to read disk cache entry");
                    return None;
                }
            },
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Disk cache lookup failed");
                return None;
            }
        };

        match decode_blocking(bytes, requested).await {
            Ok(buffer) => {
                self.memory.put(key.clone(), buffer.clone());
                Some(buffer)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable disk cache entry");
                if let Err(e) = disk.remove(key).await {
                    warn!(key = %key, error = %e, "Failed to remove disk cache entry");
                }
                None
            }
        }
    }

    async fn fetch(
        &self,
        id: &ResourceId,
        key: &CacheKey,
        requested: RequestedSize,
    ) -> Result<PixelBuffer, ResolveError> {
        trace!(id = %id, key = %key, "Fetching from network");
        let stream = self.fetcher.fetch(id).await?;

        let bytes = match self.disk.as_ref().filter(|_| self.policy.persists_fetched()) {
            Some(disk) => {
                let bytes = stream_into_disk(disk, key, stream).await?;
                if let Some(buffer) = self.read_disk(key, requested).await {
                    return Ok(buffer);
                }
                debug!(key = %key, "Fetched image not readable from disk, decoding directly");
                bytes
            }
            None => collect(stream).await?,
        };

        let buffer = decode_blocking(bytes, requested).await?;
        self.memory.put(key.clone(), buffer.clone());
        Ok(buffer)
    }
}

fn loaded(key: &CacheKey, buffer: PixelBuffer, source: ImageSource) -> LoadedImage {
    LoadedImage {
        key: key.clone(),
        buffer,
        source,
    }
}

/// Streams the body into a disk editor while keeping a copy in memory.
///
/// Persistence is best effort: a busy entry or a failed write only skips the
/// disk copy. A broken body stream fails the request and aborts the edit.
/// The journal is flushed whatever the edit's outcome.
async fn stream_into_disk(
    disk: &Arc<DiskLruStore>,
    key: &CacheKey,
    mut stream: ByteStream,
) -> Result<Bytes, FetchError> {
    let mut editor = match disk.edit(key) {
        Ok(Some(editor)) => Some(editor),
        Ok(None) => {
            debug!(key = %key, "Disk cache entry busy, not persisting");
            return collect(stream).await;
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to start disk cache edit");
            return collect(stream).await;
        }
    };

    let mut body = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                if let Some(editor) = editor.take() {
                    editor.abort();
                }
                flush_journal(disk).await;
                return Err(e);
            }
        };
        let failed = match editor.as_mut() {
            Some(editor) => write_chunk(editor, &chunk).await.err(),
            None => None,
        };
        if let Some(e) = failed {
            warn!(key = %key, error = %e, "Disk cache write failed, aborting edit");
            if let Some(editor) = editor.take() {
                editor.abort();
            }
        }
        body.extend_from_slice(&chunk);
    }

    if let Some(editor) = editor
        && let Err(e) = editor.commit().await
    {
        warn!(key = %key, error = %e, "Failed to commit disk cache entry");
    }
    flush_journal(disk).await;

    Ok(body.freeze())
}

async fn flush_journal(disk: &Arc<DiskLruStore>) {
    if let Err(e) = disk.flush().await {
        warn!(error = %e, "Failed to flush disk cache journal");
    }
}

async fn write_chunk(editor: &mut Editor, chunk: &[u8]) -> CacheResult<()> {
    editor
        .write_value(DISK_VALUE_INDEX)
        .await?
        .write_all(chunk)
        .await?;
    Ok(())
}

async fn collect(mut stream: ByteStream) -> Result<Bytes, FetchError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk?);
    }
    Ok(body.freeze())
}
