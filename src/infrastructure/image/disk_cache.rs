//! Journaled, size-bounded disk store for raw image bytes.
//!
//! Layout inside the store directory:
//!
//! ```text
//! journal            header + one line per operation
//! <key>.<index>      committed value
//! <key>.<index>.tmp  value being written by an editor
//! ```
//!
//! The journal is replayed on open to rebuild the LRU order. Every edit is
//! recorded as `DIRTY` and closed by `CLEAN` (commit) or `REMOVE` (abort), so
//! entries left dirty by a crash are deleted on the next open.

use std::collections::HashSet;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheError, CacheResult};

/// Default disk budget in bytes (50 MB).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 50 * 1024 * 1024;

/// Name of the journal file.
pub const JOURNAL_FILE: &str = "journal";
const JOURNAL_TMP_FILE: &str = "journal.tmp";
const MAGIC: &str = "pixcache.DiskLruStore";
const STORE_VERSION: &str = "1";

/// Redundant journal lines tolerated before the journal is rewritten.
const COMPACT_THRESHOLD: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Clean(CacheKey, Vec<u64>),
    Dirty(CacheKey),
    Remove(CacheKey),
    Read(CacheKey),
}

impl Op {
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split(' ');
        let tag = parts.next()?;
        let key = CacheKey::parse(parts.next()?)?;
        let op = match tag {
            "CLEAN" => {
                let lengths = parts
                    .by_ref()
                    .map(str::parse::<u64>)
                    .collect::<Result<Vec<_>, _>>()
                    .ok()?;
                return Some(Self::Clean(key, lengths));
            }
            "DIRTY" => Self::Dirty(key),
            "REMOVE" => Self::Remove(key),
            "READ" => Self::Read(key),
            _ => return None,
        };
        parts.next().is_none().then_some(op)
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clean(key, lengths) => {
                write!(f, "CLEAN {key}")?;
                for len in lengths {
                    write!(f, " {len}")?;
                }
                Ok(())
            }
            Self::Dirty(key) => write!(f, "DIRTY {key}"),
            Self::Remove(key) => write!(f, "REMOVE {key}"),
            Self::Read(key) => write!(f, "READ {key}"),
        }
    }
}

/// Result of replaying a journal.
struct Replayed {
    entries: LruCache<CacheKey, Vec<u64>>,
    dirty: HashSet<CacheKey>,
    line_count: usize,
    truncated: bool,
}

/// Replays `content`. `Ok(None)` means the journal belongs to another format
/// version or value count and the store should start over.
fn replay(content: &str, format_version: u32, value_count: usize) -> CacheResult<Option<Replayed>> {
    let mut lines: Vec<&str> = content.split('\n').collect();
    // A journal always ends in a newline; anything after the last one is a
    // partially written line.
    let truncated = lines.pop().is_some_and(|tail| !tail.is_empty());

    if lines.len() < 5 {
        return Err(CacheError::corrupt("journal header is incomplete"));
    }
    if lines[0] != MAGIC || lines[1] != STORE_VERSION || !lines[4].is_empty() {
        return Err(CacheError::corrupt(format!(
            "unexpected journal header: [{}, {}, {}]",
            lines[0], lines[1], lines[4]
        )));
    }
    if lines[2] != format_version.to_string() || lines[3] != value_count.to_string() {
        return Ok(None);
    }

    let mut entries = LruCache::unbounded();
    let mut dirty = HashSet::new();

    for (number, line) in lines.iter().enumerate().skip(5) {
        let op = Op::parse(line)
            .ok_or_else(|| CacheError::corrupt(format!("line {}: {line:?}", number + 1)))?;
        match op {
            Op::Clean(key, lengths) => {
                if lengths.len() != value_count {
                    return Err(CacheError::corrupt(format!(
                        "line {}: expected {value_count} lengths",
                        number + 1
                    )));
                }
                dirty.remove(&key);
                entries.put(key, lengths);
            }
            Op::Dirty(key) => {
                dirty.insert(key);
            }
            Op::Remove(key) => {
                dirty.remove(&key);
                entries.pop(&key);
            }
            Op::Read(key) => {
                entries.get(&key);
            }
        }
    }

    Ok(Some(Replayed {
        entries,
        dirty,
        line_count: lines.len() - 5,
        truncated,
    }))
}

struct State {
    entries: LruCache<CacheKey, Vec<u64>>,
    editing: HashSet<CacheKey>,
    size: u64,
    redundant_ops: usize,
    journal: std::io::BufWriter<std::fs::File>,
}

impl State {
    fn record(&mut self, op: &Op) -> std::io::Result<()> {
        writeln!(self.journal, "{op}")
    }
}

/// Size-bounded, LRU-evicted key/value store persisted under one directory.
///
/// Each entry holds a fixed number of byte values. Readers take a
/// [`Snapshot`]; writers take the single [`Editor`] for a key.
pub struct DiskLruStore {
    directory: PathBuf,
    format_version: u32,
    value_count: usize,
    max_size: u64,
    state: Mutex<State>,
}

impl DiskLruStore {
    /// Opens the store in `directory`, replaying its journal if present.
    ///
    /// A journal written with another `format_version` or `value_count` is
    /// discarded together with its entries.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or the journal is corrupt.
    pub async fn open(
        directory: impl Into<PathBuf>,
        format_version: u32,
        value_count: usize,
        max_size: u64,
    ) -> CacheResult<Arc<Self>> {
        let directory = directory.into();
        if value_count == 0 {
            return Err(CacheError::InvalidIndex { index: 0, count: 0 });
        }
        fs::create_dir_all(&directory).await?;

        let journal_path = directory.join(JOURNAL_FILE);
        let replayed = match fs::read_to_string(&journal_path).await {
            Ok(content) => replay(&content, format_version, value_count)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let (mut entries, dirty, redundant_ops, rewrite) = match replayed {
            Some(r) => {
                let redundant = r.line_count.saturating_sub(r.entries.len());
                let rewrite = r.truncated || !r.dirty.is_empty();
                (r.entries, r.dirty, redundant, rewrite)
            }
            None => {
                if fs::try_exists(&journal_path).await.unwrap_or(false) {
                    info!(path = %directory.display(), "Disk store format changed, starting over");
                    wipe_entries(&directory).await?;
                }
                (LruCache::unbounded(), HashSet::new(), 0, true)
            }
        };

        let setup_dir = directory.clone();
        let (entries, journal) = tokio::task::spawn_blocking(move || {
            for key in &dirty {
                entries.pop(key);
                for index in 0..value_count {
                    remove_if_exists(&setup_dir.join(format!("{key}.{index}")));
                    remove_if_exists(&setup_dir.join(format!("{key}.{index}.tmp")));
                }
                debug!(key = %key, "Deleted entry left dirty by an interrupted edit");
            }

            let journal = if rewrite {
                write_journal(&setup_dir, format_version, value_count, &entries, &HashSet::new())?
            } else {
                std::io::BufWriter::new(
                    std::fs::OpenOptions::new()
                        .append(true)
                        .open(&journal_path)?,
                )
            };
            Ok::<_, std::io::Error>((entries, journal))
        })
        .await
        .map_err(std::io::Error::other)??;

        let size = entries.iter().map(|(_, lengths)| lengths.iter().sum::<u64>()).sum();

        let store = Arc::new(Self {
            directory,
            format_version,
            value_count,
            max_size,
            state: Mutex::new(State {
                entries,
                editing: HashSet::new(),
                size,
                redundant_ops,
                journal,
            }),
        });

        store.maintain().await?;
        {
            let state = store.state.lock();
            debug!(
                path = %store.directory.display(),
                entries = state.entries.len(),
                size = state.size,
                max_size,
                "Opened disk store"
            );
        }

        Ok(store)
    }

    /// Returns a snapshot of the entry, or `None` if it is absent.
    ///
    /// The snapshot holds open handles, so its values stay readable even if
    /// the entry is evicted or replaced afterwards.
    ///
    /// # Errors
    /// Returns error on I/O failure other than a missing file.
    pub async fn get(self: &Arc<Self>, key: &CacheKey) -> CacheResult<Option<Snapshot>> {
        let Some(lengths) = self.state.lock().entries.peek(key).cloned() else {
            trace!(key = %key, "Disk cache miss");
            return Ok(None);
        };

        let mut files = Vec::with_capacity(self.value_count);
        for index in 0..self.value_count {
            match fs::File::open(self.clean_path(key, index)).await {
                Ok(file) => files.push(file),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(key = %key, index, "Disk cache entry lost its file, dropping it");
                    self.remove(key).await?;
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let pending = {
            let mut state = self.state.lock();
            state.entries.get(key);
            state.redundant_ops += 1;
            state.record(&Op::Read(key.clone()))?;
            self.needs_maintenance(&state)
        };
        if pending {
            self.maintain().await?;
        }

        trace!(key = %key, "Disk cache hit");
        Ok(Some(Snapshot {
            key: key.clone(),
            files,
            lengths,
        }))
    }

    /// Starts an edit of `key`. Returns `None` if another editor holds it.
    ///
    /// # Errors
    /// Returns error if the journal cannot be written.
    pub fn edit(self: &Arc<Self>, key: &CacheKey) -> CacheResult<Option<Editor>> {
        let mut state = self.state.lock();
        if state.editing.contains(key) {
            debug!(key = %key, "Disk cache entry is already being edited");
            return Ok(None);
        }

        state.record(&Op::Dirty(key.clone()))?;
        state.journal.flush()?;
        state.editing.insert(key.clone());

        Ok(Some(Editor {
            store: Arc::clone(self),
            key: key.clone(),
            writers: (0..self.value_count).map(|_| None).collect(),
            done: false,
        }))
    }

    /// Removes an entry. Returns false if it is absent or being edited.
    ///
    /// # Errors
    /// Returns error if the journal cannot be written.
    pub async fn remove(self: &Arc<Self>, key: &CacheKey) -> CacheResult<bool> {
        let store = Arc::clone(self);
        let key = key.clone();
        let removed = tokio::task::spawn_blocking(move || store.remove_blocking(&key))
            .await
            .map_err(std::io::Error::other)??;
        Ok(removed)
    }

    fn remove_blocking(&self, key: &CacheKey) -> std::io::Result<bool> {
        let mut state = self.state.lock();
        if state.editing.contains(key) {
            return Ok(false);
        }
        let Some(lengths) = state.entries.pop(key) else {
            return Ok(false);
        };

        self.delete_files(key);
        state.size -= lengths.iter().sum::<u64>();
        state.redundant_ops += 1;
        state.record(&Op::Remove(key.clone()))?;
        self.compact_if_needed(&mut state)?;
        debug!(key = %key, "Removed entry from disk cache");
        Ok(true)
    }

    /// Forces buffered journal lines to stable storage.
    ///
    /// # Errors
    /// Returns error if the journal cannot be synced.
    pub async fn flush(self: &Arc<Self>) -> CacheResult<()> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let mut state = store.state.lock();
            state.journal.flush()?;
            state.journal.get_ref().sync_data()
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(())
    }

    /// Returns true if a committed entry exists for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Bytes used by committed entries.
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if no entries are committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured budget in bytes.
    #[must_use]
    pub const fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Store directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn clean_path(&self, key: &CacheKey, index: usize) -> PathBuf {
        self.directory.join(format!("{key}.{index}"))
    }

    fn dirty_path(&self, key: &CacheKey, index: usize) -> PathBuf {
        self.directory.join(format!("{key}.{index}.tmp"))
    }

    fn delete_files(&self, key: &CacheKey) {
        for index in 0..self.value_count {
            remove_if_exists(&self.clean_path(key, index));
        }
    }

    fn needs_maintenance(&self, state: &State) -> bool {
        state.size > self.max_size
            || (state.redundant_ops >= COMPACT_THRESHOLD
                && state.redundant_ops >= state.entries.len())
    }

    /// Trims to budget and compacts the journal on the blocking pool.
    async fn maintain(self: &Arc<Self>) -> CacheResult<()> {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let mut state = store.state.lock();
            store.trim_to_size(&mut state)?;
            store.compact_if_needed(&mut state)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(())
    }

    /// Evicts least recently used entries until within budget. Entries being
    /// edited are skipped. Files are deleted under the lock so a concurrent
    /// commit of the same key cannot interleave.
    fn trim_to_size(&self, state: &mut State) -> std::io::Result<()> {
        if state.size <= self.max_size {
            return Ok(());
        }

        let mut excess = state.size - self.max_size;
        let victims: Vec<CacheKey> = state
            .entries
            .iter()
            .rev()
            .filter(|(key, _)| !state.editing.contains(*key))
            .take_while(|(_, lengths)| {
                let proceed = excess > 0;
                excess = excess.saturating_sub(lengths.iter().sum());
                proceed
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in victims {
            if let Some(lengths) = state.entries.pop(&key) {
                self.delete_files(&key);
                state.size -= lengths.iter().sum::<u64>();
                state.redundant_ops += 1;
                state.record(&Op::Remove(key.clone()))?;
                debug!(key = %key, "Evicted entry from disk cache");
            }
        }
        Ok(())
    }

    fn compact_if_needed(&self, state: &mut State) -> std::io::Result<()> {
        if state.redundant_ops < COMPACT_THRESHOLD || state.redundant_ops < state.entries.len() {
            return Ok(());
        }
        state.journal.flush()?;
        state.journal = write_journal(
            &self.directory,
            self.format_version,
            self.value_count,
            &state.entries,
            &state.editing,
        )?;
        trace!(redundant = state.redundant_ops, "Compacted disk cache journal");
        state.redundant_ops = 0;
        Ok(())
    }
}

impl std::fmt::Debug for DiskLruStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskLruStore")
            .field("directory", &self.directory)
            .field("value_count", &self.value_count)
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of an entry's values.
#[derive(Debug)]
pub struct Snapshot {
    key: CacheKey,
    files: Vec<fs::File>,
    lengths: Vec<u64>,
}

impl Snapshot {
    /// Key of the entry.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Recorded length of the value at `index`.
    #[must_use]
    pub fn length(&self, index: usize) -> Option<u64> {
        self.lengths.get(index).copied()
    }

    /// Reads the whole value at `index`.
    ///
    /// # Errors
    /// Returns error if `index` is out of range or the file cannot be read.
    pub async fn read_value(&mut self, index: usize) -> CacheResult<Bytes> {
        let count = self.files.len();
        let file = self
            .files
            .get_mut(index)
            .ok_or(CacheError::InvalidIndex { index, count })?;
        let capacity = usize::try_from(self.lengths[index]).unwrap_or_default();

        file.seek(std::io::SeekFrom::Start(0)).await?;
        let mut buf = Vec::with_capacity(capacity);
        file.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// Exclusive writer for one entry.
///
/// Values are written to temporary files and only become visible on
/// [`commit`](Self::commit). Dropping an editor without committing aborts it.
pub struct Editor {
    store: Arc<DiskLruStore>,
    key: CacheKey,
    writers: Vec<Option<BufWriter<fs::File>>>,
    done: bool,
}

impl Editor {
    /// Key being edited.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns the sink for the value at `index`, creating it on first use.
    ///
    /// # Errors
    /// Returns error if `index` is out of range or the file cannot be created.
    pub async fn write_value(&mut self, index: usize) -> CacheResult<&mut BufWriter<fs::File>> {
        let count = self.writers.len();
        let slot = self
            .writers
            .get_mut(index)
            .ok_or(CacheError::InvalidIndex { index, count })?;

        let writer = match slot.take() {
            Some(writer) => writer,
            None => BufWriter::new(fs::File::create(self.store.dirty_path(&self.key, index)).await?),
        };
        Ok(slot.insert(writer))
    }

    /// Writes `bytes` as the whole value at `index`.
    ///
    /// # Errors
    /// Returns error if the value cannot be written.
    pub async fn set(&mut self, index: usize, bytes: &[u8]) -> CacheResult<()> {
        self.write_value(index).await?.write_all(bytes).await?;
        Ok(())
    }

    /// Publishes the written values and releases the entry.
    ///
    /// Indices not written keep their previous value; a new entry must have
    /// every index written. On failure the edit is aborted.
    ///
    /// # Errors
    /// Returns error if a value is missing or cannot be persisted.
    pub async fn commit(mut self) -> CacheResult<()> {
        match self.persist().await {
            Ok(lengths) => {
                self.done = true;
                let store = Arc::clone(&self.store);
                let pending = {
                    let mut state = store.state.lock();
                    state.editing.remove(&self.key);

                    let new_size: u64 = lengths.iter().sum();
                    if let Some(old) = state.entries.put(self.key.clone(), lengths.clone()) {
                        state.size -= old.iter().sum::<u64>();
                    }
                    state.size += new_size;
                    state.redundant_ops += 1;
                    state.record(&Op::Clean(self.key.clone(), lengths))?;
                    debug!(key = %self.key, size = new_size, "Committed disk cache entry");
                    store.needs_maintenance(&state)
                };

                if pending {
                    store.maintain().await?;
                }
                Ok(())
            }
            Err(e) => {
                self.discard();
                Err(e)
            }
        }
    }

    /// Discards the written values and releases the entry.
    pub fn abort(mut self) {
        self.discard();
    }

    async fn persist(&mut self) -> CacheResult<Vec<u64>> {
        let existing = self.store.state.lock().entries.peek(&self.key).cloned();
        if existing.is_none()
            && let Some(index) = self.writers.iter().position(Option::is_none)
        {
            return Err(CacheError::MissingValue { index });
        }

        let mut lengths = existing.unwrap_or_else(|| vec![0; self.writers.len()]);
        for (index, slot) in self.writers.iter_mut().enumerate() {
            let Some(mut writer) = slot.take() else {
                continue;
            };
            writer.flush().await?;
            writer.get_ref().sync_data().await?;
            drop(writer);

            let clean = self.store.clean_path(&self.key, index);
            fs::rename(self.store.dirty_path(&self.key, index), &clean).await?;
            lengths[index] = fs::metadata(&clean).await?.len();
        }
        Ok(lengths)
    }

    fn discard(&mut self) {
        self.done = true;
        self.writers.clear();
        for index in 0..self.store.value_count {
            remove_if_exists(&self.store.dirty_path(&self.key, index));
        }

        let mut state = self.store.state.lock();
        state.editing.remove(&self.key);
        let op = match state.entries.peek(&self.key) {
            Some(lengths) => Op::Clean(self.key.clone(), lengths.clone()),
            None => Op::Remove(self.key.clone()),
        };
        state.redundant_ops += 2;
        if let Err(e) = state.record(&op) {
            warn!(key = %self.key, error = %e, "Failed to journal aborted edit");
        }
        debug!(key = %self.key, "Aborted disk cache edit");
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        if !self.done {
            self.discard();
        }
    }
}

impl std::fmt::Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Writes a compact journal for `entries` and returns an append handle to it.
fn write_journal(
    directory: &Path,
    format_version: u32,
    value_count: usize,
    entries: &LruCache<CacheKey, Vec<u64>>,
    editing: &HashSet<CacheKey>,
) -> std::io::Result<std::io::BufWriter<std::fs::File>> {
    let tmp_path = directory.join(JOURNAL_TMP_FILE);
    let mut out = std::io::BufWriter::new(std::fs::File::create(&tmp_path)?);

    writeln!(out, "{MAGIC}\n{STORE_VERSION}\n{format_version}\n{value_count}\n")?;
    for (key, lengths) in entries.iter().rev() {
        writeln!(out, "{}", Op::Clean(key.clone(), lengths.clone()))?;
    }
    for key in editing {
        writeln!(out, "{}", Op::Dirty(key.clone()))?;
    }
    out.flush()?;
    out.get_ref().sync_all()?;
    drop(out);

    let journal_path = directory.join(JOURNAL_FILE);
    std::fs::rename(&tmp_path, &journal_path)?;
    Ok(std::io::BufWriter::new(
        std::fs::OpenOptions::new()
            .append(true)
            .open(&journal_path)?,
    ))
}

/// Deletes the journal and every file named after a cache key.
async fn wipe_entries(directory: &Path) -> std::io::Result<()> {
    let mut entries = fs::read_dir(directory).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let stem = name.split('.').next().unwrap_or_default();
        if name == JOURNAL_FILE || name == JOURNAL_TMP_FILE || CacheKey::parse(stem).is_some() {
            fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

fn remove_if_exists(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove cache file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ResourceId;
    use tempfile::TempDir;

    fn key(name: &str) -> CacheKey {
        CacheKey::derive(&ResourceId::new(name))
    }

    async fn create_test_store(max_size: u64) -> (Arc<DiskLruStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = DiskLruStore::open(temp_dir.path(), 1, 1, max_size)
            .await
            .unwrap();
        (store, temp_dir)
    }

    async fn put(store: &Arc<DiskLruStore>, name: &str, data: &[u8]) {
        let mut editor = store.edit(&key(name)).unwrap().unwrap();
        editor.set(0, data).await.unwrap();
        editor.commit().await.unwrap();
    }

    async fn read(store: &Arc<DiskLruStore>, name: &str) -> Option<Bytes> {
        let mut snapshot = store.get(&key(name)).await.unwrap()?;
        Some(snapshot.read_value(0).await.unwrap())
    }

    #[tokio::test]
    async fn test_commit_and_get() {
        let (store, _temp) = create_test_store(1024).await;

        put(&store, "test1", b"test image data").await;

        assert_eq!(read(&store, "test1").await.as_deref(), Some(&b"test image data"[..]));
        assert_eq!(store.size(), 15);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let (store, _temp) = create_test_store(1024).await;
        assert!(store.get(&key("nonexistent")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_abort_discards_value() {
        let (store, temp) = create_test_store(1024).await;

        let mut editor = store.edit(&key("a")).unwrap().unwrap();
        editor.set(0, b"partial").await.unwrap();
        editor.abort();

        assert!(read(&store, "a").await.is_none());
        assert!(!temp.path().join(format!("{}.0.tmp", key("a"))).exists());
        assert!(store.edit(&key("a")).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_drop_aborts_editor() {
        let (store, _temp) = create_test_store(1024).await;

        {
            let mut editor = store.edit(&key("a")).unwrap().unwrap();
            editor.set(0, b"never committed").await.unwrap();
        }

        assert!(read(&store, "a").await.is_none());
        assert!(store.edit(&key("a")).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_edit_is_exclusive() {
        let (store, _temp) = create_test_store(1024).await;

        let first = store.edit(&key("a")).unwrap();
        assert!(first.is_some());
        assert!(store.edit(&key("a")).unwrap().is_none());
        assert!(store.edit(&key("b")).unwrap().is_some());

        drop(first);
        assert!(store.edit(&key("a")).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_commit_without_value_fails() {
        let (store, _temp) = create_test_store(1024).await;

        let editor = store.edit(&key("a")).unwrap().unwrap();
        let err = editor.commit().await.unwrap_err();

        assert!(matches!(err, CacheError::MissingValue { index: 0 }));
        assert!(store.edit(&key("a")).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_overwrite_updates_size() {
        let (store, _temp) = create_test_store(1024).await;

        put(&store, "a", b"hello").await;
        put(&store, "b", b"world!").await;
        assert_eq!(store.size(), 11);

        put(&store, "a", b"hey").await;
        assert_eq!(store.len(), 2);
        assert_eq!(store.size(), 9);
        assert_eq!(read(&store, "a").await.as_deref(), Some(&b"hey"[..]));
    }

    #[tokio::test]
    async fn test_trims_least_recently_used() {
        let (store, _temp) = create_test_store(10).await;

        put(&store, "a", b"1234").await;
        put(&store, "b", b"1234").await;
        assert!(read(&store, "a").await.is_some());
        put(&store, "c", b"1234").await;

        assert!(store.contains(&key("a")));
        assert!(!store.contains(&key("b")));
        assert!(store.contains(&key("c")));
        assert_eq!(store.size(), 8);
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, temp) = create_test_store(1024).await;

        put(&store, "a", b"data").await;
        assert!(store.remove(&key("a")).await.unwrap());
        assert!(!store.remove(&key("a")).await.unwrap());

        assert!(read(&store, "a").await.is_none());
        assert!(!temp.path().join(format!("{}.0", key("a"))).exists());
        assert_eq!(store.size(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_survives_eviction() {
        let (store, _temp) = create_test_store(10).await;

        put(&store, "a", b"12345678").await;
        let mut snapshot = store.get(&key("a")).await.unwrap().unwrap();
        put(&store, "b", b"12345678").await;

        assert!(!store.contains(&key("a")));
        #[cfg(unix)]
        assert_eq!(&snapshot.read_value(0).await.unwrap()[..], b"12345678");
        assert_eq!(snapshot.length(0), Some(8));
    }

    #[tokio::test]
    async fn test_journal_replay_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = DiskLruStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
            put(&store, "a", b"first").await;
            put(&store, "b", b"second").await;
            put(&store, "gone", b"x").await;
            store.remove(&key("gone")).await.unwrap();
            let _ = read(&store, "a").await;
            store.flush().await.unwrap();
        }

        let store = DiskLruStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.size(), 11);
        assert_eq!(read(&store, "b").await.as_deref(), Some(&b"second"[..]));
        assert!(!store.contains(&key("gone")));
    }

    #[tokio::test]
    async fn test_replay_preserves_lru_order() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = DiskLruStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
            put(&store, "a", b"1234").await;
            put(&store, "b", b"1234").await;
            let _ = read(&store, "a").await;
            store.flush().await.unwrap();
        }

        let store = DiskLruStore::open(temp_dir.path(), 1, 1, 10).await.unwrap();
        put(&store, "c", b"1234").await;

        assert!(store.contains(&key("a")));
        assert!(!store.contains(&key("b")));
    }

    #[tokio::test]
    async fn test_dirty_entry_deleted_on_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let dirty_file = temp_dir.path().join(format!("{}.0.tmp", key("a")));
        {
            let store = DiskLruStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
            let mut editor = store.edit(&key("a")).unwrap().unwrap();
            editor.set(0, b"half").await.unwrap();
            editor.write_value(0).await.unwrap().flush().await.unwrap();
            // Simulate a crash: the editor never commits or aborts.
            std::mem::forget(editor);
        }
        assert!(dirty_file.exists());

        let store = DiskLruStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
        assert!(!store.contains(&key("a")));
        assert!(!dirty_file.exists());
    }

    #[tokio::test]
    async fn test_corrupt_journal_rejected() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(JOURNAL_FILE), "not a journal\n").unwrap();

        let err = DiskLruStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap_err();
        assert!(matches!(err, CacheError::CorruptJournal(_)));
    }

    #[tokio::test]
    async fn test_corrupt_journal_line_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let journal = format!("{MAGIC}\n{STORE_VERSION}\n1\n1\n\nCLEAN zzz 4\n");
        std::fs::write(temp_dir.path().join(JOURNAL_FILE), journal).unwrap();

        let err = DiskLruStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap_err();
        assert!(matches!(err, CacheError::CorruptJournal(_)));
    }

    #[tokio::test]
    async fn test_truncated_last_line_ignored() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = DiskLruStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
            put(&store, "a", b"1234").await;
            store.flush().await.unwrap();
        }
        let journal_path = temp_dir.path().join(JOURNAL_FILE);
        let mut content = std::fs::read_to_string(&journal_path).unwrap();
        content.push_str("CLEAN ab");
        std::fs::write(&journal_path, content).unwrap();

        let store = DiskLruStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
        assert!(store.contains(&key("a")));
    }

    #[tokio::test]
    async fn test_format_version_change_starts_over() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = DiskLruStore::open(temp_dir.path(), 1, 1, 1024).await.unwrap();
            put(&store, "a", b"1234").await;
            store.flush().await.unwrap();
        }

        let store = DiskLruStore::open(temp_dir.path(), 2, 1, 1024).await.unwrap();
        assert!(store.is_empty());
        assert!(!temp_dir.path().join(format!("{}.0", key("a"))).exists());
    }

    #[tokio::test]
    async fn test_multiple_values_per_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = DiskLruStore::open(temp_dir.path(), 1, 2, 1024).await.unwrap();

        let mut editor = store.edit(&key("a")).unwrap().unwrap();
        editor.set(0, b"pixels").await.unwrap();
        editor.set(1, b"meta").await.unwrap();
        editor.commit().await.unwrap();

        let mut editor = store.edit(&key("a")).unwrap().unwrap();
        editor.set(1, b"meta2").await.unwrap();
        editor.commit().await.unwrap();

        let mut snapshot = store.get(&key("a")).await.unwrap().unwrap();
        assert_eq!(&snapshot.read_value(0).await.unwrap()[..], b"pixels");
        assert_eq!(&snapshot.read_value(1).await.unwrap()[..], b"meta2");
        assert!(matches!(
            snapshot.read_value(2).await,
            Err(CacheError::InvalidIndex { index: 2, count: 2 })
        ));
        assert_eq!(store.size(), 11);
    }

    #[tokio::test]
    async fn test_journal_compaction_keeps_entries() {
        let (store, temp) = create_test_store(1024 * 1024).await;
        put(&store, "a", b"1234").await;

        for _ in 0..(COMPACT_THRESHOLD + 10) {
            let _ = read(&store, "a").await;
        }
        store.flush().await.unwrap();

        let lines = std::fs::read_to_string(temp.path().join(JOURNAL_FILE))
            .unwrap()
            .lines()
            .count();
        assert!(lines < COMPACT_THRESHOLD);

        let reopened = DiskLruStore::open(temp.path(), 1, 1, 1024 * 1024).await.unwrap();
        assert!(reopened.contains(&key("a")));
    }

    #[tokio::test]
    async fn test_remove_compacts_journal() {
        let (store, temp) = create_test_store(1024 * 1024).await;
        put(&store, "a", b"1234").await;
        put(&store, "b", b"5678").await;

        for _ in 0..(COMPACT_THRESHOLD / 2) {
            store.edit(&key("c")).unwrap().unwrap().abort();
        }
        assert!(store.remove(&key("b")).await.unwrap());
        store.flush().await.unwrap();

        let journal = std::fs::read_to_string(temp.path().join(JOURNAL_FILE)).unwrap();
        assert_eq!(journal.lines().count(), 6);
        assert!(journal.contains(&format!("CLEAN {} 4", key("a"))));

        let reopened = DiskLruStore::open(temp.path(), 1, 1, 1024 * 1024).await.unwrap();
        assert!(reopened.contains(&key("a")));
        assert!(!reopened.contains(&key("b")));
    }

    #[tokio::test]
    async fn test_reopen_with_smaller_budget_trims() {
        let (store, temp) = create_test_store(1024).await;
        put(&store, "old", b"0123456789").await;
        put(&store, "new", b"0123456789").await;
        store.flush().await.unwrap();
        drop(store);

        let reopened = DiskLruStore::open(temp.path(), 1, 1, 15).await.unwrap();

        assert_eq!(reopened.len(), 1);
        assert!(reopened.contains(&key("new")));
        assert!(!temp.path().join(format!("{}.0", key("old"))).exists());
    }

    #[test]
    fn test_op_round_trip() {
        let op = Op::Clean(key("a"), vec![1, 22, 333]);
        assert_eq!(Op::parse(&op.to_string()), Some(op));
        assert_eq!(Op::parse("READ"), None);
        assert_eq!(Op::parse(&format!("DIRTY {} extra", key("a"))), None);
    }
}
