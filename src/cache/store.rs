//! Cache Store Module
//!
//! In-memory index of cached items, bounded by total size and persisted to a
//! single flat file.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Duration;
use tracing::{debug, info, warn};

use crate::cache::codec::{read_string, write_string, RecordCodec};
use crate::cache::entry::{now, CacheItem};
use crate::cache::stats::{CacheStats, LookupCounters};
use crate::cache::lru::LruTracker;
use crate::error::{CacheError, Result};

// == Persistent Cache ==
/// Size-bounded cache table with single-file persistence.
///
/// Every mutation that changes membership rewrites the backing file. Callers
/// share one instance behind a lock; `peek` only needs shared access.
pub struct PersistentCache<C: RecordCodec> {
    /// Serialization strategy for the cached items
    codec: C,
    /// Key-value storage
    entries: HashMap<String, C::Item>,
    /// Recency order used for eviction and for the on-disk record order
    lru: LruTracker,
    /// Hit/miss counters
    counters: LookupCounters,
    /// Entries evicted since construction
    evictions: u64,
    /// Sum of `size_bytes` over `entries`
    total_size_bytes: u64,
    /// Ceiling enforced by eviction after every write
    size_limit_bytes: u64,
    /// Backing file, `None` for a memory-only cache
    path: Option<PathBuf>,
}

impl<C: RecordCodec> PersistentCache<C> {
    // == Constructors ==
    /// Opens the cache stored at `path`, loading whatever it already holds.
    ///
    /// Fails with `CacheUnavailable` only when the parent directory cannot be
    /// created. A missing or unreadable file yields an empty cache, and a
    /// damaged file yields the records that precede the damage.
    pub fn open(path: impl Into<PathBuf>, size_limit_bytes: u64, codec: C) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| CacheError::CacheUnavailable {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut cache = Self::in_memory(size_limit_bytes, codec);
        cache.path = Some(path);
        cache.load();
        Ok(cache)
    }

    /// Creates an empty cache with no backing file.
    pub fn in_memory(size_limit_bytes: u64, codec: C) -> Self {
        Self {
            codec,
            entries: HashMap::new(),
            lru: LruTracker::new(),
            counters: LookupCounters::default(),
            evictions: 0,
            total_size_bytes: 0,
            size_limit_bytes,
            path: None,
        }
    }

    /// Stops persisting; the cache keeps its entries in memory only.
    ///
    /// Returns the file it was previously bound to.
    pub fn detach(&mut self) -> Option<PathBuf> {
        self.path.take()
    }

    // == Lookups ==
    /// Returns the entry for `key` if it is fresh, without touching recency.
    ///
    /// `max_age` of `None` means any age is fresh. A stale entry stays in the
    /// table until it is overwritten or evicted.
    pub fn peek(&self, key: &str, max_age: Option<Duration>) -> Option<&C::Item> {
        match self.entries.get(key) {
            Some(item) if is_fresh(item, max_age) => {
                self.counters.record_hit();
                debug!("Cache hit: {}", key);
                Some(item)
            }
            Some(_) => {
                self.counters.record_miss();
                debug!("Cache entry stale: {}", key);
                None
            }
            None => {
                self.counters.record_miss();
                debug!("Cache miss: {}", key);
                None
            }
        }
    }

    /// Returns the entry for `key` if it is fresh.
    ///
    /// With `update_last_access` set, a hit also marks the entry as most
    /// recently used. Its `created_at` is never changed.
    pub fn get(
        &mut self,
        key: &str,
        max_age: Option<Duration>,
        update_last_access: bool,
    ) -> Option<&C::Item> {
        self.peek(key, max_age)?;
        if update_last_access {
            self.lru.touch(key);
        }
        self.entries.get(key)
    }

    // == Put ==
    /// Stores `item` under `key`, evicts to fit the size limit, and persists.
    ///
    /// An item larger than the limit on its own is still kept once every
    /// other entry has been evicted. An item the codec cannot write is
    /// rejected with `UnencodableItem` and leaves the cache untouched.
    pub fn put(&mut self, key: impl Into<String>, item: C::Item) -> Result<()> {
        self.codec
            .check(&item)
            .map_err(|e| CacheError::UnencodableItem(e.to_string()))?;
        let key = key.into();
        self.insert_entry(key, item);
        self.evict_to_fit();
        self.save()
    }

    // == Remove ==
    /// Deletes the entry for `key`, persisting if anything was removed.
    ///
    /// Returns whether an entry existed.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        let Some(item) = self.entries.remove(key) else {
            return Ok(false);
        };
        self.lru.remove(key);
        self.total_size_bytes -= item.size_bytes();
        self.save()?;
        Ok(true)
    }

    // == Flush All ==
    /// Empties the cache and deletes the backing file.
    pub fn flush_all(&mut self) -> Result<()> {
        self.entries.clear();
        self.lru.clear();
        self.total_size_bytes = 0;

        if let Some(path) = &self.path {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(CacheError::PersistFailure {
                        path: path.clone(),
                        source,
                    })
                }
            }
        }

        info!("Cache flushed");
        Ok(())
    }

    // == Load ==
    /// Replaces the table with the contents of the backing file.
    ///
    /// Reading stops at the first corrupt record; everything before it is
    /// kept. I/O errors leave the cache empty. If the file holds more than
    /// the size limit, the oldest entries are evicted and the trimmed table
    /// is written back. Returns the number of entries kept.
    pub fn load(&mut self) -> usize {
        self.entries.clear();
        self.lru.clear();
        self.total_size_bytes = 0;

        let Some(path) = self.path.clone() else {
            return 0;
        };

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No cache file at {}", path.display());
                return 0;
            }
            Err(e) => {
                warn!(
                    "Unable to read cache file {}, starting empty: {}",
                    path.display(),
                    e
                );
                return 0;
            }
        };

        let mut input = bytes.as_slice();
        while !input.is_empty() {
            match self.read_record(&mut input) {
                Ok((key, item)) => self.insert_entry(key, item),
                Err(e) => {
                    warn!(
                        "Cache file {} damaged after {} records, discarding the rest: {}",
                        path.display(),
                        self.entries.len(),
                        e
                    );
                    break;
                }
            }
        }

        // The limit may have been lowered since the file was written
        if self.evict_to_fit() > 0 {
            if let Err(e) = self.save() {
                warn!("Failed to rewrite cache after trimming on load: {}", e);
            }
        }

        info!(
            "Loaded {} cache entries ({} bytes) from {}",
            self.entries.len(),
            self.total_size_bytes,
            path.display()
        );
        self.entries.len()
    }

    // == Save ==
    /// Rewrites the backing file with every entry, least recently used first.
    ///
    /// The file is written beside the target and renamed over it, so readers
    /// never observe a half-written cache. No-op for a memory-only cache.
    pub fn save(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let tmp = tmp_path(path);
        self.write_file(&tmp)
            .and_then(|()| fs::rename(&tmp, path))
            .map_err(|source| {
                let _ = fs::remove_file(&tmp);
                CacheError::PersistFailure {
                    path: path.to_path_buf(),
                    source,
                }
            })
    }

    // == Accessors ==
    /// Returns true if `key` is physically present, fresh or not.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.total_size_bytes
    }

    pub fn size_limit_bytes(&self) -> u64 {
        self.size_limit_bytes
    }

    /// Backing file, if the cache is persistent.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Keys from least to most recently used; the next eviction comes first.
    pub fn keys_by_recency(&self) -> impl Iterator<Item = &str> {
        self.lru.iter_oldest_first()
    }

    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits(),
            misses: self.counters.misses(),
            evictions: self.evictions,
            total_entries: self.entries.len(),
            total_size_bytes: self.total_size_bytes,
        }
    }

    // == Internals ==
    /// Inserts or replaces an entry, keeping the running size total.
    fn insert_entry(&mut self, key: String, item: C::Item) {
        let size = item.size_bytes();
        self.lru.touch(&key);
        if let Some(previous) = self.entries.insert(key, item) {
            self.total_size_bytes -= previous.size_bytes();
        }
        self.total_size_bytes += size;
    }

    /// Evicts least recently used entries until the total fits the limit or
    /// a single entry is left. Returns the number evicted.
    ///
    /// Recency is the order of puts and touching reads, not `created_at`: an
    /// item put with an older explicit timestamp still counts as newest.
    /// Loaded entries take their order from the file.
    fn evict_to_fit(&mut self) -> usize {
        let mut evicted = 0;
        while self.total_size_bytes > self.size_limit_bytes && self.lru.len() > 1 {
            let Some(key) = self.lru.evict_oldest() else {
                break;
            };
            if let Some(item) = self.entries.remove(&key) {
                self.total_size_bytes -= item.size_bytes();
                evicted += 1;
                debug!("Evicted {} ({} bytes)", key, item.size_bytes());
            }
        }
        self.evictions += evicted as u64;
        evicted
    }

    fn read_record(&self, input: &mut &[u8]) -> Result<(String, C::Item)> {
        let key = read_string(input)?;
        let item = self.codec.read(input)?;
        Ok((key, item))
    }

    fn write_file(&self, target: &Path) -> io::Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = BufWriter::new(File::create(target)?);
        for key in self.lru.iter_oldest_first() {
            if let Some(item) = self.entries.get(key) {
                write_string(&mut out, key)?;
                self.codec.write(&mut out, item)?;
            }
        }
        out.flush()?;
        out.get_ref().sync_all()
    }
}

impl<C: RecordCodec> std::fmt::Debug for PersistentCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache")
            .field("entries", &self.entries.len())
            .field("total_size_bytes", &self.total_size_bytes)
            .field("size_limit_bytes", &self.size_limit_bytes)
            .field("path", &self.path)
            .finish()
    }
}

// == Utility Functions ==
/// Fresh when no older than `max_age`; `None` is unbounded.
fn is_fresh<I: CacheItem>(item: &I, max_age: Option<Duration>) -> bool {
    match max_age {
        Some(max_age) => now() - item.created_at() <= max_age,
        None => true,
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
