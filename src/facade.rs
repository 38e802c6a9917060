//! Cache Facade
//!
//! Process-wide entry point the HTTP layer talks to: lazily opens the
//! persistent store, applies the configured timeout, and degrades every
//! cache failure to a plain network fetch.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Duration;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{
    BlobCodec, CacheItem, CacheStats, PersistentCache, RecordCodec, ResponseCodec,
    DOWNLOAD_CACHE_FILE, RESPONSE_CACHE_FILE,
};
use crate::config::{secs_to_duration, CacheConfig};
use crate::error::{CacheError, Result};

type Payload<C> = <<C as RecordCodec>::Item as CacheItem>::Payload;

/// Facade over the API response cache
pub type ResponseCache = Cache<ResponseCodec>;

/// Facade over the download cache
pub type BlobCache = Cache<BlobCodec>;

static RESPONSES: Lazy<ResponseCache> =
    Lazy::new(|| Cache::responses(&CacheConfig::from_env()));

static DOWNLOADS: Lazy<BlobCache> = Lazy::new(|| Cache::downloads(&CacheConfig::from_env()));

/// Process-wide API response cache, configured from the environment.
pub fn responses() -> &'static ResponseCache {
    &RESPONSES
}

/// Process-wide download cache, configured from the environment.
pub fn downloads() -> &'static BlobCache {
    &DOWNLOADS
}

/// Values read once when the store is built.
#[derive(Debug)]
struct StoreSettings {
    location: PathBuf,
    size_limit_bytes: u64,
    frozen: bool,
}

// == Cache ==
/// Lazily-opened persistent cache with a bypass switch.
///
/// Location and size limit may be changed until the first cache access;
/// after that they are frozen for the life of the instance. The timeout
/// and the disable switch stay live.
pub struct Cache<C: RecordCodec + Clone> {
    codec: C,
    file_name: String,
    settings: Mutex<StoreSettings>,
    timeout: Mutex<Option<Duration>>,
    disabled: AtomicBool,
    touch_on_read: bool,
    store: OnceCell<RwLock<PersistentCache<C>>>,
}

impl Cache<ResponseCodec> {
    /// Response cache stored as `responseCache.dat` under the configured location.
    pub fn responses(config: &CacheConfig) -> Self {
        Self::new(config, ResponseCodec, RESPONSE_CACHE_FILE)
    }
}

impl Cache<BlobCodec> {
    /// Download cache stored as `downloadCache.dat` under the configured location.
    pub fn downloads(config: &CacheConfig) -> Self {
        Self::new(config, BlobCodec, DOWNLOAD_CACHE_FILE)
    }
}

impl<C: RecordCodec + Clone> Cache<C> {
    // == Constructor ==
    /// Creates a facade; nothing touches the filesystem until first use.
    pub fn new(config: &CacheConfig, codec: C, file_name: impl Into<String>) -> Self {
        Self {
            codec,
            file_name: file_name.into(),
            settings: Mutex::new(StoreSettings {
                location: config.location.clone(),
                size_limit_bytes: config.size_limit_bytes,
                frozen: false,
            }),
            timeout: Mutex::new(config.timeout()),
            disabled: AtomicBool::new(config.disabled.unwrap_or(false)),
            touch_on_read: config.touch_on_read,
            store: OnceCell::new(),
        }
    }

    // == Fetch Through ==
    /// Returns the cached payload for `key` if it is no older than `max_age`,
    /// otherwise calls `fetch` and caches its result.
    ///
    /// When the cache is disabled `fetch` is always called and the store is
    /// not consulted. Fetch errors are returned as-is and nothing is cached.
    pub fn get_or_fetch<F>(
        &self,
        key: &str,
        max_age: Option<Duration>,
        fetch: F,
    ) -> anyhow::Result<Payload<C>>
    where
        F: FnOnce() -> anyhow::Result<Payload<C>>,
    {
        if self.is_disabled() {
            debug!("Cache disabled, fetching {}", key);
            return fetch();
        }
        if let Some(hit) = self.get(key, max_age) {
            return Ok(hit);
        }

        let payload = fetch()?;
        self.put(key, payload.clone());
        Ok(payload)
    }

    /// [`Cache::get_or_fetch`] with the configured timeout.
    pub fn get_or_fetch_default<F>(&self, key: &str, fetch: F) -> anyhow::Result<Payload<C>>
    where
        F: FnOnce() -> anyhow::Result<Payload<C>>,
    {
        self.get_or_fetch(key, self.timeout(), fetch)
    }

    /// Async form of [`Cache::get_or_fetch`] for non-blocking HTTP clients.
    ///
    /// No lock is held while `fetch` is awaited, so concurrent misses on the
    /// same key may both fetch; the later write wins.
    pub async fn get_or_fetch_async<F, Fut>(
        &self,
        key: &str,
        max_age: Option<Duration>,
        fetch: F,
    ) -> anyhow::Result<Payload<C>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Payload<C>>>,
    {
        if self.is_disabled() {
            debug!("Cache disabled, fetching {}", key);
            return fetch().await;
        }
        if let Some(hit) = self.get(key, max_age) {
            return Ok(hit);
        }

        let payload = fetch().await?;
        self.put(key, payload.clone());
        Ok(payload)
    }

    // == Get ==
    /// Looks up a fresh payload. Always `None` while disabled.
    pub fn get(&self, key: &str, max_age: Option<Duration>) -> Option<Payload<C>> {
        if self.is_disabled() {
            return None;
        }

        let store = self.store();
        if self.touch_on_read {
            store
                .write()
                .get(key, max_age, true)
                .map(|item| item.payload().clone())
        } else {
            store
                .read()
                .peek(key, max_age)
                .map(|item| item.payload().clone())
        }
    }

    // == Put ==
    /// Caches `payload` under `key`. Ignored while disabled.
    ///
    /// If the backing file cannot be written the store is detached from it
    /// and keeps caching in memory for the rest of the session. A key the
    /// record format cannot hold is skipped.
    pub fn put(&self, key: &str, payload: Payload<C>) {
        if self.is_disabled() {
            return;
        }

        let item = C::Item::from_payload(key, payload);
        let mut store = self.store().write();
        match store.put(key, item) {
            Ok(()) => {}
            Err(CacheError::UnencodableItem(reason)) => {
                warn!("Not caching {:?}: {}", key, reason);
            }
            Err(e) => {
                warn!("{}; caching in memory only for this session", e);
                store.detach();
            }
        }
    }

    // == Invalidate ==
    /// Removes one entry. Returns whether it existed.
    pub fn invalidate(&self, key: &str) -> Result<bool> {
        self.store().write().remove(key)
    }

    /// Removes every entry and the backing file.
    pub fn invalidate_all(&self) -> Result<()> {
        self.store().write().flush_all()
    }

    // == Switches ==
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    /// Turns bypass mode on or off. Takes effect immediately.
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Relaxed);
        info!(
            "Cache {} {}",
            self.file_name,
            if disabled { "disabled" } else { "enabled" }
        );
    }

    // == Settings ==
    /// Freshness window used by [`Cache::get_or_fetch_default`].
    pub fn timeout(&self) -> Option<Duration> {
        *self.timeout.lock()
    }

    /// Sets the freshness window; `None` never expires entries.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        *self.timeout.lock() = timeout;
    }

    /// Sets the freshness window in whole seconds; `0` never expires entries.
    pub fn set_timeout_secs(&self, secs: u64) {
        self.set_timeout((secs > 0).then(|| secs_to_duration(secs)));
    }

    pub fn location(&self) -> PathBuf {
        self.settings.lock().location.clone()
    }

    /// Full path of the backing file.
    pub fn file_path(&self) -> PathBuf {
        self.settings.lock().location.join(&self.file_name)
    }

    /// Moves the cache directory. Returns false, changing nothing, once the
    /// store has been opened.
    pub fn set_location(&self, location: impl AsRef<Path>) -> bool {
        let mut settings = self.settings.lock();
        if settings.frozen {
            warn!(
                "Cache location is fixed at {} until restart",
                settings.location.display()
            );
            return false;
        }
        settings.location = location.as_ref().to_path_buf();
        true
    }

    pub fn size_limit_bytes(&self) -> u64 {
        self.settings.lock().size_limit_bytes
    }

    /// Changes the size ceiling. Returns false, changing nothing, once the
    /// store has been opened.
    pub fn set_size_limit_bytes(&self, size_limit_bytes: u64) -> bool {
        let mut settings = self.settings.lock();
        if settings.frozen {
            warn!(
                "Cache size limit is fixed at {} bytes until restart",
                settings.size_limit_bytes
            );
            return false;
        }
        settings.size_limit_bytes = size_limit_bytes;
        true
    }

    // == Introspection ==
    /// Returns true once the store has been opened.
    pub fn is_initialized(&self) -> bool {
        self.store.get().is_some()
    }

    /// Current statistics; all zero before the store is opened.
    pub fn stats(&self) -> CacheStats {
        self.store
            .get()
            .map(|store| store.read().stats())
            .unwrap_or_default()
    }

    /// Backing file of the open store, `None` if unopened or memory-only.
    pub fn persisted_path(&self) -> Option<PathBuf> {
        self.store
            .get()
            .and_then(|store| store.read().path().map(Path::to_path_buf))
    }

    // == Internals ==
    fn store(&self) -> &RwLock<PersistentCache<C>> {
        self.store.get_or_init(|| {
            let mut settings = self.settings.lock();
            settings.frozen = true;

            let path = settings.location.join(&self.file_name);
            let store = match PersistentCache::open(
                &path,
                settings.size_limit_bytes,
                self.codec.clone(),
            ) {
                Ok(store) => {
                    info!(
                        "Opened cache {} with {} entries (limit {} bytes)",
                        path.display(),
                        store.len(),
                        settings.size_limit_bytes
                    );
                    store
                }
                Err(e) => {
                    warn!("{}; caching in memory only for this session", e);
                    PersistentCache::in_memory(settings.size_limit_bytes, self.codec.clone())
                }
            };
            RwLock::new(store)
        })
    }
}

impl<C: RecordCodec + Clone> std::fmt::Debug for Cache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("file", &self.file_path())
            .field("disabled", &self.is_disabled())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
