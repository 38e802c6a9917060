//! Cache Module
//!
//! Persistent, size-bounded cache of API responses and downloads with
//! per-read freshness checks.

pub mod codec;
mod entry;
mod lru;
mod stats;
mod store;


// Re-export public types
pub use codec::{BlobCodec, RecordCodec, ResponseCodec};
pub use entry::{from_ticks, to_ticks, BlobItem, CacheItem, ResponseItem};
pub use stats::CacheStats;
pub use store::PersistentCache;

// == Public Constants ==
/// Default size ceiling for a cache file
pub const DEFAULT_SIZE_LIMIT_BYTES: u64 = 50 * 1024 * 1024; // 50 MiB

/// File name of the API response cache
pub const RESPONSE_CACHE_FILE: &str = "responseCache.dat";

/// File name of the download cache
pub const DOWNLOAD_CACHE_FILE: &str = "downloadCache.dat";
