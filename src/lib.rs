//! Photo API Cache - persistent response cache for a photo-sharing REST client
//!
//! Memoizes API responses and downloads on disk, bounded by total size and
//! checked for freshness on every read.

pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod logging;

pub use cache::{
    BlobCodec, BlobItem, CacheItem, CacheStats, PersistentCache, RecordCodec, ResponseCodec,
    ResponseItem,
};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use facade::{downloads, responses, BlobCache, Cache, ResponseCache};
