//! Configuration Module
//!
//! Cache location, size limit, timeout, and the disable switch.

use std::env;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::cache::DEFAULT_SIZE_LIMIT_BYTES;

/// Default freshness window for cached responses
pub const DEFAULT_TIMEOUT_SECS: u64 = 60 * 60;

/// Cache configuration parameters.
///
/// Values can come from environment variables via [`CacheConfig::from_env`]
/// or from any serde format the embedding application's config loader uses.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the cache files
    pub location: PathBuf,
    /// Size ceiling per cache file, in bytes
    pub size_limit_bytes: u64,
    /// Maximum age of a usable entry in seconds; `None` never expires
    pub timeout_secs: Option<u64>,
    /// Bypass switch; `None` when the configuration did not say
    pub disabled: Option<bool>,
    /// Whether reads refresh an entry's recency for eviction
    pub touch_on_read: bool,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `PHOTO_CACHE_LOCATION` - Cache directory (default: per-user data dir)
    /// - `PHOTO_CACHE_SIZE_LIMIT` - Size limit in bytes (default: 50 MiB)
    /// - `PHOTO_CACHE_TIMEOUT_SECS` - Freshness window, `0` = unbounded (default: 3600)
    /// - `PHOTO_CACHE_DISABLED` - `true`/`false` (default: unset)
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            location: var("PHOTO_CACHE_LOCATION")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.location),
            size_limit_bytes: var("PHOTO_CACHE_SIZE_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.size_limit_bytes),
            timeout_secs: match var("PHOTO_CACHE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
                Some(0) => None,
                Some(secs) => Some(secs),
                None => defaults.timeout_secs,
            },
            disabled: var("PHOTO_CACHE_DISABLED").and_then(|v| parse_bool(&v)),
            touch_on_read: defaults.touch_on_read,
        }
    }

    /// Freshness window as a duration, `None` when unbounded.
    pub fn timeout(&self) -> Option<chrono::Duration> {
        self.timeout_secs.map(secs_to_duration)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            location: default_location(),
            size_limit_bytes: DEFAULT_SIZE_LIMIT_BYTES,
            timeout_secs: Some(DEFAULT_TIMEOUT_SECS),
            disabled: None,
            touch_on_read: true,
        }
    }
}

/// Per-user application data directory, or a temp directory fallback.
pub fn default_location() -> PathBuf {
    ProjectDirs::from("", "", "photo_api_cache")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| env::temp_dir().join("photo_api_cache"))
}

/// Converts whole seconds to a duration, saturating at chrono's maximum.
pub(crate) fn secs_to_duration(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
