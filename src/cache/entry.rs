//! Cache Entry Module
//!
//! Defines the cached artifact kinds and the tick clock their timestamps use.

use chrono::{DateTime, Utc};

// == Tick Clock ==
/// Number of 100-nanosecond ticks in one second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Tick count of 1970-01-01T00:00:00Z, counted from 0001-01-01T00:00:00Z.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Converts a timestamp to 100-ns ticks since 0001-01-01T00:00:00Z.
///
/// Sub-tick precision is truncated; times beyond the `i64` tick range saturate.
pub fn to_ticks(time: DateTime<Utc>) -> i64 {
    UNIX_EPOCH_TICKS
        .saturating_add(time.timestamp().saturating_mul(TICKS_PER_SECOND))
        .saturating_add(i64::from(time.timestamp_subsec_nanos() / 100))
}

/// Converts a tick count back to a timestamp.
///
/// Returns `None` when the tick count falls outside chrono's range.
pub fn from_ticks(ticks: i64) -> Option<DateTime<Utc>> {
    let relative = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    let secs = relative.div_euclid(TICKS_PER_SECOND);
    let nanos = (relative.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Returns the current time truncated to tick precision, so it survives an
/// encode/decode cycle unchanged.
pub fn now() -> DateTime<Utc> {
    truncate_to_tick(Utc::now())
}

fn truncate_to_tick(time: DateTime<Utc>) -> DateTime<Utc> {
    from_ticks(to_ticks(time)).unwrap_or(time)
}

// == Cache Item ==
/// Capability shared by every artifact the persistent cache can hold.
pub trait CacheItem: Clone + Send + Sync + 'static {
    /// Raw artifact handed over by the fetching layer.
    type Payload: Clone + Send;

    /// Wraps a freshly fetched payload, stamped with the current time.
    fn from_payload(url: &str, payload: Self::Payload) -> Self;

    /// Borrows the cached payload.
    fn payload(&self) -> &Self::Payload;

    /// Wall-clock time the artifact was fetched.
    fn created_at(&self) -> DateTime<Utc>;

    /// Bytes this item counts against the cache's size limit.
    fn size_bytes(&self) -> u64;
}

// == Response Item ==
/// A cached API response body, keyed by the request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseItem {
    /// Fully-resolved request URL
    pub url: String,
    /// Raw response body
    pub response: String,
    /// Time the response was fetched
    pub created_at: DateTime<Utc>,
}

impl ResponseItem {
    /// Creates a response item stamped with the current time.
    pub fn new(url: impl Into<String>, response: impl Into<String>) -> Self {
        Self::with_created_at(url, response, now())
    }

    /// Creates a response item with an explicit creation time.
    pub fn with_created_at(
        url: impl Into<String>,
        response: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.into(),
            response: response.into(),
            created_at: truncate_to_tick(created_at),
        }
    }
}

impl CacheItem for ResponseItem {
    type Payload = String;

    fn from_payload(url: &str, payload: String) -> Self {
        Self::new(url, payload)
    }

    fn payload(&self) -> &String {
        &self.response
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn size_bytes(&self) -> u64 {
        self.response.len() as u64
    }
}

// == Blob Item ==
/// A cached binary download (photo bytes and the like).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobItem {
    /// Source URL of the download
    pub url: String,
    /// Downloaded bytes
    pub data: Vec<u8>,
    /// Time the download completed
    pub created_at: DateTime<Utc>,
}

impl BlobItem {
    /// Creates a blob item stamped with the current time.
    pub fn new(url: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::with_created_at(url, data, now())
    }

    /// Creates a blob item with an explicit creation time.
    pub fn with_created_at(
        url: impl Into<String>,
        data: impl Into<Vec<u8>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.into(),
            data: data.into(),
            created_at: truncate_to_tick(created_at),
        }
    }
}

impl CacheItem for BlobItem {
    type Payload = Vec<u8>;

    fn from_payload(url: &str, payload: Vec<u8>) -> Self {
        Self::new(url, payload)
    }

    fn payload(&self) -> &Vec<u8> {
        &self.data
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}
