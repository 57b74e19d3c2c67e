//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};
use url::Url;

use crate::net::{Request, Response};

/// Identity of a cached request: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub method: String,
  pub url: String,
}

impl CacheKey {
  pub fn for_request(request: &Request) -> Self {
    Self {
      method: request.method.as_str().to_string(),
      url: request.fetch_url(),
    }
  }

  /// Key for a GET of `url`, as used for shell lookups.
  pub fn get(url: &Url) -> Self {
    Self::for_request(&Request::get(url.clone()))
  }

  /// SHA256 hash for stable, fixed-length storage keys
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A stored response snapshot.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Listing row for a partition entry.
#[derive(Debug, Clone)]
pub struct EntrySummary {
  pub method: String,
  pub url: String,
  pub status: u16,
  pub size: usize,
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// A backend holds any number of named partitions. Every operation is a
/// single atomic step; writes are unconditional overwrites.
pub trait CacheStorage: Send + Sync {
  /// Create the partition if it does not exist yet.
  fn open(&self, partition: &str) -> Result<()>;

  /// All partition names, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Drop a partition and every entry in it. Returns whether it existed.
  fn delete(&self, partition: &str) -> Result<bool>;

  /// Look up an entry. A missing partition is a miss.
  fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CachedResponse>>;

  /// Store an entry, creating the partition if needed.
  fn put(&self, partition: &str, key: &CacheKey, response: &Response) -> Result<()>;

  /// List the entries of a partition.
  fn entries(&self, partition: &str) -> Result<Vec<EntrySummary>>;
}

/// Result of a fetch through the cache, including where the response came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a cache hit served without a network attempt.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Live network response
  Network,
  /// Cache hit, network not consulted
  Cache,
  /// Network failed, serving a cached copy
  Offline,
}
