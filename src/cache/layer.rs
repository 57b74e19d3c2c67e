//! Cache layer that orchestrates caching strategies with network fetching.

use color_eyre::Result;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::partition::PartitionNames;
use super::traits::{CacheKey, CacheResult, CacheStorage, CachedResponse};
use crate::event::{CacheEvent, EventSender};
use crate::net::Response;

/// Cache layer that manages caching strategies and network fetching.
///
/// This layer sits between the controller and the network client. Reads only
/// consult the current version's partitions. Writes that follow a network
/// response run in the background and never hold up the caller.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
  names: PartitionNames,
  events: EventSender,
  /// Background writes not yet joined
  pending: Arc<Mutex<JoinSet<()>>>,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<dyn CacheStorage>, names: PartitionNames, events: EventSender) -> Self {
    Self {
      storage,
      names,
      events,
      pending: Arc::new(Mutex::new(JoinSet::new())),
    }
  }

  pub fn names(&self) -> &PartitionNames {
    &self.names
  }

  pub fn storage(&self) -> &dyn CacheStorage {
    self.storage.as_ref()
  }

  /// Find a cached response in the static, then the dynamic partition.
  ///
  /// A storage error is logged and treated as a miss.
  pub fn lookup(&self, key: &CacheKey) -> Option<CachedResponse> {
    for partition in self.names.current() {
      match self.storage.get(&partition, key) {
        Ok(Some(cached)) => return Some(cached),
        Ok(None) => {}
        Err(e) => warn!(partition = %partition, url = %key.url, "Cache read failed: {}", e),
      }
    }
    None
  }

  /// Store a response without waiting for the write to finish.
  ///
  /// The outcome is logged and published as a [`CacheEvent`].
  pub fn store_in_background(&self, partition: String, key: CacheKey, response: Response) {
    let storage = Arc::clone(&self.storage);
    let events = self.events.clone();

    let task = move || match storage.put(&partition, &key, &response) {
      Ok(()) => {
        debug!(partition = %partition, url = %key.url, "Cached response");
        events.send(CacheEvent::Stored {
          partition,
          url: key.url,
        });
      }
      Err(e) => {
        warn!(partition = %partition, url = %key.url, "Cache write failed: {}", e);
        events.send(CacheEvent::WriteFailed {
          partition,
          url: key.url,
          error: e.to_string(),
        });
      }
    };

    match self.pending.lock() {
      Ok(mut pending) => {
        // Reap finished writes so the set does not grow without bound
        while pending.try_join_next().is_some() {}
        pending.spawn_blocking(task);
      }
      Err(e) => {
        warn!("Pending write set poisoned: {}", e);
        tokio::task::spawn_blocking(task);
      }
    }
  }

  /// Wait for every background write issued so far.
  pub async fn flush(&self) {
    let mut pending = match self.pending.lock() {
      Ok(mut pending) => std::mem::take(&mut *pending),
      Err(e) => {
        warn!("Pending write set poisoned: {}", e);
        return;
      }
    };

    while let Some(joined) = pending.join_next().await {
      if let Err(e) = joined {
        warn!("Background cache write panicked: {}", e);
      }
    }
  }

  /// Network-first strategy.
  ///
  /// 1. Fetch from network
  /// 2. On a 200, store a copy in `partition` and return the live response
  /// 3. On network failure, serve the first cached `fallbacks` entry (offline mode)
  /// 4. With nothing cached, the network error propagates
  pub async fn network_first<F, Fut>(
    &self,
    key: &CacheKey,
    partition: &str,
    fallbacks: &[CacheKey],
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    match fetcher().await {
      Ok(response) => {
        if response.is_cacheable() {
          self.store_in_background(partition.to_string(), key.clone(), response.clone());
        }
        Ok(CacheResult::from_network(response))
      }
      Err(err) => {
        for fallback in fallbacks {
          if let Some(cached) = self.lookup(fallback) {
            debug!(url = %key.url, fallback = %fallback.url, "Network failed, serving cache: {}", err);
            return Ok(CacheResult::offline(cached.response, cached.cached_at));
          }
        }
        Err(err)
      }
    }
  }

  /// Cache-first strategy.
  ///
  /// 1. Check cache - if present, return immediately without touching the network
  /// 2. Otherwise fetch, store a copy of a 200 in `partition`, and return it
  pub async fn cache_first<F, Fut>(
    &self,
    key: &CacheKey,
    partition: &str,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    if let Some(cached) = self.lookup(key) {
      return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    let response = fetcher().await?;
    if response.is_cacheable() {
      self.store_in_background(partition.to_string(), key.clone(), response.clone());
    }
    Ok(CacheResult::from_network(response))
  }
}
