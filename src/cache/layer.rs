//! Cache layer that applies caching strategies on top of network fetching.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{NetworkError, WorkerError};
use crate::origin::Response;

use super::storage::CacheStorage;
use super::traits::{CacheResult, StoredResponse};

/// Strategy executor bound to a single cache generation.
///
/// The fetcher closure passed to each strategy is invoked at most once.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  generation: String,
}

impl<S: CacheStorage> CacheLayer<S> {
  pub fn new(storage: Arc<S>, generation: impl Into<String>) -> Self {
    Self {
      storage,
      generation: generation.into(),
    }
  }

  /// Look up a stored entry, ignoring snapshots whose body was corrupted.
  pub async fn lookup(&self, key: &str) -> Result<Option<StoredResponse>, WorkerError> {
    match self.storage.get(&self.generation, key).await? {
      Some(stored) if stored.is_intact() => Ok(Some(stored)),
      Some(_) => {
        warn!(key, generation = %self.generation, "Stored entry failed digest check, ignoring");
        Ok(None)
      }
      None => Ok(None),
    }
  }

  /// Store a network response if it is cacheable.
  ///
  /// A failed write is logged and otherwise ignored; the response is still
  /// served.
  async fn store(&self, key: &str, response: &Response) {
    if !response.is_cacheable() {
      debug!(
        key,
        status = response.status,
        response_type = response.response_type.as_str(),
        "Response not cacheable, skipping"
      );
      return;
    }

    match self.storage.put(&self.generation, key, response).await {
      Ok(()) => info!(key, "Caching new resource"),
      Err(e) => warn!(key, error = %e, "Failed to cache resource"),
    }
  }

  /// Lookup after a failed fetch. A storage error counts as a miss, so the
  /// network error is what reaches the caller.
  async fn recover(&self, key: &str) -> Option<StoredResponse> {
    match self.lookup(key).await {
      Ok(stored) => stored,
      Err(e) => {
        warn!(key, error = %e, "Failed to read cache after network failure");
        None
      }
    }
  }

  /// Serve the substitute asset named by `fallback`, if one is stored.
  async fn resolve_fallback(
    &self,
    fallback: Option<&str>,
    error: NetworkError,
  ) -> Result<CacheResult, WorkerError> {
    if let Some(fallback_key) = fallback {
      if let Some(stored) = self.recover(fallback_key).await {
        info!(fallback = fallback_key, "Serving fallback");
        return Ok(CacheResult::fallback(stored));
      }
      warn!(fallback = fallback_key, "No fallback available");
    }
    Err(error.into())
  }

  /// Cache-first with network fallback.
  ///
  /// 1. Stored entry present - return it without touching the network
  /// 2. Otherwise fetch, store a cacheable response, return it
  /// 3. On network failure, serve the fallback asset or propagate the error
  pub async fn cache_first<F, Fut>(
    &self,
    key: &str,
    fallback: Option<&str>,
    fetcher: F,
  ) -> Result<CacheResult, WorkerError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response, NetworkError>>,
  {
    if let Some(stored) = self.lookup(key).await? {
      debug!(key, "Serving from cache");
      return Ok(CacheResult::from_cache(stored));
    }

    match fetcher().await {
      Ok(response) => {
        self.store(key, &response).await;
        Ok(CacheResult::from_network(response))
      }
      Err(error) => {
        info!(key, error = %error, "Network request failed");
        self.resolve_fallback(fallback, error).await
      }
    }
  }

  /// Network-first with cache fallback.
  ///
  /// 1. Fetch; a cacheable response overwrites the stored entry
  /// 2. On network failure, serve the stored copy of this request
  /// 3. Otherwise serve the fallback asset or propagate the error
  pub async fn network_first<F, Fut>(
    &self,
    key: &str,
    fallback: Option<&str>,
    fetcher: F,
  ) -> Result<CacheResult, WorkerError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response, NetworkError>>,
  {
    match fetcher().await {
      Ok(response) => {
        self.store(key, &response).await;
        Ok(CacheResult::from_network(response))
      }
      Err(error) => {
        info!(key, error = %error, "Network request failed, trying cache");
        if let Some(stored) = self.recover(key).await {
          return Ok(CacheResult::offline(stored));
        }
        self.resolve_fallback(fallback, error).await
      }
    }
  }
}
