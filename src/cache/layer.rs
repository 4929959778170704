//! Cache layer that orchestrates caching logic with network fetching.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CacheResult, CacheStorage, CachedResponse};
use crate::net::{Request, RequestKey, Response};

/// Cache layer bound to the current cache generation.
///
/// This layer sits between the agent and the network transport, serving
/// stored responses first and falling back to the offline document when the
/// network is unreachable. Storage calls run on the blocking pool so a slow
/// disk never stalls other in-flight requests.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  cache_name: String,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  /// Create a new cache layer writing into `cache_name`.
  pub fn new(storage: S, cache_name: impl Into<String>) -> Self {
    Self {
      storage: Arc::new(storage),
      cache_name: cache_name.into(),
    }
  }

  pub fn cache_name(&self) -> &str {
    &self.cache_name
  }

  #[cfg(test)]
  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Run a storage operation on the blocking pool.
  ///
  /// The closure receives the storage and the current generation name.
  pub async fn with_storage<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&S, &str) -> Result<T> + Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    let cache_name = self.cache_name.clone();

    tokio::task::spawn_blocking(move || f(&storage, &cache_name))
      .await
      .map_err(|e| eyre!("Cache task failed: {}", e))?
  }

  /// Write a full set of responses into the current generation in one go.
  pub async fn precache(&self, entries: Vec<(RequestKey, Response)>) -> Result<()> {
    let count = entries.len();
    self
      .with_storage(move |storage, cache_name| storage.put_all(cache_name, &entries))
      .await?;
    info!(cache = %self.cache_name, entries = count, "Cached app assets");
    Ok(())
  }

  /// Look up a request in the current generation.
  pub async fn lookup(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let key = key.clone();
    self
      .with_storage(move |storage, cache_name| storage.match_request(cache_name, &key))
      .await
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Check cache - if present, return it without touching the network
  /// 2. If missing, fetch from network
  /// 3. Store cacheable responses in the background
  /// 4. On network failure, return the offline document (offline mode)
  pub async fn fetch_cache_first<F, Fut>(
    &self,
    request: &Request,
    offline_document: &RequestKey,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let key = request.key();

    // Check cache first
    if let Some(cached) = self.lookup(&key).await? {
      debug!(request = %key, "Serving from cache");
      return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    match fetcher().await {
      Ok(response) => {
        if !response.is_cacheable() {
          debug!(request = %key, status = response.status, kind = response.kind.as_str(), "Not caching response");
          return Ok(CacheResult::from_network(response));
        }

        let handle = self.put_detached(key, response.clone());
        Ok(CacheResult::from_network(response).with_pending_write(handle))
      }
      Err(e) => {
        warn!(request = %key, error = %e, "Fetch failed");

        // Network failed, return the offline document (offline mode)
        match self.lookup(offline_document).await? {
          Some(cached) => Ok(CacheResult::offline(cached.response, cached.cached_at)),
          None => {
            warn!(document = %offline_document, "Offline document not cached");
            Ok(CacheResult::unavailable(Response::service_unavailable(
              &request.url,
            )))
          }
        }
      }
    }
  }

  /// Store a response without holding up the caller.
  ///
  /// A failed write is logged and otherwise ignored.
  fn put_detached(&self, key: RequestKey, response: Response) -> JoinHandle<()> {
    let storage = Arc::clone(&self.storage);
    let cache_name = self.cache_name.clone();

    tokio::task::spawn_blocking(move || {
      match storage.put(&cache_name, &key, &response) {
        Ok(()) => debug!(request = %key, cache = %cache_name, "Cached network response"),
        Err(e) => warn!(request = %key, cache = %cache_name, error = %e, "Failed to cache response"),
      }
    })
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      cache_name: self.cache_name.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::net::testing::response;
  use crate::net::ResponseKind;
  use color_eyre::eyre::eyre;
  use url::Url;

  const CACHE: &str = "mortzkey-v2.0.0";
  const INDEX: &str = "https://apps.example.com/mortzkey/index.html";

  fn layer() -> CacheLayer<SqliteStorage> {
    CacheLayer::new(SqliteStorage::open_in_memory().unwrap(), CACHE)
  }

  fn get(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  fn index_key() -> RequestKey {
    get(INDEX).key()
  }

  #[tokio::test]
  async fn test_hit_skips_fetcher() {
    let layer = layer();
    layer
      .precache(vec![(index_key(), response(INDEX, 200, ResponseKind::Basic, "cached"))])
      .await
      .unwrap();

    let result = layer
      .fetch_cache_first(&get(INDEX), &index_key(), || async {
        Err::<Response, _>(eyre!("fetcher must not run"))
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.body, b"cached");
    assert!(result.cached_at.is_some());
  }

  #[tokio::test]
  async fn test_failed_write_does_not_fail_request() {
    struct BrokenStorage;

    impl CacheStorage for BrokenStorage {
      fn open(&self, _cache_name: &str) -> Result<()> {
        Ok(())
      }
      fn keys(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
      }
      fn has(&self, _cache_name: &str) -> Result<bool> {
        Ok(false)
      }
      fn delete(&self, _cache_name: &str) -> Result<bool> {
        Ok(false)
      }
      fn match_request(&self, _: &str, _: &RequestKey) -> Result<Option<CachedResponse>> {
        Ok(None)
      }
      fn put(&self, _: &str, _: &RequestKey, _: &Response) -> Result<()> {
        Err(eyre!("disk full"))
      }
      fn put_all(&self, _: &str, _: &[(RequestKey, Response)]) -> Result<()> {
        Err(eyre!("disk full"))
      }
    }

    let layer = CacheLayer::new(BrokenStorage, CACHE);
    let url = "https://apps.example.com/mortzkey/app.js";

    let result = layer
      .fetch_cache_first(&get(url), &index_key(), || async {
        Ok(response(url, 200, ResponseKind::Basic, "js"))
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.body, b"js");
    result.pending_write.unwrap().await.unwrap();
  }

  #[tokio::test]
  async fn test_storage_calls_leave_the_runtime_thread() {
    struct RecordingStorage {
      threads: std::sync::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl RecordingStorage {
      fn record(&self) {
        self.threads.lock().unwrap().push(std::thread::current().id());
      }
    }

    impl CacheStorage for RecordingStorage {
      fn open(&self, _cache_name: &str) -> Result<()> {
        Ok(())
      }
      fn keys(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
      }
      fn has(&self, _cache_name: &str) -> Result<bool> {
        Ok(false)
      }
      fn delete(&self, _cache_name: &str) -> Result<bool> {
        Ok(false)
      }
      fn match_request(&self, _: &str, _: &RequestKey) -> Result<Option<CachedResponse>> {
        self.record();
        Ok(None)
      }
      fn put(&self, _: &str, _: &RequestKey, _: &Response) -> Result<()> {
        self.record();
        Ok(())
      }
      fn put_all(&self, _: &str, _: &[(RequestKey, Response)]) -> Result<()> {
        self.record();
        Ok(())
      }
    }

    let layer = CacheLayer::new(
      RecordingStorage {
        threads: std::sync::Mutex::new(Vec::new()),
      },
      CACHE,
    );

    layer.precache(Vec::new()).await.unwrap();
    assert!(layer.lookup(&index_key()).await.unwrap().is_none());

    let runtime_thread = std::thread::current().id();
    let threads = layer.storage().threads.lock().unwrap().clone();
    assert_eq!(threads.len(), 2);
    assert!(threads.iter().all(|id| *id != runtime_thread));
  }

  #[tokio::test]
  async fn test_offline_without_document_is_unavailable() {
    let layer = layer();
    let url = "https://apps.example.com/mortzkey/unknown-asset.png";

    let result = layer
      .fetch_cache_first(&get(url), &index_key(), || async {
        Err::<Response, _>(eyre!("network unreachable"))
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Unavailable);
    assert_eq!(result.data.status, 503);
    assert!(result.pending_write.is_none());
  }
}
