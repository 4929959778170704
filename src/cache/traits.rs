//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use tokio::task::JoinHandle;

use crate::net::{RequestKey, Response};

/// A response read back from a cache generation.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// A backend holds any number of named cache generations, each mapping a
/// request identity to a response snapshot. Every method is atomic on its own;
/// nothing is grouped across calls.
pub trait CacheStorage: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn open(&self, cache_name: &str) -> Result<()>;

  /// Names of all existing generations, oldest first.
  fn keys(&self) -> Result<Vec<String>>;

  /// Whether the generation exists.
  fn has(&self, cache_name: &str) -> Result<bool>;

  /// Remove a generation and all of its entries. Returns false if it did not exist.
  fn delete(&self, cache_name: &str) -> Result<bool>;

  /// Look up a request in a generation.
  fn match_request(&self, cache_name: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Store a response, replacing any previous entry for the same request.
  fn put(&self, cache_name: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store several responses at once; either all are written or none.
  fn put_all(&self, cache_name: &str, entries: &[(RequestKey, Response)]) -> Result<()>;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
  /// Detached cache write started for this result, if any.
  ///
  /// Nothing on the request path waits for it.
  pub pending_write: Option<JoinHandle<()>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
      pending_write: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
      pending_write: None,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
      pending_write: None,
    }
  }

  /// Network and offline fallback both failed; `data` is synthesized.
  pub fn unavailable(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Unavailable,
      cached_at: None,
      pending_write: None,
    }
  }

  pub fn with_pending_write(mut self, handle: JoinHandle<()>) -> Self {
    self.pending_write = Some(handle);
    self
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Stored entry for the exact request
  Cache,
  /// Offline mode - network unavailable, serving the offline document
  Offline,
  /// Network unavailable and no offline document stored
  Unavailable,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      CacheSource::Network => write!(f, "network"),
      CacheSource::Cache => write!(f, "cache"),
      CacheSource::Offline => write!(f, "offline"),
      CacheSource::Unavailable => write!(f, "unavailable"),
    }
  }
}
