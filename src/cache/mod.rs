//! Versioned response caching for offline support.
//!
//! This module provides the cache generations the agent serves from:
//! - Named, versioned stores mapping request identity to a response snapshot
//! - All-or-nothing population of a generation from an asset manifest
//! - Cache-first lookup with a network fallback and background population
//! - Offline mode (serve the offline document when the network is unavailable)

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::SqliteStorage;
pub use traits::{CacheResult, CacheSource, CacheStorage, CachedResponse};
