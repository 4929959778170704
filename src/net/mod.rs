//! Network boundary: request/response snapshots and the fetch transport.

mod client;
#[cfg(test)]
pub mod testing;
mod types;

use color_eyre::Result;
use std::future::Future;

pub use client::HttpNetwork;
pub use types::{Request, RequestKey, Response, ResponseKind};

/// Transport that answers requests the cache cannot.
///
/// A transport-level failure (no connectivity, timeout) is an `Err`; any HTTP
/// status, including errors, is an `Ok(Response)`.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}
