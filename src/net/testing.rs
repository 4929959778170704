//! In-process network used by tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use super::{Network, Request, Response, ResponseKind};

/// Serves scripted responses; unknown URLs get a 404.
#[derive(Default)]
pub struct ScriptedNetwork {
  routes: Mutex<HashMap<String, Response>>,
  offline: AtomicBool,
  calls: AtomicUsize,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Serve `body` with status 200 from `url` as a same-origin response.
  pub fn with_page(self, url: &str, body: &str) -> Self {
    self.route(url, 200, ResponseKind::Basic, body)
  }

  pub fn route(self, url: &str, status: u16, kind: ResponseKind, body: &str) -> Self {
    let response = response(url, status, kind, body);
    self
      .routes
      .lock()
      .unwrap()
      .insert(response.url.to_string(), response);
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Request to {} failed: network unreachable", request.url));
    }

    let routed = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
    Ok(routed.unwrap_or_else(|| response(request.url.as_str(), 404, ResponseKind::Basic, "")))
  }
}

pub fn response(url: &str, status: u16, kind: ResponseKind, body: &str) -> Response {
  Response {
    url: Url::parse(url).unwrap(),
    status,
    status_text: String::new(),
    headers: vec![("content-type".to_string(), "text/html".to_string())],
    body: body.as_bytes().to_vec(),
    kind,
    redirected: false,
  }
}
