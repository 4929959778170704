use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// An outbound request intercepted by the agent
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  /// Page that issued the request; `None` for a navigation opening a new page
  pub client_id: Option<String>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      client_id: None,
    }
  }

  pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
    self.client_id = Some(client_id.into());
    self
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Identity of a request inside a cache generation.
///
/// Method plus URL, ignoring the fragment (which never reaches the server).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_string(),
      url: url.into(),
    }
  }

  pub fn get(url: &Url) -> Self {
    Self::new(&Method::GET, url)
  }

  /// SHA256 hash for stable, fixed-length storage keys
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// How a response relates to the agent's origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
  /// Same-origin response, fully readable
  Basic,
  /// Cross-origin response
  Cors,
  /// Cross-origin response with hidden status and body
  Opaque,
  /// Synthesized by the agent itself
  Error,
}

impl ResponseKind {
  /// Classify a response by the origin of the URL it was finally served from.
  pub fn classify(origin: &Url, final_url: &Url) -> Self {
    if origin.origin() == final_url.origin() {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseKind::Basic => "basic",
      ResponseKind::Cors => "cors",
      ResponseKind::Opaque => "opaque",
      ResponseKind::Error => "error",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(ResponseKind::Basic),
      "cors" => Some(ResponseKind::Cors),
      "opaque" => Some(ResponseKind::Opaque),
      "error" => Some(ResponseKind::Error),
      _ => None,
    }
  }
}

/// Snapshot of a response: status, headers and the full body.
///
/// Cloning duplicates the body, so one copy can go to the caller while the
/// other is written to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub url: Url,
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
  pub redirected: bool,
}

impl Response {
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only plain, same-origin 200 responses are worth keeping offline.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseKind::Basic
  }

  /// Response handed back when neither the network nor the offline document
  /// is available.
  pub fn service_unavailable(url: &Url) -> Self {
    Self {
      url: url.clone(),
      status: 503,
      status_text: "Service Unavailable".to_string(),
      headers: vec![(
        "content-type".to_string(),
        "text/plain; charset=utf-8".to_string(),
      )],
      body: b"Offline: this resource is not available without a network connection.".to_vec(),
      kind: ResponseKind::Error,
      redirected: false,
    }
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
