use crate::config::Config;
use crate::net::types::{Request, Response, ResponseKind};
use crate::net::Network;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::HeaderMap;
use tracing::{debug, warn};
use url::Url;

/// HTTP transport backed by reqwest
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Url,
}

impl HttpNetwork {
  pub fn new(config: &Config) -> Result<Self> {
    let mut builder = reqwest::Client::builder().user_agent(concat!(
      env!("CARGO_PKG_NAME"),
      "/",
      env!("CARGO_PKG_VERSION")
    ));
    if let Some(timeout) = config.network_timeout() {
      builder = builder.timeout(timeout);
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: config.origin_url()?,
    })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", request.url, e))?;

    let final_url = response.url().clone();
    let status = response.status();
    let headers = header_pairs(response.headers());

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    debug!(url = %request.url, status = status.as_u16(), bytes = body.len(), "Network response");

    Ok(Response {
      kind: ResponseKind::classify(&self.origin, &final_url),
      redirected: final_url != request.url,
      url: final_url,
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
    })
  }
}

/// Flatten response headers for the snapshot.
///
/// Values that are not visible ASCII are decoded lossily rather than dropped.
fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
  headers
    .iter()
    .map(|(name, value)| {
      let value = match value.to_str() {
        Ok(v) => v.to_string(),
        Err(_) => {
          warn!(header = %name, "Header value is not ASCII, storing lossy copy");
          String::from_utf8_lossy(value.as_bytes()).into_owned()
        }
      };
      (name.as_str().to_string(), value)
    })
    .collect()
}
