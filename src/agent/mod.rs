//! The offline cache agent: lifecycle handlers and fetch interception.

mod clients;
mod events;
mod lifecycle;

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::cache::{CacheLayer, CacheResult, CacheStorage};
use crate::config::Config;
use crate::net::{Network, Request, RequestKey, Response};

pub use clients::Clients;
pub use events::{AgentMessage, SyncTag};
pub use lifecycle::{Lifecycle, WorkerState};

/// What the agent did with an intercepted request
#[derive(Debug)]
pub enum FetchOutcome {
  /// Not intercepted; the request goes to the network untouched
  Passthrough,
  /// Answered by the agent
  Served(CacheResult<Response>),
}

/// Agent providing offline availability for one app.
///
/// Owns the current cache generation (named after the configured version),
/// populates it on install, purges every other generation on activate and
/// answers GET requests cache-first.
pub struct OfflineAgent<S: CacheStorage, N: Network> {
  config: Config,
  cache: CacheLayer<S>,
  network: N,
  offline_document: RequestKey,
  lifecycle: Mutex<Lifecycle>,
  clients: Arc<Clients>,
}

impl<S: CacheStorage + 'static, N: Network> OfflineAgent<S, N> {
  pub fn new(config: Config, storage: S, network: N) -> Result<Self> {
    config.validate()?;
    let offline_document = RequestKey::get(&config.offline_document_url()?);
    let cache = CacheLayer::new(storage, config.cache_name());

    Ok(Self {
      config,
      cache,
      network,
      offline_document,
      lifecycle: Mutex::new(Lifecycle::default()),
      clients: Arc::new(Clients::new()),
    })
  }

  /// Share a page registry with the host.
  #[cfg(test)]
  pub fn with_clients(mut self, clients: Arc<Clients>) -> Self {
    self.clients = clients;
    self
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn cache(&self) -> &CacheLayer<S> {
    &self.cache
  }

  pub fn network(&self) -> &N {
    &self.network
  }

  fn lifecycle(&self) -> Result<MutexGuard<'_, Lifecycle>> {
    self
      .lifecycle
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  pub fn state(&self) -> Result<WorkerState> {
    Ok(self.lifecycle()?.state())
  }

  #[cfg(test)]
  pub fn skip_waiting_requested(&self) -> Result<bool> {
    Ok(self.lifecycle()?.skip_waiting_requested())
  }

  /// Populate the current generation with the asset manifest.
  ///
  /// Every asset must come back with a 2xx status; otherwise nothing is
  /// stored and the agent becomes redundant. On success the agent asks to
  /// activate without waiting for open pages to close.
  pub async fn install(&self) -> Result<()> {
    self.lifecycle()?.begin_install()?;

    let result = self.populate().await;

    let mut lifecycle = self.lifecycle()?;
    lifecycle.finish_install(result.is_ok());
    result?;
    lifecycle.skip_waiting();

    info!(cache = %self.cache.cache_name(), "Agent installed");
    Ok(())
  }

  async fn populate(&self) -> Result<()> {
    let urls = self.config.asset_urls()?;
    info!(cache = %self.cache.cache_name(), assets = urls.len(), "Caching app assets");

    let entries = try_join_all(urls.into_iter().map(|url| async move {
      let request = Request::get(url);
      let response = self.network.fetch(&request).await?;
      if !response.ok() {
        return Err(eyre!(
          "Failed to cache {}: status {}",
          request.url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>((request.key(), response))
    }))
    .await?;

    self.cache.precache(entries).await
  }

  /// Delete every generation other than the current one, then take control
  /// of all open pages.
  ///
  /// Names are compared exactly, so a lexically "newer" generation is stale
  /// too. A failed deletion aborts activation.
  pub async fn activate(&self) -> Result<()> {
    let previous = self.lifecycle()?.begin_activate()?;

    let result = self.purge_and_claim().await;

    self
      .lifecycle()?
      .finish_activate(result.as_ref().map(|_| ()).map_err(|_| previous));
    let claimed = result?;

    info!(cache = %self.cache.cache_name(), claimed, "Agent activated");
    Ok(())
  }

  async fn purge_and_claim(&self) -> Result<usize> {
    self
      .cache
      .with_storage(|storage, current| {
        for name in storage.keys()? {
          if name != current {
            info!(cache = %name, "Removing old cache");
            storage
              .delete(&name)
              .map_err(|e| eyre!("Failed to remove old cache {}: {}", name, e))?;
          }
        }
        Ok(())
      })
      .await?;

    self.clients.claim(self.cache.cache_name())
  }

  /// Activate now if the agent is installed and skip-waiting was signalled.
  /// Returns whether activation ran.
  pub async fn activate_when_ready(&self) -> Result<bool> {
    let ready = {
      let lifecycle = self.lifecycle()?;
      lifecycle.state() == WorkerState::Installed && lifecycle.skip_waiting_requested()
    };
    if !ready {
      return Ok(false);
    }

    self.activate().await?;
    Ok(true)
  }

  /// Pick up a generation installed by an earlier run.
  ///
  /// The agent resumes as active when the current generation is the only
  /// one stored, and as installed (waiting) while stale generations remain.
  /// Returns false if there is nothing to resume.
  pub async fn restore(&self) -> Result<bool> {
    if self.state()? != WorkerState::Parsed {
      return Ok(false);
    }

    let waiting = self
      .cache
      .with_storage(|storage, current| {
        if !storage.has(current)? {
          return Ok(None);
        }
        Ok(Some(storage.keys()?.iter().any(|name| name != current)))
      })
      .await?;

    let Some(waiting) = waiting else {
      return Ok(false);
    };
    let mut lifecycle = self.lifecycle()?;
    lifecycle.resume(waiting);
    debug!(cache = %self.cache.cache_name(), state = %lifecycle.state(), "Agent resumed");
    Ok(true)
  }

  /// Handle an intercepted request.
  ///
  /// Only GET requests are intercepted, only while the agent is active, and
  /// only for pages controlled by the current generation. A page the agent
  /// has not seen before was opened under it and is adopted.
  pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
    if !request.is_get() {
      return Ok(FetchOutcome::Passthrough);
    }
    if !self.state()?.can_intercept_fetch() {
      return Ok(FetchOutcome::Passthrough);
    }
    if let Some(client_id) = &request.client_id {
      let current = self.cache.cache_name();
      let controller = self.clients.controller_or_adopt(client_id, current)?;
      if controller.as_deref() != Some(current) {
        debug!(client = %client_id, controller = ?controller, "Page not controlled by this generation");
        return Ok(FetchOutcome::Passthrough);
      }
    }

    let result = self
      .cache
      .fetch_cache_first(request, &self.offline_document, || {
        self.network.fetch(request)
      })
      .await?;

    debug!(url = %request.url, source = %result.source, status = result.data.status, "Served request");
    Ok(FetchOutcome::Served(result))
  }

  /// Handle a directive posted by a controlled page.
  ///
  /// SKIP_WAITING activates a waiting agent right away.
  pub async fn message(&self, data: &Value) -> Result<AgentMessage> {
    let message = AgentMessage::from_value(data);
    match message {
      AgentMessage::SkipWaiting => {
        self.lifecycle()?.skip_waiting();
        info!("Skip waiting requested");
        self.activate_when_ready().await?;
      }
      AgentMessage::Unknown => debug!(%data, "Ignoring message"),
    }
    Ok(message)
  }

  /// Handle a background sync request. Only logs for now.
  pub async fn sync(&self, tag: &str) -> SyncTag {
    let tag = SyncTag::parse(tag);
    match &tag {
      SyncTag::Licenses => info!("Background sync triggered"),
      SyncTag::Other(other) => debug!(tag = %other, "Ignoring sync tag"),
    }
    tag
  }
}
