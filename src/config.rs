use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Resources required for the app to work without a network connection.
const DEFAULT_ASSETS: &[&str] = &[
  "/mortzkey/",
  "/mortzkey/index.html",
  "/mortzkey/site.webmanifest",
  "/mortzkey/icons/android-chrome-192x192.png",
  "/mortzkey/icons/android-chrome-512x512.png",
  "/mortzkey/icons/apple-touch-icon.png",
  "/mortzkey/icons/favicon-32x32.png",
  "/mortzkey/icons/favicon-16x16.png",
  "/mortzkey/icons/favicon.ico",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Product prefix of the cache generation name
  pub product: String,
  /// Build version; only the generation carrying this version is current
  pub version: String,
  /// Origin the agent serves (scheme + host + port)
  pub origin: String,
  /// Asset manifest, root-relative, in install order
  pub assets: Vec<String>,
  /// Document served when the network is unreachable
  pub offline_document: String,
  /// Give up on a network request after this many seconds (no limit if unset)
  pub network_timeout_secs: Option<u64>,
  /// SQLite database holding the cache generations
  pub cache_path: Option<PathBuf>,
  /// Write logs to this file instead of stderr
  pub log_file: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      product: "mortzkey".to_string(),
      version: env!("CARGO_PKG_VERSION").to_string(),
      origin: "http://localhost:8080".to_string(),
      assets: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
      offline_document: "/mortzkey/index.html".to_string(),
      network_timeout_secs: None,
      cache_path: None,
      log_file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-agent.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-agent/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offline-agent.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-agent").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Reject configurations the agent cannot run with.
  pub fn validate(&self) -> Result<()> {
    let parts: Vec<&str> = self.version.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.parse::<u64>().is_err()) {
      return Err(eyre!(
        "Invalid version '{}': expected <major>.<minor>.<patch>",
        self.version
      ));
    }
    if self.product.is_empty() {
      return Err(eyre!("Product name must not be empty"));
    }
    if self.assets.is_empty() {
      return Err(eyre!("Asset manifest must list at least one resource"));
    }
    self.origin_url()?;
    Ok(())
  }

  /// Name of the current cache generation, e.g. `mortzkey-v2.0.0`.
  pub fn cache_name(&self) -> String {
    format!("{}-v{}", self.product, self.version)
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a root-relative path (or pass through an absolute URL).
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid URL '{}': {}", path, e))
  }

  pub fn asset_urls(&self) -> Result<Vec<Url>> {
    self.assets.iter().map(|a| self.resolve(a)).collect()
  }

  pub fn offline_document_url(&self) -> Result<Url> {
    self.resolve(&self.offline_document)
  }

  pub fn network_timeout(&self) -> Option<Duration> {
    self.network_timeout_secs.map(Duration::from_secs)
  }
}
