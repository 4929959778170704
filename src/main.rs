mod agent;
mod cache;
mod config;
mod net;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use agent::{FetchOutcome, OfflineAgent};
use cache::{CacheStorage, SqliteStorage};
use config::Config;
use net::{HttpNetwork, Network, Request, Response};

#[derive(Parser, Debug)]
#[command(name = "offline-agent")]
#[command(about = "Cache-first offline agent for the MortZKey web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-agent/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Path to the cache database (overrides the config file)
  #[arg(long)]
  cache_db: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Populate the current cache generation from the asset manifest
  Install,
  /// Remove stale cache generations
  Activate,
  /// Install, then activate right away if skip-waiting was signalled
  Update,
  /// Fetch a URL through the agent
  Fetch {
    /// Absolute URL or path relative to the configured origin
    url: String,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Write the body to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Id of the page issuing the request (omit for a navigation)
    #[arg(long)]
    client: Option<String>,
  },
  /// Post a JSON message to the agent, e.g. '{"type":"SKIP_WAITING"}'
  Message { data: String },
  /// Trigger a background sync tag
  Sync { tag: String },
  /// List cache generations
  Caches,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override cache location if specified on command line
  let config = if let Some(cache_db) = args.cache_db {
    Config {
      cache_path: Some(cache_db),
      ..config
    }
  } else {
    config
  };

  let _log_guard = init_tracing(&config)?;

  let storage = SqliteStorage::open(config.cache_path.as_deref())?;
  let network = HttpNetwork::new(&config)?;
  let agent = OfflineAgent::new(config, storage, network)?;

  run(&agent, args.command).await
}

/// Log to stderr, or to the configured file.
///
/// The returned guard flushes the file writer when dropped.
fn init_tracing(config: &Config) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  match &config.log_file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;

      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}

async fn run(agent: &OfflineAgent<SqliteStorage, HttpNetwork>, command: Command) -> Result<()> {
  match command {
    Command::Install => agent.install().await,
    Command::Activate => {
      ensure_installed(agent).await?;
      agent.activate().await
    }
    Command::Update => {
      agent.install().await?;
      let activated = agent.activate_when_ready().await?;
      debug!(activated, state = %agent.state()?, "Update finished");
      Ok(())
    }
    Command::Fetch {
      url,
      method,
      output,
      client,
    } => {
      agent.restore().await?;

      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let mut request = Request::new(method, agent.config().resolve(&url)?);
      if let Some(client) = client {
        request = request.with_client(client);
      }

      let response = match agent.fetch(&request).await? {
        FetchOutcome::Served(result) => {
          info!(
            source = %result.source,
            status = result.data.status,
            cached_at = ?result.cached_at,
            "Response served by agent"
          );
          if let Some(write) = result.pending_write {
            // The CLI exits right after, so let the background write land.
            if let Err(e) = write.await {
              warn!(error = %e, "Cache write task failed");
            }
          }
          result.data
        }
        FetchOutcome::Passthrough => {
          info!(method = %request.method, "Request passed through to the network");
          agent.network().fetch(&request).await?
        }
      };

      debug!(
        content_type = response.header("content-type").unwrap_or("-"),
        bytes = response.body.len(),
        "Writing body"
      );
      write_body(&response, output)
    }
    Command::Message { data } => {
      let data: serde_json::Value =
        serde_json::from_str(&data).map_err(|e| eyre!("Message is not valid JSON: {}", e))?;
      agent.restore().await?;
      let message = agent.message(&data).await?;
      println!("{:?} (agent {})", message, agent.state()?);
      Ok(())
    }
    Command::Sync { tag } => {
      agent.restore().await?;
      agent.sync(&tag).await;
      Ok(())
    }
    Command::Caches => {
      let current = agent.cache().cache_name();
      for name in agent.cache().with_storage(|storage, _| storage.keys()).await? {
        let marker = if name == current { "*" } else { " " };
        println!("{} {}", marker, name);
      }
      Ok(())
    }
  }
}

/// Activation only follows an install; a fresh process resumes from storage.
async fn ensure_installed(agent: &OfflineAgent<SqliteStorage, HttpNetwork>) -> Result<()> {
  if agent.restore().await? {
    Ok(())
  } else {
    Err(eyre!(
      "Cache {} is not installed; run `offline-agent install` first",
      agent.cache().cache_name()
    ))
  }
}

fn write_body(response: &Response, output: Option<PathBuf>) -> Result<()> {
  match output {
    Some(path) => std::fs::write(&path, &response.body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e)),
    None => {
      let mut stdout = std::io::stdout().lock();
      stdout.write_all(&response.body)?;
      stdout.flush()?;
      Ok(())
    }
  }
}
