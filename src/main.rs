mod cache;
mod config;
mod error;
mod event;
mod origin;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use cache::{CacheStorage, MemoryStorage, SqliteStorage};
use config::{Config, StorageBackend};
use event::{FetchSummary, FetchTarget};
use origin::{Destination, Fetcher, OriginClient};
use worker::control::{self, ControlMessage};
use worker::{CacheWorker, WorkerSettings};

#[derive(Parser, Debug)]
#[command(name = "campus-cache")]
#[command(about = "Offline asset cache controller for the campus maps site")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/campus-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Base URL of the site
  #[arg(long)]
  origin: Option<String>,

  /// Version of the cache generation to operate on
  #[arg(long = "cache-version")]
  cache_version: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch and store every manifest asset as the current generation
  Install,
  /// Delete stale generations and take over
  Activate,
  /// Serve one request through the cache
  Fetch {
    /// Page-relative path or absolute URL
    url: String,
    #[arg(long, default_value = "GET")]
    method: String,
    /// Accept header to send
    #[arg(long)]
    accept: Option<String>,
    #[arg(long, value_enum)]
    destination: Option<Destination>,
  },
  /// Send a control message, e.g. '{"type":"GET_CACHE_STATUS"}'
  Message { json: String },
  /// List the entries of the current generation
  Entries,
  /// Read newline-delimited JSON events from stdin
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration, then apply command line overrides
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(origin) = args.origin {
    config.origin = origin;
  }
  if let Some(version) = args.cache_version {
    config.version = version;
  }

  let _guard = init_tracing(&config)?;

  let settings = WorkerSettings::from_config(&config)?;
  let fetcher = Arc::new(OriginClient::new(settings.origin.clone())?);

  match config.storage {
    StorageBackend::Sqlite => {
      let storage = Arc::new(SqliteStorage::open(&config.database_path()?)?);
      execute(args.command, CacheWorker::new(settings, storage, fetcher)).await
    }
    StorageBackend::Memory => {
      let storage = Arc::new(MemoryStorage::new());
      execute(args.command, CacheWorker::new(settings, storage, fetcher)).await
    }
  }
}

/// Install the global subscriber. Logs go to stderr, or to daily files when
/// `log_dir` is set; stdout carries command output only.
fn init_tracing(config: &Config) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.log_level))
    .map_err(|e| eyre!("Invalid log level '{}': {}", config.log_level, e))?;

  match &config.log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "campus-cache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(None)
    }
  }
}

async fn execute<S, F>(command: Command, worker: CacheWorker<S, F>) -> Result<()>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  match command {
    Command::Install => print_json(&worker.install().await?),
    Command::Activate => print_json(&worker.activate().await?),
    Command::Fetch {
      url,
      method,
      accept,
      destination,
    } => {
      let target = FetchTarget {
        url,
        method,
        accept,
        destination: destination.unwrap_or_default(),
      };
      let request = target.to_request(worker.settings())?;
      let result = worker.handle_fetch(&request).await?;
      print_json(&FetchSummary::new(&request.url, &result))
    }
    Command::Message { json } => {
      let data: serde_json::Value =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid message JSON: {}", e))?;
      let message =
        ControlMessage::parse(&data).ok_or_else(|| eyre!("Unrecognized control message"))?;

      let (sender, rx) = control::channel();
      let server = tokio::spawn(Arc::new(worker).serve_control(rx));
      let reply = sender.send(message).await?;
      drop(sender);
      server.await?;

      match reply {
        Some(reply) => print_json(&reply),
        None => Ok(()),
      }
    }
    Command::Entries => {
      let generation = worker.settings().cache_name();
      print_json(&worker.storage().entries(&generation).await?)
    }
    Command::Run => event::run(Arc::new(worker)).await,
  }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let json =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to encode output: {}", e))?;
  println!("{}", json);
  Ok(())
}
