mod cache;
mod config;
mod event;
mod logging;
mod net;
mod route;
mod sw;

#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{CacheSource, CacheStorage, MemoryStorage, PartitionNames, SqliteStorage};
use crate::config::{Config, StorageKind};
use crate::event::{CacheEvent, EventHandler};
use crate::net::{Fetcher, HttpFetcher, Request};
use crate::route::{BypassRules, Router};
use crate::sw::{Controller, Registration};

#[derive(Parser, Debug)]
#[command(name = "nurpay-sw")]
#[command(about = "Offline asset cache controller for the NurPay wallet shell")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/nurpay-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Override the cache version
  #[arg(long)]
  cache_version: Option<String>,

  /// Log to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the current version (shell pre-population) and activate it
  Install,
  /// Activate an already installed version, pruning older partitions
  Activate,
  /// Fetch a URL or origin-relative path through the controller
  Fetch {
    target: String,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat as a top-level document load
    #[arg(long)]
    navigate: bool,
    /// Extra request header, "Name: value"
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List cache partitions
  Partitions,
  /// List the entries of a partition
  Entries { partition: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.log_stderr)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override version if specified on command line
  let config = if let Some(version) = args.cache_version {
    Config {
      cache: config::CacheConfig {
        version,
        ..config.cache
      },
      ..config
    }
  } else {
    config
  };

  let storage = open_storage(&config)?;
  let names = PartitionNames::new(&config.cache.prefix, &config.cache.version);

  match args.command {
    Command::Install => install(&config, storage, names).await,
    Command::Activate => activate(&config, storage, names).await,
    Command::Fetch {
      target,
      method,
      navigate,
      headers,
      output,
    } => {
      let url = config.resolve(&target)?;
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
      let mut request = if navigate {
        Request::navigate(url)
      } else {
        Request::get(url)
      }
      .with_method(method);
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Invalid header '{}', expected 'Name: value'", header))?;
        request = request.with_header(name.trim(), value.trim());
      }
      fetch(&config, storage, names, request, output).await
    }
    Command::Partitions => list_partitions(storage.as_ref(), &names),
    Command::Entries { partition } => list_entries(storage.as_ref(), &partition),
  }
}

fn open_storage(config: &Config) -> Result<Arc<dyn CacheStorage>> {
  match config.cache.storage {
    StorageKind::Sqlite => {
      let path = config.database_path()?;
      tracing::debug!(path = %path.display(), "Opening cache database");
      Ok(Arc::new(SqliteStorage::open_at(&path)?))
    }
    StorageKind::Memory => Ok(Arc::new(MemoryStorage::new())),
  }
}

fn build_controller(
  config: &Config,
  storage: Arc<dyn CacheStorage>,
  names: PartitionNames,
  fetcher: Arc<dyn Fetcher>,
) -> Result<(Arc<Controller>, EventHandler)> {
  let router = Router::new(BypassRules::new(config.bypass.as_slice())?)?;
  let (tx, events) = event::channel();
  let controller = Controller::new(router, names, config.shell_urls()?, storage, fetcher, tx);
  Ok((Arc::new(controller), events))
}

async fn install(config: &Config, storage: Arc<dyn CacheStorage>, names: PartitionNames) -> Result<()> {
  let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new()?);
  let (controller, _events) = build_controller(config, storage, names, Arc::clone(&fetcher))?;

  let registration = Registration::new(fetcher);
  let handoff = registration.register(controller).await?;

  println!("version {}", config.cache.version);
  for url in &handoff.install.cached {
    println!("  cached  {}", url);
  }
  for failure in &handoff.install.failed {
    println!("  failed  {} ({})", failure.url, failure.reason);
  }
  if let Some(activate) = &handoff.activate {
    for name in &activate.deleted {
      println!("  deleted {}", name);
    }
  }
  if let Some(previous) = &handoff.replaced {
    println!("  replaced {}", previous);
  }

  Ok(())
}

async fn activate(config: &Config, storage: Arc<dyn CacheStorage>, names: PartitionNames) -> Result<()> {
  let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new()?);
  let (controller, _events) = build_controller(config, storage, names, Arc::clone(&fetcher))?;

  let registration = Registration::new(fetcher);
  let report = registration
    .resume(controller)
    .await?
    .ok_or_else(|| eyre!("Version {} is not installed, run install first", config.cache.version))?;

  println!("version {}", config.cache.version);
  for name in &report.deleted {
    println!("  deleted {}", name);
  }

  Ok(())
}

async fn fetch(
  config: &Config,
  storage: Arc<dyn CacheStorage>,
  names: PartitionNames,
  request: Request,
  output: Option<PathBuf>,
) -> Result<()> {
  let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new()?);
  let (controller, mut events) = build_controller(config, storage, names, Arc::clone(&fetcher))?;

  // Without an installed version every request goes to the network
  let registration = Registration::new(fetcher);
  if registration.resume(controller).await?.is_none() {
    tracing::info!(version = %config.cache.version, "Version not installed, fetching uncontrolled");
  }

  let result = registration.fetch(&request).await?;
  let source = match result.source {
    CacheSource::Network => "network",
    CacheSource::Cache => "cache",
    CacheSource::Offline => "offline",
  };
  let response = result.data;

  // The process is about to exit, so background writes must land first
  if let Some(active) = registration.active() {
    active.flush().await;
  }

  match (registration.active_version(), registration.state()) {
    (Some(version), Some(state)) => eprintln!("controller {} ({})", version, state),
    _ => eprintln!("no active controller"),
  }
  eprintln!("{} {} ({})", response.status, request.url, source);
  for (name, value) in &response.headers {
    eprintln!("{}: {}", name, String::from_utf8_lossy(value));
  }
  while let Some(event) = events.try_next() {
    match event {
      CacheEvent::Stored { partition, .. } => eprintln!("stored in {}", partition),
      CacheEvent::WriteFailed {
        partition, error, ..
      } => eprintln!("failed to store in {}: {}", partition, error),
    }
  }

  match output {
    Some(path) => std::fs::write(&path, &response.body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
    None => std::io::stdout()
      .write_all(&response.body)
      .map_err(|e| eyre!("Failed to write body: {}", e))?,
  }

  Ok(())
}

fn list_partitions(storage: &dyn CacheStorage, names: &PartitionNames) -> Result<()> {
  for name in storage.keys()? {
    let marker = if names.current().contains(&name) {
      "current"
    } else if names.is_stale(&name) {
      "stale"
    } else {
      "foreign"
    };
    let count = storage.entries(&name)?.len();
    println!("{:<32} {:>6} {}", name, count, marker);
  }
  Ok(())
}

fn list_entries(storage: &dyn CacheStorage, partition: &str) -> Result<()> {
  if !storage.keys()?.iter().any(|name| name == partition) {
    return Err(eyre!("No such partition: {}", partition));
  }

  for entry in storage.entries(partition)? {
    println!(
      "{} {} {} {:>8} {}",
      entry.cached_at.format("%Y-%m-%d %H:%M:%S"),
      entry.status,
      entry.method,
      entry.size,
      entry.url
    );
  }
  Ok(())
}
