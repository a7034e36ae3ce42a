use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use offline_worker::cache::{CacheStorage, MemoryStorage, NoopStorage, SqliteStorage};
use offline_worker::clients::{Clients, LocalClients};
use offline_worker::config::Config;
use offline_worker::http::Request;
use offline_worker::network::{HttpNetwork, Network};
use offline_worker::push::{LocalNotifier, Notifier};
use offline_worker::sync::{MemoryQueue, SyncPayload, SyncStore, SyncTag, PERIODIC_CONTENT_TAG};
use offline_worker::worker::{EventOutcome, FetchOutcome, Platform, ServiceWorker, WorkerEvent};

#[derive(Parser, Debug)]
#[command(name = "offline-worker")]
#[command(about = "Offline caching controller for a storefront web app")]
#[command(version)]
struct Cli {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-worker/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Site origin, overrides the config file
  #[arg(long, global = true)]
  origin: Option<String>,

  /// Cache database path (default: <data dir>/offline-worker/cache.db)
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Keep caches and queue in memory for this run only
  #[arg(long, global = true)]
  memory: bool,

  /// Cache nothing; every request goes to the network
  #[arg(long, global = true, conflicts_with = "memory")]
  no_cache: bool,

  /// Mirror logs to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache critical assets and activate this version
  Install,
  /// Serve a request the way a page would get it
  Fetch {
    url: String,
    /// Accept header
    #[arg(long)]
    accept: Option<String>,
    #[arg(long, default_value = "GET")]
    method: String,
    #[arg(long)]
    body: Option<String>,
  },
  /// Fire a background or periodic sync tag
  Sync { tag: String },
  /// Inspect or add deferred work
  Queue {
    #[command(subcommand)]
    action: QueueCommand,
  },
  /// Deliver a push message
  Push { payload: Option<String> },
  /// Click a notification
  Click {
    action: Option<String>,
    #[arg(long)]
    tag: Option<String>,
  },
  /// List caches and their entry counts
  Caches,
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// Queue a form submission
  Form {
    url: String,
    #[arg(long, default_value = "POST")]
    method: String,
    #[arg(long)]
    body: Option<String>,
    /// Extra header as name:value, repeatable
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,
  },
  /// Queue an analytics event given as JSON
  Analytics { event: String },
  /// Queue a content update request
  Updates,
  /// Show pending work
  List,
}

fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
  let (name, value) = raw
    .split_once(':')
    .ok_or_else(|| format!("header must look like name:value, got {}", raw))?;
  Ok((name.trim().to_ascii_lowercase(), value.trim().to_string()))
}

fn init_logging(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("offline-worker")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix("offline-worker")
    .filename_suffix("log")
    .build(&log_dir)
    .map_err(|e| eyre!("Failed to open log file: {}", e))?;
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env("OFFLINE_WORKER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  let stderr = verbose.then(|| fmt::layer().with_writer(std::io::stderr));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(stderr)
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let cli = Cli::parse();
  let _guard = init_logging(cli.verbose)?;

  let mut config = Config::load(cli.config.as_deref())?;
  if let Some(origin) = cli.origin.clone() {
    config.origin = origin;
  }

  if cli.memory {
    let queue: Arc<dyn SyncStore> = Arc::new(MemoryQueue::new());
    run(cli, config, Arc::new(MemoryStorage::new()), queue).await
  } else if cli.no_cache {
    let queue: Arc<dyn SyncStore> = Arc::new(open_sqlite(cli.db.as_deref())?);
    run(cli, config, Arc::new(NoopStorage), queue).await
  } else {
    let storage = Arc::new(open_sqlite(cli.db.as_deref())?);
    let queue: Arc<dyn SyncStore> = Arc::clone(&storage) as Arc<dyn SyncStore>;
    run(cli, config, storage, queue).await
  }
}

fn open_sqlite(path: Option<&Path>) -> Result<SqliteStorage> {
  match path {
    Some(path) => SqliteStorage::open_at(path),
    None => SqliteStorage::open(),
  }
}

async fn run<S: CacheStorage + 'static>(
  cli: Cli,
  config: Config,
  storage: Arc<S>,
  sync_store: Arc<dyn SyncStore>,
) -> Result<()> {
  let network = Arc::new(HttpNetwork::new(config.origin_url()?, config.request_timeout())?);
  let platform = Platform {
    network: Arc::clone(&network) as Arc<dyn Network>,
    clients: Arc::new(LocalClients::new()) as Arc<dyn Clients>,
    notifier: Arc::new(LocalNotifier::new()) as Arc<dyn Notifier>,
    sync_store,
  };
  let worker = ServiceWorker::new(&config, storage, platform)?;
  info!(version = %config.version, origin = %worker.origin(), "worker ready");

  match cli.command {
    Command::Install => {
      let report = worker.start().await?;
      println!("Installed version {}", config.version);
      for asset in &report.install.cached {
        println!("  cached  {}", asset);
      }
      for asset in &report.install.failed {
        println!("  failed  {}", asset);
      }
      if let Some(activate) = report.activate {
        for name in &activate.deleted {
          println!("  removed {}", name);
        }
      }
    }

    Command::Fetch {
      url,
      accept,
      method,
      body,
    } => {
      let mut request = Request::new(&method, network.resolve(&url)?);
      if let Some(accept) = accept {
        request = request.with_header("accept", &accept);
      }
      if let Some(body) = body {
        request = request.with_body(body);
      }

      let (response, source) = match worker.dispatch(WorkerEvent::Fetch(request.clone())).await? {
        EventOutcome::Fetch(FetchOutcome::Served(served)) => {
          (served.response, format!("{:?}", served.source).to_lowercase())
        }
        EventOutcome::Fetch(FetchOutcome::PassThrough) => {
          (network.fetch(&request).await?, "pass-through".to_string())
        }
        other => return Err(eyre!("Unexpected fetch outcome: {:?}", other)),
      };

      eprintln!(
        "{} {} ({}, {})",
        response.status,
        request.url,
        source,
        response.content_type().unwrap_or("no content type")
      );
      println!("{}", response.text());
    }

    Command::Sync { tag } => {
      let event = if tag == PERIODIC_CONTENT_TAG {
        WorkerEvent::PeriodicSync { tag }
      } else {
        match SyncTag::from_str(&tag) {
          Ok(sync_tag) => WorkerEvent::Sync {
            tag: sync_tag.registration().to_string(),
          },
          Err(_) => WorkerEvent::Sync { tag },
        }
      };

      match worker.dispatch(event).await? {
        EventOutcome::Synced(Some(report)) => println!(
          "delivered {}, retained {}, applied {}",
          report.delivered, report.retained, report.applied
        ),
        EventOutcome::Synced(None) => println!("nothing to drain"),
        other => return Err(eyre!("Unexpected sync outcome: {:?}", other)),
      }
    }

    Command::Queue { action } => queue_command(worker.sync_store().as_ref(), action)?,

    Command::Push { payload } => {
      let data = payload.map(String::into_bytes);
      if let EventOutcome::Pushed(notification) = worker.dispatch(WorkerEvent::Push { data }).await? {
        let json = serde_json::to_string_pretty(&notification)
          .map_err(|e| eyre!("Failed to encode notification: {}", e))?;
        println!("{}", json);
      }
    }

    Command::Click { action, tag } => {
      if let EventOutcome::Clicked(outcome) = worker
        .dispatch(WorkerEvent::NotificationClick { action, tag })
        .await?
      {
        println!("{:?}", outcome);
      }
    }

    Command::Caches => {
      let storage = worker.registry().storage();
      let current = worker.registry().current_names();
      for name in storage.cache_names()? {
        let marker = if current.contains(&name) { "*" } else { " " };
        println!("{} {:<32} {:>5}", marker, name, storage.keys(&name)?.len());
      }
    }
  }

  Ok(())
}

fn queue_command(store: &dyn SyncStore, action: QueueCommand) -> Result<()> {
  let payload = match action {
    QueueCommand::Form {
      url,
      method,
      body,
      headers,
    } => SyncPayload::Form {
      url,
      method: method.to_ascii_uppercase(),
      headers: headers.into_iter().collect(),
      body,
    },
    QueueCommand::Analytics { event } => SyncPayload::Analytics {
      event: serde_json::from_str(&event).map_err(|e| eyre!("Event is not valid JSON: {}", e))?,
    },
    QueueCommand::Updates => SyncPayload::ContentUpdates,
    QueueCommand::List => {
      for tag in [SyncTag::Forms, SyncTag::Analytics, SyncTag::ContentUpdates] {
        for task in store.pending(tag)? {
          let payload = serde_json::to_string(&task.payload)
            .map_err(|e| eyre!("Failed to encode task: {}", e))?;
          println!("{:>4} {:<16} {}", task.id, tag.as_str(), payload);
        }
      }
      return Ok(());
    }
  };

  let id = store.enqueue(&payload)?;
  println!("queued #{} under {}", id, payload.tag().registration());
  Ok(())
}
