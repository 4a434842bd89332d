use clap::{Parser, Subcommand};
use color_eyre::{eyre::WrapErr, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use lectern::config::Config;
use lectern::{
  ConnectivityMonitor, HttpTransport, PendingQueue, ReconcileClient, SyncEngine, SyncOutcome,
  SyncStore,
};

#[derive(Parser, Debug)]
#[command(name = "lectern")]
#[command(about = "Offline-first sync engine for the Lectern reading app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/lectern/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity and how many changes are pending sync
  Status,
  /// Run one sync pass now
  Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  // Without the local store the app can only run online-only: nothing can
  // be queued or cached, and offline writes must fail loudly rather than
  // be silently dropped.
  let store = open_store(&config)
    .wrap_err("Local storage unavailable; running online-only, changes cannot be queued")?;
  let store = Arc::new(store);

  let monitor = Arc::new(ConnectivityMonitor::new());
  let queue = Arc::new(PendingQueue::new(Arc::clone(&store)));

  let transport = HttpTransport::new(
    &config.sync.server_url()?,
    Config::get_sync_token()?,
    config.sync.timeout(),
  )?;
  let client = ReconcileClient::new(Arc::clone(&queue), transport, config.sync.timeout());
  let engine = SyncEngine::new(monitor, Arc::clone(&queue), store, client);

  match args.command {
    Command::Status => {
      let status = engine.status()?;
      println!("{}", status.message);
      if let Some(at) = status.last_sync {
        println!("last sync: {}", at.to_rfc3339());
      }
    }
    Command::Sync => match engine.sync_now().await {
      SyncOutcome::Completed(report) => {
        println!("processed {}, failed {}", report.processed, report.failed);
        for result in report.results.iter().filter(|r| !r.ok) {
          if let Some(error) = &result.error {
            println!("  #{}: {}", result.id, error);
          }
        }
      }
      SyncOutcome::AlreadyInFlight => println!("a sync pass is already running"),
      SyncOutcome::Failed(err) => return Err(err.wrap_err("sync failed, queue retained")),
    },
  }

  Ok(())
}

fn open_store(config: &Config) -> Result<SyncStore> {
  match &config.data_dir {
    Some(dir) => {
      std::fs::create_dir_all(dir)
        .wrap_err_with(|| format!("Failed to create data directory {}", dir.display()))?;
      SyncStore::open(&dir.join("sync.db"))
    }
    None => SyncStore::open_default(),
  }
}
