//! Solaris Daemon - clearance level progression and role sync
//!
//! Replays platform events through the progression engine, syncs roles and
//! announces promotions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use solaris_common::member::{Dossier, MemberId, MemberRecord};
use solaris_common::store::{ProgressionStore, SqliteStore};
use solarisd::config::Config;
use solarisd::daemon;
use solarisd::dispatcher::Dispatcher;
use solarisd::events::InboundEvent;
use solarisd::notifier::LogNotifier;
use solarisd::platform::MemoryPlatform;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "solarisd")]
#[command(about = "Solaris - clearance level progression daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: /etc/solaris/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process newline-delimited JSON events
    Run {
        /// Read events from a file instead of stdin
        #[arg(long)]
        events: Option<PathBuf>,
    },

    /// Show a member's clearance dossier
    Dossier {
        /// Platform member id
        member_id: u64,
    },

    /// Re-sync every member whose roles lag their level
    Reconcile,

    /// Write the default configuration
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig { path } = &cli.command {
        init_logging("info");
        return Config::save_default(path)
            .with_context(|| format!("writing default config to {}", path.display()));
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };
    init_logging(&config.daemon.log_level);

    info!("Solaris Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(
        SqliteStore::open(&config.daemon.database_path)
            .await
            .with_context(|| format!("opening database {}", config.daemon.database_path))?,
    );

    match cli.command {
        Commands::Dossier { member_id } => dossier(&config, store, MemberId(member_id)).await,
        Commands::Reconcile => {
            let dispatcher = offline_dispatcher(&config, store).await?;
            let summary = dispatcher.reconcile_pending().await?;
            dispatcher.shutdown().await;
            println!(
                "checked {}, announced {}, failed {}",
                summary.checked, summary.announced, summary.failed
            );
            Ok(())
        }
        Commands::Run { events } => run(&config, store, events.as_deref()).await,
        Commands::InitConfig { .. } => Ok(()),
    }
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn offline_dispatcher(config: &Config, store: Arc<SqliteStore>) -> Result<Dispatcher> {
    let table = config.validate()?;
    let platform = Arc::new(MemoryPlatform::with_ladder(&table));
    let notifier = Arc::new(LogNotifier::new(&config.announce.channel));
    daemon::assemble(config, store, platform, notifier).await
}

async fn dossier(config: &Config, store: Arc<SqliteStore>, member: MemberId) -> Result<()> {
    let table = config.level_table()?;
    let record = store
        .get(member)
        .await?
        .unwrap_or_else(|| MemberRecord::new(member));
    println!("{}", Dossier::from_record(&record, &table));
    Ok(())
}

async fn run(config: &Config, store: Arc<SqliteStore>, events: Option<&Path>) -> Result<()> {
    let dispatcher = offline_dispatcher(config, store).await?;

    if config.daemon.reconcile_on_start {
        dispatcher.reconcile_pending().await?;
    }

    match events {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            replay(&dispatcher, BufReader::new(file)).await?;
        }
        None => replay(&dispatcher, BufReader::new(tokio::io::stdin())).await?,
    }

    info!("Shutting down gracefully");
    dispatcher.shutdown().await;
    Ok(())
}

async fn replay<R>(dispatcher: &Dispatcher, reader: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut processed = 0usize;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading events")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<InboundEvent>(line) {
            Ok(inbound) => {
                if dispatcher.ingest(&inbound).await?.is_some() {
                    processed += 1;
                }
            }
            Err(e) => warn!("Skipping malformed event: {}", e),
        }
    }
    info!("Queued {} event(s)", processed);
    Ok(())
}
