//! couchriver CLI: run a CouchDB → Elasticsearch river and manage its state.
//!
//! # Commands
//! ```text
//! couchriver run        --config river.json
//! couchriver checkpoint show  --config river.json
//! couchriver checkpoint reset --config river.json
//! couchriver info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use couchriver_core::sink::LoggingListener;
use couchriver_core::{CheckpointManager, RiverConfig};
use couchriver_elastic::{BulkSettings, EsBulkSink, EsConfig};
use couchriver_feed::RiverBuilder;
use tracing::info;

mod config;
mod telemetry;

use config::CliConfig;

#[derive(Parser)]
#[command(
    name = "couchriver",
    about = "Mirror a CouchDB database into an Elasticsearch index",
    long_about = "
couchriver follows a CouchDB database's continuous _changes feed and applies
every change to an Elasticsearch index through the _bulk API. Progress is
checkpointed so a restarted river resumes where it stopped.

ENVIRONMENT VARIABLES:
  RUST_LOG    Log filter directives; overrides the config file's \"log\" section
",
    version
)]
struct Cli {
    /// Log at debug level (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the river and keep it running until Ctrl-C
    Run {
        /// Path to the JSON settings file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Inspect or reset the stored checkpoint
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Show defaults and supported backends
    Info,
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Print the last stored sequence
    Show {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Delete the checkpoint so the next run replays the whole feed
    Reset {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let cfg = load(&config, cli.verbose)?;
            cmd_run(cfg).await
        }
        Commands::Checkpoint { action } => match action {
            CheckpointAction::Show { config } => {
                let cfg = load(&config, cli.verbose)?;
                cmd_checkpoint_show(&cfg).await
            }
            CheckpointAction::Reset { config } => {
                let cfg = load(&config, cli.verbose)?;
                cmd_checkpoint_reset(&cfg).await
            }
        },
        Commands::Info => cmd_info(),
    }
}

fn load(path: &std::path::Path, verbose: bool) -> Result<CliConfig> {
    let mut cfg = CliConfig::load(path)?;
    if verbose {
        cfg.log.level = "debug".into();
    }
    telemetry::init_tracing(&cfg.log);
    Ok(cfg)
}

async fn cmd_run(cfg: CliConfig) -> Result<()> {
    let client = cfg.es_client()?;
    let store = cfg.checkpoint_store(Arc::clone(&client)).await?;
    let sink = EsBulkSink::new(
        client,
        BulkSettings::from_river(&cfg.river),
        Arc::new(LoggingListener),
    );

    let mut river = RiverBuilder::from_config(cfg.river).build(Arc::new(sink), store)?;
    river.start()?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, stopping river");
    river.stop().await?;
    Ok(())
}

async fn checkpoint_manager(cfg: &CliConfig) -> Result<CheckpointManager> {
    let store = cfg.checkpoint_store(cfg.es_client()?).await?;
    Ok(CheckpointManager::new(store, cfg.river.name.clone()))
}

async fn cmd_checkpoint_show(cfg: &CliConfig) -> Result<()> {
    let mgr = checkpoint_manager(cfg).await?;
    match mgr.load().await? {
        Some(seq) => println!("river [{}] last_seq: {seq}", mgr.key()),
        None => println!("river [{}] has no checkpoint; it will start from the beginning", mgr.key()),
    }
    Ok(())
}

async fn cmd_checkpoint_reset(cfg: &CliConfig) -> Result<()> {
    let mgr = checkpoint_manager(cfg).await?;
    mgr.reset().await?;
    println!("river [{}] checkpoint removed", mgr.key());
    Ok(())
}

fn cmd_info() -> Result<()> {
    let river = RiverConfig::new("<name>");
    let es = EsConfig::default();
    println!("couchriver v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Defaults:");
    println!("  CouchDB:              {}://{}:{}", river.couchdb.protocol, river.couchdb.host, river.couchdb.port);
    println!("  Database:             river name");
    println!("  Index / type:         database name");
    println!("  Heartbeat:            {:?}", river.couchdb.heartbeat);
    println!("  Read timeout:         {:?} (3 x heartbeat)", river.read_timeout());
    println!("  Reconnect backoff:    {:?}", river.couchdb.backoff);
    println!("  Bulk size:            {}", river.index.bulk_size);
    println!("  Bulk timeout:         {:?}", river.index.bulk_timeout);
    println!("  Flush interval:       {:?}", river.index.flush_interval);
    println!("  Max concurrent bulk:  {}", river.index.max_concurrent_bulk);
    println!("  Throttle size:        {} (bulk size x 5, -1 = unbounded)", river.index.bulk_size * 5);
    println!("  River index:          {}", river.river_index);
    println!("  Elasticsearch:        {}", es.url);
    println!();
    println!("Checkpoint backends: elasticsearch (default), memory");
    if cfg!(feature = "sqlite") {
        println!("                     sqlite");
    } else {
        println!("                     sqlite (build with --features sqlite)");
    }
    Ok(())
}
