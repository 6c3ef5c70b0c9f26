//! Sumi-Fleet main entry point
//!
//! Command-line interface for running crawl workers and operating the shared
//! frontier: seeding, pause/resume/stop/empty, status and dead letters.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use sumi_fleet::config::{load_config_with_hash, Config};
use sumi_fleet::crawler::run_workers;
use sumi_fleet::frontier::{ControlScope, Frontier};
use sumi_fleet::output::{dead_letters_json, format_dead_letters, load_statistics, print_statistics};
use sumi_fleet::storage::SqliteDocumentStore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Sumi-Fleet: a distributed, polite web crawler
///
/// Every command opens the frontier database named in the configuration,
/// so workers and operators on the same host (or a shared volume) see the
/// same queue.
#[derive(Parser, Debug)]
#[command(name = "sumi-fleet")]
#[command(version)]
#[command(about = "A distributed, polite web crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run fetch workers until Ctrl-C
    Work {
        /// Partitions to own, e.g. `0,1`; all partitions by default
        #[arg(long, value_delimiter = ',')]
        partitions: Option<Vec<u32>>,
    },

    /// Add seed URLs at depth 0
    Seed {
        #[arg(value_name = "URL", required = true)]
        urls: Vec<String>,
    },

    /// Stop claiming new jobs and abort in-flight fetches
    Pause {
        /// Pause only this process instead of every worker
        #[arg(long)]
        local: bool,
    },

    /// Resume claiming; also clears a stop
    Resume,

    /// Drop every pending job and refuse new claims until resumed
    Stop,

    /// Drop waiting jobs
    Empty,

    /// Show queue counts, flags and recent errors
    Status,

    /// List jobs that exhausted their retries
    DeadLetters {
        /// Maximum number of entries
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded (hash: {})", config_hash);

    match cli.command {
        Command::Work { partitions } => handle_work(&config, partitions).await,
        Command::Seed { urls } => handle_seed(&config, &urls),
        Command::Pause { local } => {
            let scope = if local {
                ControlScope::Local
            } else {
                ControlScope::Global
            };
            open_frontier(&config)?.pause(scope)?;
            println!("Frontier paused; workers are aborting active jobs.");
            Ok(())
        }
        Command::Resume => {
            open_frontier(&config)?.resume(ControlScope::Global)?;
            println!("Frontier resumed.");
            Ok(())
        }
        Command::Stop => {
            open_frontier(&config)?.stop()?;
            println!("Frontier stopped and emptied. Run `resume` before seeding again.");
            Ok(())
        }
        Command::Empty => {
            open_frontier(&config)?.empty()?;
            println!("Frontier emptied.");
            Ok(())
        }
        Command::Status => handle_status(&config),
        Command::DeadLetters { limit, json } => {
            let letters = open_frontier(&config)?.dead_letters(limit)?;
            if json {
                println!("{}", dead_letters_json(&letters)?);
            } else {
                print!("{}", format_dead_letters(&letters));
            }
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_fleet=info,warn"),
            1 => EnvFilter::new("sumi_fleet=debug,info"),
            2 => EnvFilter::new("sumi_fleet=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_frontier(config: &Config) -> anyhow::Result<Frontier> {
    Frontier::open(config)
        .with_context(|| format!("Failed to open frontier at {}", config.queue.database_path))
}

/// Runs workers until Ctrl-C
async fn handle_work(config: &Config, partitions: Option<Vec<u32>>) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let on_interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, re-queueing active jobs");
            on_interrupt.cancel();
        }
    });

    run_workers(config, partitions, shutdown).await?;
    Ok(())
}

/// Adds seed URLs, skipping any that are not absolute http(s) URLs
fn handle_seed(config: &Config, urls: &[String]) -> anyhow::Result<()> {
    let frontier = open_frontier(config)?;
    if frontier.is_stopped()? {
        anyhow::bail!("Frontier is stopped; run `resume` first");
    }

    let mut added = 0;
    for raw in urls {
        let valid = url::Url::parse(raw)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
            .unwrap_or(false);
        if !valid {
            tracing::warn!("Skipping invalid seed URL: {}", raw);
            continue;
        }

        match frontier.add_url(raw, 0, None)? {
            Some(id) => {
                tracing::info!("Seeded {} (job {})", raw, id);
                added += 1;
            }
            None => tracing::warn!("Seed {} rejected", raw),
        }
    }

    println!("Seeded {} of {} URLs.", added, urls.len());
    Ok(())
}

fn handle_status(config: &Config) -> anyhow::Result<()> {
    let frontier = open_frontier(config)?;

    let storage_path = Path::new(&config.storage.database_path);
    let storage = if storage_path.exists() {
        Some(SqliteDocumentStore::open(storage_path)?)
    } else {
        None
    };

    let stats = load_statistics(&frontier, storage.as_ref())?;
    print_statistics(&stats);
    Ok(())
}
