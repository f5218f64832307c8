//! PhotonDB data store driver
//!
//! Exercises the value storage core from the command line:
//! - Synthetic workloads with duplicate values, NaNs and removals
//! - Compaction driven by the configured memory-pressure policy
//! - Configuration, hardware and metrics inspection
//!
//! # Examples
//!
//! ```bash
//! # Run a workload and print capacity stats
//! datastore run --ops 200000 --distinct 5000
//!
//! # Show the effective configuration
//! DATASTORE__COMPACTION__MAX_DEAD_RATIO=0.3 datastore config
//!
//! # Prometheus text after a short workload
//! datastore metrics
//! ```

use clap::{Args, Parser, Subcommand};
use photondb_datastore::accel::Accelerator;
use photondb_datastore::config::StoreConfig;
use photondb_datastore::hw_info::HwInfo;
use photondb_datastore::{metrics, EntryRef, UniqueStore};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// PhotonDB value storage core
#[derive(Parser, Debug)]
#[command(name = "datastore")]
#[command(version = photondb_datastore::VERSION)]
#[command(about = "PhotonDB compacting data store and unique store", long_about = None)]
#[command(author = "Anton Feldmann <afeldman@lynqtech.com>")]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(long, global = true, env = "DATASTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory path (overrides logging.directory)
    #[arg(long, global = true, env = "DATASTORE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive a synthetic workload and print capacity stats as JSON
    Run(WorkloadArgs),

    /// Print the effective configuration as TOML
    Config,

    /// Print sampled hardware information as JSON
    Hwinfo,

    /// Run a short workload and print Prometheus metrics
    Metrics(WorkloadArgs),

    /// Show version
    Version,
}

/// Synthetic workload parameters
#[derive(Args, Debug, Clone)]
struct WorkloadArgs {
    /// Number of add operations
    #[arg(long, default_value = "100000")]
    ops: usize,

    /// Number of distinct finite values
    #[arg(long, default_value = "1000")]
    distinct: usize,

    /// Every n-th add is a NaN (0 disables)
    #[arg(long, default_value = "13")]
    nan_every: usize,

    /// Release one held reference after every n-th add (0 disables)
    #[arg(long, default_value = "2")]
    remove_every: usize,

    /// Check the compaction policy after every n-th add
    #[arg(long, default_value = "4096")]
    check_every: usize,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = StoreConfig::load(cli.config.as_deref())?;

    // Setup logging
    setup_logging(&cli, &config)?;

    // Execute command
    match cli.command {
        Commands::Run(args) => run_command(&config, &args),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Hwinfo => {
            println!("{}", serde_json::to_string_pretty(&HwInfo::sample())?);
            Ok(())
        }
        Commands::Metrics(args) => metrics_command(&config, &args),
        Commands::Version => {
            println!("PhotonDB datastore {}", photondb_datastore::VERSION);
            println!("Rust implementation by Anton Feldmann");
            Ok(())
        }
    }
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli, config: &StoreConfig) -> anyhow::Result<()> {
    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(|| config.logging.directory.clone());
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "datastore.log");

    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.level)
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    // stdout carries command output, so console logs go to stderr
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(config.logging.ansi && !cli.no_color)
                .pretty(),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

/// Run command - workload followed by a stats dump
fn run_command(config: &StoreConfig, args: &WorkloadArgs) -> anyhow::Result<()> {
    info!(version = %photondb_datastore::VERSION, "Data store workload starting");

    let accel = Accelerator::detect();
    accel.verify()?;
    info!(level = %accel.features().level, "CPU features");

    let store = run_workload(config, args)?;
    let stats = store.stats();
    metrics::record_stats("workload", &stats);

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Metrics command - workload followed by a Prometheus dump
fn metrics_command(config: &StoreConfig, args: &WorkloadArgs) -> anyhow::Result<()> {
    metrics::init_metrics();
    let store = run_workload(config, args)?;
    metrics::record_stats("workload", &store.stats());
    print!("{}", metrics::export_metrics());
    Ok(())
}

fn run_workload(config: &StoreConfig, args: &WorkloadArgs) -> anyhow::Result<UniqueStore<f64>> {
    let mut store = UniqueStore::<f64>::with_config(config.buffer)?;
    let mut held: Vec<EntryRef> = Vec::new();
    let distinct = args.distinct.max(1);
    let mut compactions = 0usize;

    for i in 0..args.ops {
        let value = if args.nan_every > 0 && i % args.nan_every == 0 {
            f64::NAN
        } else {
            ((i * 7919) % distinct) as f64 * 0.5
        };
        held.push(store.add(value)?);

        if args.remove_every > 0 && i % args.remove_every == 0 && !held.is_empty() {
            let victim = held.swap_remove((i * 31) % held.len());
            store.remove(victim)?;
        }

        if args.check_every > 0 && (i + 1) % args.check_every == 0 {
            let stats = store.stats();
            if config.compaction.should_compact(&stats) {
                let compaction = store.compact()?;
                for entry in held.iter_mut() {
                    *entry = compaction.remap(*entry);
                }
                let reclaimed = store.reclaim_memory()?;
                if reclaimed == 0 {
                    warn!(
                        held_buffers = compaction.held_buffers().len(),
                        "Compaction freed no buffers"
                    );
                }
                compactions += 1;
            }
        }
    }

    store.verify()?;
    info!(
        ops = args.ops,
        distinct = store.len(),
        held = held.len(),
        compactions,
        "Workload finished"
    );
    Ok(store)
}
