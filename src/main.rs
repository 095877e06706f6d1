//! Tidepool main entry point
//!
//! This is the command-line interface for the Tidepool fetch engine.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tidepool::config::{load_config_with_hash, FetchConfig};
use tidepool::output::{format_job_report, load_statistics, print_statistics};
use tidepool::protocol::HttpProtocol;
use tidepool::source::StoreSource;
use tidepool::storage::{open_store, share, PageStore, SharedStore};
use tidepool::url::parse_with_host;
use tidepool::FetchOrchestrator;
use tracing_subscriber::EnvFilter;

/// Tidepool: a polite, priority-aware fetch engine
///
/// Tidepool fetches every page of its store that still needs fetching,
/// grouping URLs into per-host pools, honoring crawl delays and priorities,
/// and recording each outcome back into the store.
#[derive(Parser, Debug)]
#[command(name = "tidepool")]
#[command(version)]
#[command(about = "A polite, priority-aware fetch engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// File of seed URLs to add to the store, one per line
    #[arg(long, value_name = "FILE")]
    seeds: Option<PathBuf>,

    /// Priority given to the seed URLs
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    priority: i32,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the effective settings without fetching
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show page statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    let store = open_store(Path::new(&config.output.database_path))
        .with_context(|| format!("failed to open {}", config.output.database_path))?;

    if cli.stats {
        println!("Database: {}\n", config.output.database_path);
        let stats = load_statistics(&store)?;
        print_statistics(&stats);
        return Ok(());
    }

    let store = share(store);
    if let Some(seeds) = &cli.seeds {
        let added = add_seeds(&store, seeds, cli.priority)?;
        tracing::info!("Added {} seed URLs from {}", added, seeds.display());
    }

    handle_fetch(config, &config_hash, store).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("tidepool=info,warn"),
            1 => EnvFilter::new("tidepool=debug,info"),
            2 => EnvFilter::new("tidepool=trace,debug"),
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

/// Prints the effective configuration
fn handle_dry_run(config: &FetchConfig) {
    println!("=== Tidepool Dry Run ===\n");

    println!("Job:");
    println!("  Name: {}", config.fetch.job_name);
    println!("  Workers: {}", config.fetch.worker_count);
    println!("  Threads per pool: {}", config.fetch.pool_threads);
    println!("  Job timeout: {:?}", config.fetch.job_timeout());
    println!("  Task timeout: {:?}", config.fetch.task_timeout());
    println!("  Pending timeout: {:?}", config.fetch.pending_timeout());
    println!("  Retune interval: {:?}", config.fetch.retune_interval());
    println!("  Check interval: {:?}", config.fetch.check_interval());
    println!("  Max retries: {}", config.fetch.max_retries);
    if let Some(path) = &config.fetch.halt_file {
        println!("  Halt file: {}", path.display());
    }

    println!("\nPoliteness:");
    println!("  Crawl delay: {:?}", config.politeness.crawl_delay());
    println!("  Min crawl delay: {:?}", config.politeness.min_crawl_delay());
    println!(
        "  Host failure threshold: {}",
        config.politeness.host_failure_threshold
    );

    println!("\nThroughput:");
    if config.throughput.min_page_rate < 0.0 {
        println!("  Min page rate: disabled");
    } else {
        println!("  Min page rate: {} pages/s", config.throughput.min_page_rate);
    }
    println!("  Max low count: {}", config.throughput.max_low_count);
    match config.throughput.bandwidth_mbps {
        0 => println!("  Bandwidth: unlimited"),
        mbps => println!("  Bandwidth: {} Mbit/s", mbps),
    }

    println!("\nHTTP:");
    println!("  User agent: {}", config.http.user_agent);
    println!("  Timeout: {}s", config.http.timeout_secs);

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Store content: {}", config.output.store_content);

    println!("\n✓ Configuration is valid");
}

/// Adds the URLs of a seed file to the store
///
/// Blank lines and `#` comments are ignored; malformed URLs are logged and skipped.
fn add_seeds(store: &SharedStore, path: &Path, priority: i32) -> anyhow::Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seeds from {}", path.display()))?;

    let mut store = lock_store(store)?;

    let mut added = 0;
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_with_host(line) {
            Ok((url, host)) => {
                store.insert_or_get_page(url.as_str(), &host, priority)?;
                added += 1;
            }
            Err(e) => tracing::warn!("Skipping seed {}: {}", line, e),
        }
    }

    Ok(added)
}

/// Runs one fetch job over the fetchable pages of the store
async fn handle_fetch(config: FetchConfig, config_hash: &str, store: SharedStore) -> anyhow::Result<()> {
    let run_id = lock_store(&store)?.create_run(config_hash)?;

    let source = StoreSource::open(&store, config.fetch.max_retries)?;
    if source.is_empty() {
        tracing::info!("Nothing to fetch");
    }

    let protocol = HttpProtocol::new(&config.http).context("failed to build HTTP client")?;
    let orchestrator = FetchOrchestrator::new(&config, store.clone(), Arc::new(protocol));

    let halt = orchestrator.halt_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, halting the job ...");
            halt.cancel();
        }
    });

    let report = orchestrator.run(Box::new(source)).await;

    lock_store(&store)?.complete_run(run_id, &report.end_state.to_string())?;
    println!("{}", format_job_report(&report));

    Ok(())
}

fn lock_store(
    store: &SharedStore,
) -> anyhow::Result<std::sync::MutexGuard<'_, dyn PageStore + Send + 'static>> {
    store
        .lock()
        .map_err(|_| anyhow::anyhow!("page store lock poisoned"))
}
