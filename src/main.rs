//! spider main entry point
//!
//! This is the command-line interface for the spider-core crawl engine.

use anyhow::Context;
use clap::Parser;
use spider_core::config::{load_config_with_hash, Config};
use spider_core::crawler::Coordinator;
use spider_core::executor::HttpExecutorFactory;
use spider_core::output::{print_summary, sink_from_config};
use spider_core::url::CrawlScope;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// spider: an adaptive, resumable website crawler
///
/// spider crawls a single site with a pool of concurrent workers, backs off
/// when the server signals rate limiting, and checkpoints progress so an
/// interrupted crawl picks up where it left off.
#[derive(Parser, Debug)]
#[command(name = "spider")]
#[command(version)]
#[command(about = "An adaptive, resumable website crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume from the checkpoint if one exists (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Start a fresh crawl, deleting any checkpoint
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else {
        handle_crawl(config, config_hash, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("spider_core=info,spider=info,warn"),
            1 => EnvFilter::new("spider_core=debug,spider=debug,info"),
            2 => EnvFilter::new("spider_core=trace,spider=trace,debug"),
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

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    let scope = CrawlScope::from_config(&config.crawl, &config.fetch)
        .context("Start URL is not crawlable")?;

    println!("=== spider Dry Run ===\n");

    println!("Crawl:");
    println!("  Start URL: {}", config.crawl.start_url);
    println!("  Domain: {}", scope.domain());
    println!("  Path prefix: {}", scope.path_prefix().unwrap_or("/"));
    println!("  Subdomains: {}", config.crawl.allow_subdomains);
    match config.crawl.max_depth {
        Some(depth) => println!("  Max depth: {}", depth),
        None => println!("  Max depth: unlimited"),
    }
    match config.crawl.max_pages {
        Some(pages) => println!("  Max pages: {}", pages),
        None => println!("  Max pages: unlimited"),
    }

    println!("\nRate Control:");
    println!(
        "  Workers: {} (min {}, max {})",
        config.rate.initial_workers, config.rate.min_workers, config.rate.max_workers
    );
    println!(
        "  Delay: {:.2}s (min {:.2}s, max {:.2}s)",
        config.rate.initial_delay, config.rate.min_delay, config.rate.max_delay
    );
    println!("  Window: {} requests", config.rate.window_size);

    println!("\nRetries:");
    println!("  Max retries: {}", config.retry.max_retries);
    println!("  Backoff factor: {}", config.retry.backoff_factor);

    println!("\nCheckpoint:");
    if config.checkpoint.enabled {
        println!("  Path: {}", config.checkpoint.path);
        println!("  Auto-save interval: {}s", config.checkpoint.auto_save_interval);
    } else {
        println!("  Disabled");
    }

    println!("\nOutput:");
    match &config.output.pages_path {
        Some(path) => println!("  Pages: {}", path),
        None => println!("  Pages: not recorded"),
    }

    println!("\n✓ Configuration is valid");
    println!("✓ Would start crawling at {}", config.crawl.start_url);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: String, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh crawl (ignoring previous state)");
    } else {
        tracing::info!("Starting crawl (will resume if a checkpoint exists)");
    }

    let factory = HttpExecutorFactory::from_config(&config)?;
    let sink = sink_from_config(&config.output, !fresh)?;
    let coordinator = Coordinator::new(config, Arc::new(factory))
        .with_sink(sink)
        .with_config_hash(config_hash)
        .fresh(fresh);

    let stop = coordinator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping crawl (progress will be checkpointed)");
            stop.request_stop();
        }
    });

    match coordinator.run().await {
        Ok(summary) => {
            print_summary(&summary);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
