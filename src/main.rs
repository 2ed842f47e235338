//! Delta-Crawl main entry point
//!
//! This is the command-line interface for the Delta-Crawl resumable crawler.

use anyhow::Context;
use clap::Parser;
use delta_crawl::config::{load_config_with_hash, validate_for_pass, Config};
use delta_crawl::crawler::run_crawl;
use delta_crawl::output::{load_statistics, print_statistics};
use delta_crawl::state::EntryStatus;
use delta_crawl::storage::{open_storage, shared, RunStatus, Storage};
use delta_crawl::{CrawlPass, Ledger};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Delta-Crawl: a resumable, multi-stage crawler
///
/// Each pass walks a fixed state machine of page types. Every task is
/// recorded in a ledger before it is fetched, so an interrupted pass picks
/// up exactly where it stopped when started again.
#[derive(Parser, Debug)]
#[command(name = "delta-crawl")]
#[command(version = "1.0.0")]
#[command(about = "A resumable multi-stage crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Crawl pass to run (discovery, feedback, actor)
    #[arg(short, long, default_value = "discovery")]
    pass: CrawlPass,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["stats", "revive_dead"])]
    dry_run: bool,

    /// Show statistics of the pass from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "revive_dead"])]
    stats: bool,

    /// Return dead-lettered tasks of the pass to pending and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    revive_dead: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    validate_for_pass(&config, cli.pass)
        .with_context(|| format!("configuration cannot run the {} pass", cli.pass))?;

    if cli.dry_run {
        handle_dry_run(&config, cli.pass)
    } else if cli.stats {
        handle_stats(&config, cli.pass)
    } else if cli.revive_dead {
        handle_revive_dead(&config, cli.pass)
    } else {
        handle_crawl(config, &config_hash, cli.pass).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("delta_crawl=info,warn"),
            1 => EnvFilter::new("delta_crawl=debug,info"),
            2 => EnvFilter::new("delta_crawl=trace,debug"),
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

/// Handles the --dry-run mode: shows the configuration and where the pass
/// would start, without writing anything
fn handle_dry_run(config: &Config, pass: CrawlPass) -> anyhow::Result<()> {
    println!("=== Delta-Crawl Dry Run ({} pass) ===\n", pass);

    println!("Crawler Configuration:");
    println!("  Host: {}", config.crawler.host);
    println!("  Workers: {}", config.crawler.workers);
    println!("  Request delay: {}ms", config.crawler.request_delay_ms);
    println!("  Max attempts: {}", config.crawler.max_attempts);
    println!(
        "  Category: {} ({})",
        config.crawler.category_id, config.crawler.category_url_name
    );

    println!("\nSession:");
    println!("  User agent: {}", config.session.user_agent);
    println!("  Cookies: {}", config.session.cookie_pairs()?.len());
    println!("  Proxies: {}", config.session.proxies.len());

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Collection: {}", config.storage.collection_for(pass));

    if pass == CrawlPass::Discovery {
        println!("\nCities ({}):", config.cities.len());
        for city in &config.cities {
            println!("  - {} ({})", city.name, city.id);
        }
    }

    let database = Path::new(&config.storage.database_path);
    if database.exists() {
        let storage = open_storage(database).context("failed to open database")?;
        let pending = storage.count_ledger_entries(pass, EntryStatus::Pending)?;
        println!("\n✓ Would resume {} unfinished tasks", pending);

        let source = match pass {
            CrawlPass::Discovery => None,
            CrawlPass::Feedback => Some(CrawlPass::Discovery),
            CrawlPass::Actor => Some(CrawlPass::Feedback),
        };
        if let Some(source) = source {
            let collection = config.storage.collection_for(source);
            println!(
                "✓ Would seed from {} records in '{}'",
                storage.count_documents(collection)?,
                collection
            );
        }
    } else {
        println!("\n✓ Database does not exist yet; the pass would start fresh");
    }

    println!("✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config, pass: CrawlPass) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = open_storage(Path::new(&config.storage.database_path))
        .context("failed to open database")?;
    let stats = load_statistics(&storage, pass, &config.storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --revive-dead mode: returns dead-lettered tasks to pending
fn handle_revive_dead(config: &Config, pass: CrawlPass) -> anyhow::Result<()> {
    let storage = open_storage(Path::new(&config.storage.database_path))
        .context("failed to open database")?;
    let ledger = Ledger::new(shared(storage), config.crawler.max_attempts);

    let revived = ledger.revive_dead_letters(pass)?;
    println!("✓ Revived {} dead-lettered {} tasks", revived, pass);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config, config_hash: &str, pass: CrawlPass) -> anyhow::Result<()> {
    tracing::info!(
        "Starting {} pass with {} workers against {}",
        pass,
        config.crawler.workers,
        config.crawler.host
    );

    let summary = run_crawl(config, config_hash, pass)
        .await
        .with_context(|| format!("{} pass failed", pass))?;

    match summary.status {
        RunStatus::Completed => tracing::info!("Crawl completed successfully"),
        RunStatus::Interrupted => {
            tracing::warn!("Crawl interrupted; run again to resume where it stopped")
        }
        other => tracing::warn!("Crawl ended with status {}", other.to_db_string()),
    }

    Ok(())
}
