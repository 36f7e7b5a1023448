//! Saga-Crawler main entry point
//!
//! This is the command-line interface for the Saga-Crawler web-novel crawler.

use anyhow::{bail, Context};
use clap::Parser;
use saga_crawler::config::{load_config_with_hash, validate, Config, Job};
use saga_crawler::crawler::build_http_client;
use saga_crawler::index::connect_index;
use saga_crawler::ledger::ProgressLedger;
use saga_crawler::output::{print_job_report, print_store_stats, print_summary};
use saga_crawler::runner::{run_jobs, SharedDeps};
use saga_crawler::storage::{open_store, JsonStoryWriter, Store, StoreSet};
use saga_crawler::StopSignal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Saga-Crawler: a resumable web-novel crawler
///
/// Saga-Crawler walks category listings or single story pages of a
/// truyenfull-style site, fetches chapters politely, and stores them in SQLite
/// and JSON. With --resume, finished work recorded in the progress ledger is
/// skipped on the next run.
#[derive(Parser, Debug)]
#[command(name = "saga-crawler")]
#[command(version)]
#[command(about = "A resumable web-novel crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Crawl a single story page
    #[arg(long, value_name = "URL", conflicts_with = "category")]
    story: Option<Url>,

    /// Crawl one or more categories (comma separated slugs)
    #[arg(long, value_name = "SLUG", value_delimiter = ',')]
    category: Vec<String>,

    /// Chapters to fetch per story (0 means the default cap)
    #[arg(long, value_name = "N")]
    chapters: Option<u32>,

    /// Listing pages to walk per category
    #[arg(long, value_name = "N")]
    listing_pages: Option<u32>,

    /// Stories to take from each category (0 means unbounded)
    #[arg(long, value_name = "N")]
    max_stories: Option<u32>,

    /// Delay between requests to the same host, in seconds
    #[arg(long, value_name = "SECS")]
    delay: Option<f64>,

    /// Concurrent page fetches per job
    #[arg(long, value_name = "N")]
    concurrency: Option<u32>,

    /// Jobs run at the same time
    #[arg(long, value_name = "N", default_value_t = 1)]
    parallel_jobs: usize,

    /// Skip work recorded in the progress ledger and record new work there
    #[arg(long)]
    resume: bool,

    /// Ledger id for the job (defaults to the story or category slug)
    #[arg(long, value_name = "ID")]
    job_id: Option<String>,

    /// Do not write story JSON files
    #[arg(long)]
    no_files: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let config = load_effective_config(&cli)?;

    if cli.stats {
        return handle_stats(&config);
    }

    let jobs = build_jobs(&cli, &config)?;
    if jobs.is_empty() {
        bail!("nothing to crawl: pass --story URL or --category SLUG");
    }

    if cli.dry_run {
        handle_dry_run(&config, &jobs);
        return Ok(());
    }

    let succeeded = handle_crawl(&cli, config, jobs).await?;
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("saga_crawler=info,warn"),
            1 => EnvFilter::new("saga_crawler=debug,info"),
            2 => EnvFilter::new("saga_crawler=trace,debug"),
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

/// Loads the config file (if any) and applies the command-line overrides
fn load_effective_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        None => Config::default(),
    };

    if let Some(chapters) = cli.chapters {
        config.crawler.chapter_limit = chapters;
    }
    if let Some(pages) = cli.listing_pages {
        config.crawler.listing_pages = pages;
    }
    if let Some(max) = cli.max_stories {
        config.crawler.max_stories = max;
    }
    if let Some(concurrency) = cli.concurrency {
        config.crawler.concurrency = concurrency;
    }
    if let Some(delay) = cli.delay {
        if !delay.is_finite() || delay < 0.0 {
            bail!("--delay must be a non-negative number of seconds, got {}", delay);
        }
        config.politeness.delay_ms = (delay * 1000.0).round() as u64;
    }
    if cli.resume {
        config.crawler.resume = true;
    }
    if cli.no_files {
        config.output.story_dir = None;
    }

    validate(&config).context("invalid configuration")?;
    Ok(config)
}

fn build_jobs(cli: &Cli, config: &Config) -> anyhow::Result<Vec<Job>> {
    let mut jobs: Vec<Job> = match &cli.story {
        Some(url) => vec![Job::story(url.clone(), config)],
        None => cli
            .category
            .iter()
            .map(|slug| slug.trim())
            .filter(|slug| !slug.is_empty())
            .map(|slug| Job::category(slug, config))
            .collect(),
    };

    if let Some(id) = &cli.job_id {
        if jobs.len() > 1 {
            bail!("--job-id can only be used with a single job");
        }
        jobs = jobs.into_iter().map(|job| job.with_id(id.clone())).collect();
    }
    Ok(jobs)
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, jobs: &[Job]) {
    println!("=== Saga-Crawler Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Concurrency: {}", config.crawler.concurrency);
    println!("  Chapter limit: {}", config.crawler.chapter_limit);
    println!("  Listing pages: {}", config.crawler.listing_pages);
    println!("  Max stories: {}", config.crawler.max_stories);
    println!("  Resume: {}", config.crawler.resume);

    println!("\nPoliteness:");
    println!("  Delay: {}ms (jitter: {})", config.politeness.delay_ms, config.politeness.jitter);
    println!("  Per-host concurrency: {}", config.politeness.per_host_concurrency);
    println!("  Max retries: {}", config.politeness.max_retries);
    println!("  Timeout: {}s", config.politeness.timeout_secs);

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Progress: {}", config.output.progress_dir);
    match &config.output.story_dir {
        Some(dir) => println!("  Story files: {}", dir),
        None => println!("  Story files: disabled"),
    }
    if config.index.enabled {
        println!("  Index: {}/{}", config.index.url, config.index.name);
    }

    println!("\nJobs ({}):", jobs.len());
    for job in jobs {
        match job.start_url(&config.site) {
            Ok(url) => println!("  - {} -> {}", job.id, url),
            Err(e) => println!("  - {} -> invalid start URL: {}", job.id, e),
        }
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);
    let store = open_store(Path::new(&config.output.database_path))?;
    print_store_stats(&store.stats()?);
    Ok(())
}

/// Handles the main crawl operation
///
/// Returns false if any job could not start.
async fn handle_crawl(cli: &Cli, config: Config, jobs: Vec<Job>) -> anyhow::Result<bool> {
    let timeout = Duration::from_secs(config.politeness.timeout_secs);
    let client = build_http_client(&config.user_agent, timeout)?;

    let sqlite = Arc::new(open_store(Path::new(&config.output.database_path))?);
    let mut stores = StoreSet::new().with(sqlite.clone());
    if let Some(dir) = &config.output.story_dir {
        stores = stores.with(Arc::new(JsonStoryWriter::new(dir)));
    }
    let store: Arc<dyn Store> = Arc::new(stores);

    let index = connect_index(&config.index, client.clone()).await;

    let stop = StopSignal::new();
    let signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight requests");
            signal.request_stop();
        }
    });

    let shared = SharedDeps {
        client,
        politeness: config.politeness.clone(),
        ledger: Arc::new(ProgressLedger::with_dir(&config.output.progress_dir)),
        store,
        index,
        stop,
        site: config.site.clone(),
    };

    tracing::info!("Starting {} job(s), {} at a time", jobs.len(), cli.parallel_jobs.max(1));
    let summary = run_jobs(jobs, cli.parallel_jobs, |job| shared.for_job(job)).await;

    for report in &summary.reports {
        print_job_report(report);
    }
    if summary.reports.len() + summary.failed_jobs.len() > 1 {
        print_summary(&summary);
    }
    match sqlite.stats() {
        Ok(stats) => print_store_stats(&stats),
        Err(e) => tracing::warn!("Could not read store totals: {}", e),
    }

    Ok(summary.is_success())
}
