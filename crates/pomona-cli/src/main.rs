mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pomona_client::{CkanCatalog, HttpFetcher};
use pomona_core::{
    BatchHarvestSummary, DbConfig, HarvestService, HttpConfig, JobQueue, JobResult, JobStatus,
    SourceEntry, SourcesConfig, SyncConfig, TracingReporter, TracingWorkerReporter, WorkerConfig,
    WorkerService, load_sources_config, validate_config,
};
use pomona_db::{JobRepository, MIGRATOR, RecordRepository};

use config::{Command, Config};

type Harvester = HarvestService<JobRepository, RecordRepository, CkanCatalog, HttpFetcher>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();
    let http_config = HttpConfig {
        timeout: Duration::from_secs(config.http_timeout),
        ..HttpConfig::default()
    };

    match config.command {
        Command::Harvest {
            ref source,
            config: ref config_path,
            concurrency,
        } => {
            let sources = load_sources(config_path.clone())?;
            let (harvester, _) = connect(&config, &http_config, concurrency).await?;
            handle_harvest(&harvester, &sources, source.as_deref()).await?;
        }
        Command::Validate {
            ref source,
            config: ref config_path,
        } => {
            let sources = load_sources(config_path.clone())?;
            let entry = find_source(&sources, source)?;
            let catalog = catalog(&config, &http_config)?;
            let raw = entry.config_json()?;
            match validate_config(raw.as_deref(), &catalog).await {
                Ok(source_config) => {
                    if let Some(user) = &source_config.user
                        && !catalog.can_write_as(user)
                    {
                        anyhow::bail!(
                            "Configuration of '{}': no API key for user '{}'; pass --catalog-user-key {}=KEY",
                            entry.name,
                            user,
                            user
                        );
                    }
                    println!("Configuration of '{}' is valid.", entry.name);
                }
                Err(e) => anyhow::bail!("Configuration of '{}': {}", entry.name, e.user_message()),
            }
        }
        Command::Worker {
            ref worker_id,
            poll_interval,
            concurrency,
        } => {
            let (harvester, queue) = connect(&config, &http_config, concurrency).await?;
            let mut worker_config =
                WorkerConfig::default().with_poll_interval(Duration::from_secs(poll_interval));
            if let Some(id) = worker_id {
                worker_config = worker_config.with_worker_id(id.clone());
            }
            let worker = WorkerService::new(queue, harvester, worker_config);

            let cancel = shutdown_token();
            worker
                .run(cancel, &TracingWorkerReporter, &TracingReporter)
                .await?;
        }
        Command::Jobs { status, limit } => {
            let pool = pool(&config).await?;
            list_jobs(&JobRepository::new(pool), status, limit).await?;
        }
        Command::Sources {
            config: ref config_path,
        } => {
            let sources = load_sources(config_path.clone())?;
            print_sources(&sources);
        }
    }

    Ok(())
}

// =============================================================================
// Wiring
// =============================================================================

fn load_sources(path: Option<PathBuf>) -> anyhow::Result<SourcesConfig> {
    load_sources_config(path)?.ok_or_else(|| {
        anyhow::anyhow!(
            "No sources file found. Create ~/.config/pomona/sources.toml or use --config"
        )
    })
}

fn find_source<'a>(sources: &'a SourcesConfig, name: &str) -> anyhow::Result<&'a SourceEntry> {
    sources
        .find_by_name(name)
        .ok_or_else(|| anyhow::anyhow!("Source '{}' not found in configuration", name))
}

async fn pool(config: &Config) -> anyhow::Result<PgPool> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is not set")?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(DbConfig::default().max_connections)
        .connect(url)
        .await
        .context("Failed to connect to database")?;

    MIGRATOR
        .run(&pool)
        .await
        .context("Failed to apply database migrations")?;

    Ok(pool)
}

fn catalog(config: &Config, http_config: &HttpConfig) -> anyhow::Result<CkanCatalog> {
    let url = config
        .catalog_url
        .as_deref()
        .context("CATALOG_URL is not set")?;
    if config.catalog_api_key.is_none() {
        warn!("CATALOG_API_KEY is not set; writes to the local catalog will be anonymous");
    }

    let catalog = CkanCatalog::new(url, config.catalog_api_key.clone(), http_config)
        .context("Failed to initialize local catalog client")?;
    Ok(config
        .catalog_user_keys
        .iter()
        .fold(catalog, |catalog, (user, key)| {
            catalog.with_user_key(user.as_str(), key.as_str())
        }))
}

async fn connect(
    config: &Config,
    http_config: &HttpConfig,
    concurrency: usize,
) -> anyhow::Result<(Harvester, JobRepository)> {
    let catalog = catalog(config, http_config)?;
    let fetcher = HttpFetcher::new(http_config).context("Failed to initialize HTTP client")?;
    let pool = pool(config).await?;

    let queue = JobRepository::new(pool.clone());

    let harvester = HarvestService::with_config(
        queue.clone(),
        RecordRepository::new(pool),
        catalog,
        fetcher,
        SyncConfig::default().with_concurrency(concurrency),
    );
    Ok((harvester, queue))
}

/// Token cancelled on Ctrl+C or SIGTERM.
///
/// Running jobs stop between records and are reported as cancelled.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("Shutdown signal received, stopping after the current records...");
        cancel.cancel();
    });

    token
}

// =============================================================================
// Commands
// =============================================================================

/// Harvest one named source, or every enabled source.
async fn handle_harvest(
    harvester: &Harvester,
    sources: &SourcesConfig,
    source_name: Option<&str>,
) -> anyhow::Result<()> {
    let reporter = TracingReporter;
    let cancel = shutdown_token();

    match source_name {
        Some(name) => {
            let source = find_source(sources, name)?;
            if !source.enabled {
                info!("Note: source '{}' is marked as disabled in configuration", name);
            }

            info!("Harvesting source: {} ({})", source.name, source.url);
            let result = harvester
                .harvest_source(source, &reporter, cancel)
                .await?;
            print_job_summary(source, &result);
        }
        None => {
            let enabled = sources.enabled_sources();
            if enabled.is_empty() {
                info!("No enabled sources found in configuration.");
                return Ok(());
            }

            info!("Starting batch harvest of {} sources", enabled.len());
            let summary = harvester
                .batch_harvest_with_progress(&enabled, &reporter, cancel)
                .await;
            print_batch_summary(&summary);
        }
    }

    Ok(())
}

async fn list_jobs(
    queue: &JobRepository,
    status: Option<JobStatus>,
    limit: usize,
) -> anyhow::Result<()> {
    let jobs = queue.list_jobs(status, limit).await?;

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<20}  {:<10}  {:<20}  {:>8}  {:>8}  {:>8}  {:>6}",
        "JOB", "SOURCE", "STATUS", "CREATED", "CREATED", "UPDATED", "UNCHGD", "FAILED"
    );
    for job in jobs {
        let stats = job.stats.unwrap_or_default();
        println!(
            "{:<36}  {:<20}  {:<10}  {:<20}  {:>8}  {:>8}  {:>8}  {:>6}",
            job.id,
            truncate(&job.source.id, 20),
            job.status,
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            stats.created,
            stats.updated,
            stats.not_modified,
            stats.failed
        );
        for gather_error in &job.gather_errors {
            println!("    gather error: {}", gather_error.message);
        }
    }

    Ok(())
}

fn print_sources(sources: &SourcesConfig) {
    if sources.sources.is_empty() {
        println!("No sources configured.");
        return;
    }

    for source in &sources.sources {
        let state = if source.enabled { "enabled" } else { "disabled" };
        println!(
            "{:<16} {:<9} {:<8} {}",
            source.name,
            state,
            source.family.as_str(),
            source.url
        );
        if let Some(description) = &source.description {
            println!("                 {}", description);
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn print_job_summary(source: &SourceEntry, result: &JobResult) {
    let stats = &result.stats;
    info!("");
    info!("Harvest {}: {} ({})", result.status, source.name, result.job_id);
    info!("  Gathered:            {}", stats.gathered);
    info!("  + Created:           {}", stats.created);
    info!("  ~ Updated:           {}", stats.updated);
    info!("  = Not modified:      {}", stats.not_modified);
    info!("  - Skipped:           {}", stats.skipped);
    info!("  x Failed:            {}", stats.failed);

    match result.status {
        JobStatus::Errored => warn!("Gather stage recorded errors; see `pomona jobs`"),
        JobStatus::Cancelled => warn!("Job cancelled before all records were processed"),
        _ if result.has_failures() => {
            warn!("{} records failed; see `pomona jobs` for details", stats.failed)
        }
        _ => info!("All records processed successfully!"),
    }
}

fn print_batch_summary(summary: &BatchHarvestSummary) {
    info!("");
    info!("BATCH HARVEST COMPLETE");
    info!("  Sources processed:   {}", summary.results.len());
    info!("  Successful:          {}", summary.successful_count());
    info!("  Failed:              {}", summary.failed_count());
    info!("  Total imported:      {}", summary.total_imported());

    for result in &summary.results {
        if let Ok(job) = &result.result
            && job.status == JobStatus::Finished
            && job.has_failures()
        {
            warn!("  {}: {} records failed", result.source_name, job.stats.failed);
        }
    }

    if summary.failed_count() > 0 {
        info!("Failed sources:");
        for result in summary.results.iter().filter(|r| !r.is_success()) {
            match &result.result {
                Err(err) => error!("  - {}: {}", result.source_name, err),
                Ok(job) => error!("  - {}: job {} {}", result.source_name, job.job_id, job.status),
            }
        }
    }
}
