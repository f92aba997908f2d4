use clap::{Parser, Subcommand};
use pomona_core::JobStatus;
use std::path::PathBuf;
use std::sync::LazyLock;

static VERSION_INFO: LazyLock<String> = LazyLock::new(|| {
    let version = env!("CARGO_PKG_VERSION");

    let commit = option_env!("VERGEN_GIT_SHA")
        .map(|s| s.chars().take(7).collect::<String>())
        .unwrap_or_else(|| "unknown".to_string());

    let dirty = match option_env!("VERGEN_GIT_DIRTY") {
        Some("true") => " (modified)",
        _ => "",
    };

    let built = option_env!("VERGEN_BUILD_DATE").unwrap_or("unknown"); // YYYY-MM-DD
    let target = option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown");
    let rustc = option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown");

    format!("{version}\ncommit: {commit}{dirty}\nbuilt: {built}\ntarget: {target}\nrustc: {rustc}")
});

pub fn version_info() -> &'static str {
    &VERSION_INFO
}

fn parse_user_key(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((user, key)) if !user.trim().is_empty() && !key.trim().is_empty() => {
            Ok((user.trim().to_string(), key.trim().to_string()))
        }
        _ => Err(format!("expected NAME=KEY, got '{}'", value)),
    }
}

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "pomona")]
#[command(
    author,
    version = version_info(),
    about = "Incremental harvester for CKAN-style open data catalogs"
)]
#[command(after_help = "Examples:
  pomona harvest
  pomona harvest --source toscana
  pomona validate --source toscana
  pomona worker --worker-id harvester-1
  pomona jobs --status errored

Sources are read from ~/.config/pomona/sources.toml unless --config is given.")]
pub struct Config {
    /// PostgreSQL database connection URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Base URL of the local catalog that harvested items are written into
    #[arg(long, env = "CATALOG_URL", global = true)]
    pub catalog_url: Option<String>,

    /// API key for reads and unattributed writes to the local catalog
    #[arg(long, env = "CATALOG_API_KEY", global = true, hide_env_values = true)]
    pub catalog_api_key: Option<String>,

    /// API key of a local user that sources attribute writes to (NAME=KEY, repeatable)
    #[arg(
        long = "catalog-user-key",
        env = "CATALOG_USER_KEYS",
        value_name = "NAME=KEY",
        value_delimiter = ',',
        value_parser = parse_user_key,
        global = true,
        hide_env_values = true
    )]
    pub catalog_user_keys: Vec<(String, String)>,

    /// Timeout in seconds for a single request to a remote catalog
    #[arg(long, env = "POMONA_HTTP_TIMEOUT", default_value = "30", global = true)]
    pub http_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Harvest configured sources into the local catalog
    #[command(after_help = "Examples:
  pomona harvest                          # Harvest all enabled sources
  pomona harvest --source toscana         # Harvest one source by name
  pomona harvest --config ~/custom.toml   # Use a custom sources file")]
    Harvest {
        /// Harvest a specific source by name from the sources file
        #[arg(short, long, value_name = "NAME")]
        source: Option<String>,

        /// Custom path to sources.toml
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Records fetched and imported concurrently
        #[arg(long, default_value = "10")]
        concurrency: usize,
    },
    /// Validate a source configuration against the local catalog
    Validate {
        /// Source name from the sources file
        #[arg(short, long, value_name = "NAME")]
        source: String,

        /// Custom path to sources.toml
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Process queued jobs until interrupted
    Worker {
        /// Worker identifier; a random one is generated if omitted
        #[arg(long)]
        worker_id: Option<String>,

        /// Seconds to wait between polls of an empty queue
        #[arg(long, default_value = "5")]
        poll_interval: u64,

        /// Records fetched and imported concurrently
        #[arg(long, default_value = "10")]
        concurrency: usize,
    },
    /// List sync jobs, newest first
    Jobs {
        /// Only jobs with this status (new, running, finished, errored, cancelled)
        #[arg(long)]
        status: Option<JobStatus>,

        /// Maximum number of jobs to list
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// List the sources in the sources file
    Sources {
        /// Custom path to sources.toml
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}
