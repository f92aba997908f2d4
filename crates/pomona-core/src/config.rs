//! Configuration types for Pomona components.
//!
//! Runtime knobs ([`HttpConfig`], [`SyncConfig`], [`DbConfig`]) are plain
//! structs with defaults. The list of harvest sources lives in `sources.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::AppError;
use crate::family::SourceFamily;
use crate::models::HarvestSource;

// =============================================================================
// Runtime configuration
// =============================================================================

/// Database connection pool configuration.
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

/// HTTP client configuration for remote catalogs.
///
/// Requests are never retried; `timeout` bounds every single attempt.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("pomona/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Record processing configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Number of records fetched and imported concurrently.
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { concurrency: 10 }
    }
}

impl SyncConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

// =============================================================================
// Sources file (sources.toml)
// =============================================================================

fn default_enabled() -> bool {
    true
}

/// Root structure of `sources.toml`.
///
/// # Example
///
/// ```toml
/// [[sources]]
/// id = "harvest-toscana"
/// name = "toscana"
/// url = "https://dati.toscana.it"
/// family = "ckan"
///
/// [sources.config]
/// remote_groups = "only_local"
/// default_extras = { harvested_from = "{harvest_source_title}" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

impl SourcesConfig {
    /// Sources with `enabled = true`.
    pub fn enabled_sources(&self) -> Vec<&SourceEntry> {
        self.sources.iter().filter(|s| s.enabled).collect()
    }

    /// Finds a source by name, ignoring case.
    pub fn find_by_name(&self, name: &str) -> Option<&SourceEntry> {
        self.sources
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// One harvest source in `sources.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Id of the harvest source object in the local catalog.
    pub id: String,

    /// Short name used for `--source <name>` lookup and logging.
    pub name: String,

    /// Base URL of the remote catalog.
    pub url: String,

    /// Title used for the `{harvest_source_title}` placeholder; defaults to `name`.
    pub title: Option<String>,

    #[serde(default)]
    pub family: SourceFamily,

    /// Whether the source takes part in batch harvests.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub description: Option<String>,

    /// The source configuration blob, written as a TOML table.
    pub config: Option<toml::Table>,
}

impl SourceEntry {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    /// The configuration table as the JSON blob the pipeline consumes.
    pub fn config_json(&self) -> Result<Option<String>, AppError> {
        self.config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(AppError::from)
    }

    pub fn to_source(&self) -> Result<HarvestSource, AppError> {
        let source = HarvestSource::new(&self.id, &self.url, self.title(), self.family);
        Ok(match self.config_json()? {
            Some(config) => source.with_config(config),
            None => source,
        })
    }
}

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "sources.toml";

/// `~/.config/pomona/` on Linux, the platform equivalent elsewhere.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("pomona"))
}

pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join(CONFIG_FILE_NAME))
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Pomona harvest sources
#
# Usage:
#   pomona harvest                   # Harvest all enabled sources
#   pomona harvest --source toscana  # Harvest one source by name
#   pomona validate --source toscana # Check a source configuration
#
# `id` is the harvest source object in the local catalog; harvested items
# default to that object's organization.
# `family` is one of: ckan, spod, metarepo.

[[sources]]
id = "harvest-toscana"
name = "toscana"
url = "https://dati.toscana.it"
title = "Open Data Toscana"
family = "ckan"
enabled = false
description = "Open data della Regione Toscana"

[sources.config]
remote_groups = "only_local"
remote_orgs = "ignore"
default_extras = { harvested_from = "{harvest_source_url}" }
"#;

/// Loads `sources.toml`.
///
/// # Returns
/// * `Ok(Some(config))` - configuration loaded
/// * `Ok(None)` - no default path on this platform, or the template could not be written
/// * `Err(e)` - a custom path does not exist, or the file is invalid
///
/// A missing file at the default path is replaced by a template.
pub fn load_sources_config(path: Option<PathBuf>) -> Result<Option<SourcesConfig>, AppError> {
    let using_default_path = path.is_none();
    let config_path = match path {
        Some(p) => p,
        None => match default_config_path() {
            Some(p) => p,
            None => return Ok(None),
        },
    };

    if !config_path.exists() {
        if !using_default_path {
            return Err(AppError::ConfigError(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }
        if let Err(e) = create_default_config(&config_path) {
            tracing::warn!("Could not create default config template: {}", e);
            return Ok(None);
        }
    }

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        AppError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    let config: SourcesConfig = toml::from_str(&content).map_err(|e| {
        AppError::ConfigError(format!(
            "Invalid TOML in '{}': {}",
            config_path.display(),
            e
        ))
    })?;

    Ok(Some(config))
}

fn create_default_config(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, DEFAULT_CONFIG_TEMPLATE)?;
    tracing::info!("Created default config template at: {}", path.display());

    Ok(())
}
