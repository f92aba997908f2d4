//! Per-source configuration and the reconciliation policy derived from it.
//!
//! A harvest source carries an opaque JSON configuration blob. It is parsed
//! into a [`SourceConfig`] at the start of every stage call and never cached
//! between calls, so concurrent stage invocations each work on their own
//! snapshot.
//!
//! # Recognised keys
//!
//! ```json
//! {
//!     "api_version": 2,
//!     "api_key": "opaque-token",
//!     "default_tags": [{"name": "open-data"}],
//!     "default_groups": ["environment"],
//!     "default_extras": {"harvested_from": "{harvest_source_url}"},
//!     "override_extras": false,
//!     "organizations_filter_include": ["regione-toscana"],
//!     "remote_groups": "only_local",
//!     "remote_orgs": "create",
//!     "force_all": false,
//!     "read_only": false,
//!     "user": "harvest",
//!     "non_string_extras": "encode"
//! }
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::family::{DEFAULT_API_VERSION, GroupRefStyle, NonStringExtras, SourceFamily};
use crate::models::{LocalGroup, Lookup, Tag, WriteContext};
use crate::traits::LocalCatalog;

// =============================================================================
// Source Configuration
// =============================================================================

/// How cross-references to remote groups or organizations are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteRefMode {
    /// Drop remote references.
    #[default]
    Ignore,
    /// Keep references that already exist locally.
    OnlyLocal,
    /// Keep local references and copy missing ones from the remote catalog.
    Create,
}

/// Parsed source configuration blob.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub api_version: Option<u32>,
    pub api_key: Option<String>,
    pub default_tags: Vec<Tag>,
    pub default_groups: Vec<String>,
    pub default_extras: Map<String, Value>,
    pub override_extras: bool,
    pub organizations_filter_include: Option<Vec<String>>,
    pub organizations_filter_exclude: Option<Vec<String>>,
    pub remote_groups: RemoteRefMode,
    pub remote_orgs: RemoteRefMode,
    pub force_all: bool,
    pub read_only: bool,
    pub user: Option<String>,
    pub non_string_extras: Option<NonStringExtras>,
}

fn config_error(message: impl Into<String>) -> AppError {
    AppError::ConfigError(message.into())
}

fn is_list_of(value: &Value, check: fn(&Value) -> bool) -> bool {
    value.as_array().is_some_and(|items| items.iter().all(check))
}

/// Checks value types key by key so errors name the offending key, and
/// normalizes `api_version` given as a numeric string.
fn check_structure(object: &mut Map<String, Value>) -> Result<(), AppError> {
    object.retain(|_, v| !v.is_null());

    if let Some(version) = object.get_mut("api_version") {
        let parsed = match version {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        let parsed = parsed
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| config_error("api_version must be an integer"))?;
        *version = Value::from(parsed);
    }

    if let Some(tags) = object.get("default_tags") {
        if !tags.is_array() {
            return Err(config_error("default_tags must be a list"));
        }
        if !is_list_of(tags, |t| t.get("name").is_some_and(Value::is_string)) {
            return Err(config_error(
                "default_tags must be a list of dictionaries with a name",
            ));
        }
    }

    if let Some(groups) = object.get("default_groups") {
        if !groups.is_array() {
            return Err(config_error(
                "default_groups must be a *list* of group names/ids",
            ));
        }
        if !is_list_of(groups, Value::is_string) {
            return Err(config_error(
                "default_groups must be a list of group names/ids (i.e. strings)",
            ));
        }
    }

    if object.get("default_extras").is_some_and(|v| !v.is_object()) {
        return Err(config_error("default_extras must be a dictionary"));
    }

    for key in [
        "organizations_filter_include",
        "organizations_filter_exclude",
    ] {
        if object.get(key).is_some_and(|v| !is_list_of(v, Value::is_string)) {
            return Err(config_error(format!(
                "{} must be a list of organization names",
                key
            )));
        }
    }

    if object.contains_key("organizations_filter_include")
        && object.contains_key("organizations_filter_exclude")
    {
        return Err(config_error(
            "Harvest configuration cannot contain both organizations_filter_include and organizations_filter_exclude",
        ));
    }

    for key in ["read_only", "force_all", "override_extras"] {
        if object.get(key).is_some_and(|v| !v.is_boolean()) {
            return Err(config_error(format!("{} must be boolean", key)));
        }
    }

    for key in ["user", "api_key"] {
        if object.get(key).is_some_and(|v| !v.is_string()) {
            return Err(config_error(format!("{} must be a string", key)));
        }
    }

    Ok(())
}

impl SourceConfig {
    /// Parses a source configuration blob. `None` or a blank string yields
    /// the default configuration.
    ///
    /// # Errors
    ///
    /// `AppError::ConfigError` naming the first offending key.
    pub fn parse(raw: Option<&str>) -> Result<Self, AppError> {
        let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
            return Ok(Self::default());
        };

        let value: Value = serde_json::from_str(raw)
            .map_err(|e| config_error(format!("Source configuration is not valid JSON: {}", e)))?;
        let Value::Object(mut object) = value else {
            return Err(config_error("Source configuration must be a JSON object"));
        };

        check_structure(&mut object)?;

        serde_json::from_value(Value::Object(object))
            .map_err(|e| config_error(format!("Invalid source configuration: {}", e)))
    }

    pub fn api_version(&self) -> u32 {
        self.api_version.unwrap_or(DEFAULT_API_VERSION)
    }

    pub fn org_filter(&self) -> OrgFilter {
        match (
            &self.organizations_filter_include,
            &self.organizations_filter_exclude,
        ) {
            (Some(include), _) if !include.is_empty() => OrgFilter::Include(include.clone()),
            (_, Some(exclude)) if !exclude.is_empty() => OrgFilter::Exclude(exclude.clone()),
            _ => OrgFilter::None,
        }
    }

    pub fn non_string_extras(&self, family: SourceFamily) -> NonStringExtras {
        self.non_string_extras
            .unwrap_or_else(|| family.default_non_string_extras())
    }
}

/// Validates a configuration blob against the local catalog.
///
/// On top of the structural checks done by [`SourceConfig::parse`], every
/// default group and the attribution user must exist locally.
pub async fn validate_config<C: LocalCatalog>(
    raw: Option<&str>,
    catalog: &C,
) -> Result<SourceConfig, AppError> {
    let config = SourceConfig::parse(raw)?;

    for group in &config.default_groups {
        if !catalog.show_group(group).await?.is_found() {
            return Err(config_error(format!("Default group not found: {}", group)));
        }
    }

    if let Some(user) = &config.user
        && !catalog.show_user(user).await?.is_found()
    {
        return Err(config_error(format!("User not found: {}", user)));
    }

    Ok(config)
}

// =============================================================================
// Organization Filter
// =============================================================================

/// Restriction of a search to (or away from) specific remote organizations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OrgFilter {
    #[default]
    None,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl OrgFilter {
    /// Search filter clauses for this filter.
    ///
    /// An include list becomes one disjunction; an exclude list becomes one
    /// negated clause per organization.
    pub fn clauses(&self) -> Vec<String> {
        match self {
            OrgFilter::None => Vec::new(),
            OrgFilter::Include(orgs) => vec![
                orgs.iter()
                    .map(|o| format!("organization:{}", o))
                    .collect::<Vec<_>>()
                    .join(" OR "),
            ],
            OrgFilter::Exclude(orgs) => orgs
                .iter()
                .map(|o| format!("-organization:{}", o))
                .collect(),
        }
    }
}

// =============================================================================
// Reconciliation Policy
// =============================================================================

/// Everything the pipeline needs from a source configuration, with default
/// groups resolved against the local catalog.
///
/// Built once per stage call and immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationPolicy {
    pub org_filter: OrgFilter,
    pub force_all: bool,
    pub remote_groups: RemoteRefMode,
    pub remote_orgs: RemoteRefMode,
    pub default_tags: Vec<Tag>,
    pub default_groups: Vec<LocalGroup>,
    pub default_extras: Map<String, Value>,
    pub override_extras: bool,
    pub non_string_extras: NonStringExtras,
    pub group_ref_style: GroupRefStyle,
    pub credential: Option<String>,
    pub write_context: WriteContext,
}

impl ReconciliationPolicy {
    /// Derives a policy from an already parsed configuration and resolved
    /// default groups.
    pub fn from_config(
        config: &SourceConfig,
        family: SourceFamily,
        default_groups: Vec<LocalGroup>,
    ) -> Self {
        Self {
            org_filter: config.org_filter(),
            force_all: config.force_all,
            remote_groups: config.remote_groups,
            remote_orgs: config.remote_orgs,
            default_tags: config.default_tags.clone(),
            default_groups,
            default_extras: config.default_extras.clone(),
            override_extras: config.override_extras,
            non_string_extras: config.non_string_extras(family),
            group_ref_style: family.group_ref_style(config.api_version()),
            credential: config.api_key.clone(),
            write_context: WriteContext {
                user: config.user.clone(),
            },
        }
    }

    /// Derives a policy, resolving configured default groups locally.
    ///
    /// # Errors
    ///
    /// `AppError::ConfigError` if a default group does not exist locally.
    pub async fn load<C: LocalCatalog>(
        config: &SourceConfig,
        family: SourceFamily,
        catalog: &C,
    ) -> Result<Self, AppError> {
        let mut default_groups = Vec::with_capacity(config.default_groups.len());
        for reference in &config.default_groups {
            match catalog.show_group(reference).await? {
                Lookup::Found(group) => default_groups.push(group),
                Lookup::NotFound => {
                    return Err(config_error(format!(
                        "Default group not found: {}",
                        reference
                    )));
                }
            }
        }

        Ok(Self::from_config(config, family, default_groups))
    }
}
