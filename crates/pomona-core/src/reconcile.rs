//! Package reconciliation.
//!
//! Rewrites a fetched remote item so it can be written into the local catalog:
//! tags are normalized, group and organization references are resolved (and
//! optionally copied from the remote catalog), configured defaults are merged
//! in and remote-only resource fields are removed. Problems with a single
//! cross-reference are reported as diagnostics and only drop that reference.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::AppError;
use crate::family::{Envelope, GroupRefStyle, RemoteApi};
use crate::job::SyncJob;
use crate::models::{Extras, GroupRef, LocalGroup, Lookup, RemotePackage, Tag};
use crate::policy::{ReconciliationPolicy, RemoteRefMode};
use crate::record::SyncRecord;
use crate::sync::SyncOutcome;
use crate::text::normalize_tag;
use crate::traits::{ContentFetcher, LocalCatalog};

/// Fields of a remote group that make no sense in a local copy.
const REMOTE_GROUP_FIELDS: &[&str] = &[
    "packages",
    "created",
    "users",
    "groups",
    "tags",
    "extras",
    "display_name",
];

/// Resource fields tied to the remote catalog's storage and revision history.
const REMOTE_RESOURCE_FIELDS: &[&str] = &["url_type", "revision_id"];

// =============================================================================
// Placeholders
// =============================================================================

/// Values substituted into string default extras.
///
/// Supported placeholders: `{harvest_source_id}`, `{harvest_source_url}`,
/// `{harvest_source_title}`, `{harvest_job_id}`, `{harvest_object_id}` and
/// `{dataset_id}`. Unknown placeholders are left as they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    pub source_id: String,
    pub source_url: String,
    pub source_title: String,
    pub job_id: String,
    pub record_id: String,
}

impl Placeholders {
    pub fn for_record(job: &SyncJob, record: &SyncRecord) -> Self {
        Self {
            source_id: job.source.id.clone(),
            source_url: job.source.url.trim_matches('/').to_string(),
            source_title: job.source.title.clone(),
            job_id: job.id.to_string(),
            record_id: record.id.to_string(),
        }
    }

    pub fn substitute(&self, template: &str, dataset_id: &str) -> String {
        [
            ("{harvest_source_id}", self.source_id.as_str()),
            ("{harvest_source_url}", self.source_url.as_str()),
            ("{harvest_source_title}", self.source_title.as_str()),
            ("{harvest_job_id}", self.job_id.as_str()),
            ("{harvest_object_id}", self.record_id.as_str()),
            ("{dataset_id}", dataset_id),
        ]
        .iter()
        .fold(template.to_string(), |acc, (token, value)| {
            acc.replace(token, value)
        })
    }
}

// =============================================================================
// Payload transformations
// =============================================================================

/// Appends default tags missing by name, normalizes every name and drops
/// tags that normalize to nothing or duplicate an earlier tag.
pub fn merge_tags(tags: &mut Vec<Tag>, defaults: &[Tag]) {
    for default in defaults {
        if !tags.iter().any(|t| t.name == default.name) {
            tags.push(default.clone());
        }
    }

    let mut seen = HashSet::new();
    let merged: Vec<Tag> = tags
        .drain(..)
        .filter_map(|mut tag| {
            tag.name = normalize_tag(&tag.name);
            (!tag.name.is_empty() && seen.insert(tag.name.clone())).then_some(tag)
        })
        .collect();
    *tags = merged;
}

/// Merges configured default extras into `extras`.
///
/// An existing key wins unless `override_extras` is set. String values go
/// through placeholder substitution.
pub fn merge_default_extras(
    extras: &mut Extras,
    defaults: &Map<String, Value>,
    override_extras: bool,
    placeholders: &Placeholders,
    dataset_id: &str,
) {
    for (key, value) in defaults {
        if extras.contains_key(key) && !override_extras {
            continue;
        }
        let value = match value {
            Value::String(template) => Value::String(placeholders.substitute(template, dataset_id)),
            other => other.clone(),
        };
        extras.insert(key.clone(), value);
    }
}

/// Removes remote-only linkage fields from every resource.
pub fn sanitize_resources(resources: &mut [Map<String, Value>]) {
    for resource in resources {
        for field in REMOTE_RESOURCE_FIELDS {
            resource.remove(*field);
        }
    }
}

fn group_ref(group: &LocalGroup, style: GroupRefStyle) -> GroupRef {
    match style {
        GroupRefStyle::Name => GroupRef::Name(group.name.clone()),
        GroupRefStyle::Id => GroupRef::Name(group.id.clone()),
        GroupRefStyle::Object => GroupRef::object(group.id.clone(), group.name.clone()),
    }
}

/// Name a copied group or organization is created under.
fn local_name<'m>(object: &'m Map<String, Value>, key: &'m str) -> &'m str {
    object.get("name").and_then(Value::as_str).unwrap_or(key)
}

fn references_group(refs: &[GroupRef], group: &LocalGroup) -> bool {
    refs.iter().any(|r| match r {
        GroupRef::Name(key) => key == &group.id || key == &group.name,
        GroupRef::Object(obj) => {
            obj.id.as_deref() == Some(group.id.as_str())
                || obj.name.as_deref() == Some(group.name.as_str())
        }
    })
}

// =============================================================================
// Reconciler
// =============================================================================

/// Result of reconciling one item.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// The item is itself a harvest source; nothing is written.
    HarvestSourceSkipped,
    /// The rewritten item, plus diagnostics for references that were dropped.
    Package {
        package: Box<RemotePackage>,
        diagnostics: Vec<String>,
    },
}

/// Reconciles items of one job against the local catalog.
pub struct Reconciler<'a, C: LocalCatalog, F: ContentFetcher> {
    catalog: &'a C,
    fetcher: &'a F,
    api: &'a RemoteApi,
    policy: &'a ReconciliationPolicy,
    source_id: &'a str,
}

impl<'a, C: LocalCatalog, F: ContentFetcher> Reconciler<'a, C, F> {
    pub fn new(
        catalog: &'a C,
        fetcher: &'a F,
        api: &'a RemoteApi,
        policy: &'a ReconciliationPolicy,
        source_id: &'a str,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            api,
            policy,
            source_id,
        }
    }

    /// Rewrites `package` for the local catalog.
    ///
    /// # Errors
    ///
    /// Fails only when the local catalog itself fails; unresolvable group or
    /// organization references end up in the diagnostics instead.
    pub async fn reconcile(
        &self,
        mut package: RemotePackage,
        placeholders: &Placeholders,
    ) -> Result<Reconciled, AppError> {
        if package.is_harvest_source() {
            tracing::warn!(id = package.id, "Remote item is a harvest source, ignoring");
            return Ok(Reconciled::HarvestSourceSkipped);
        }

        let mut diagnostics = Vec::new();

        merge_tags(&mut package.tags, &self.policy.default_tags);
        self.reconcile_groups(&mut package, &mut diagnostics).await?;
        self.reconcile_organization(&mut package, &mut diagnostics)
            .await?;

        for group in &self.policy.default_groups {
            if !references_group(&package.groups, group) {
                package
                    .groups
                    .push(group_ref(group, self.policy.group_ref_style));
            }
        }

        if let Some(extras) = package.extras.as_mut() {
            extras.apply_non_string_policy(self.policy.non_string_extras);
        }
        if !self.policy.default_extras.is_empty() {
            let dataset_id = package.id.clone();
            let extras = package
                .extras
                .get_or_insert_with(|| Extras::empty_for(self.api.family()));
            merge_default_extras(
                extras,
                &self.policy.default_extras,
                self.policy.override_extras,
                placeholders,
                &dataset_id,
            );
        }

        sanitize_resources(&mut package.resources);

        Ok(Reconciled::Package {
            package: Box::new(package),
            diagnostics,
        })
    }

    /// Creates or updates the item locally.
    ///
    /// An existing item with the same `metadata_modified` is left alone and
    /// reported as [`SyncOutcome::NotModified`].
    pub async fn write_package(&self, package: &RemotePackage) -> Result<SyncOutcome, AppError> {
        let ctx = &self.policy.write_context;
        match self.catalog.show_package(&package.id).await? {
            Lookup::Found(existing)
                if existing.metadata_modified.is_some()
                    && existing.metadata_modified == package.metadata_modified =>
            {
                tracing::info!(id = package.id, "Item not modified since last import");
                Ok(SyncOutcome::NotModified)
            }
            Lookup::Found(_) => {
                self.catalog.update_package(ctx, package).await?;
                tracing::info!(id = package.id, "Updated item");
                Ok(SyncOutcome::Updated)
            }
            Lookup::NotFound => {
                self.catalog.create_package(ctx, package).await?;
                tracing::info!(id = package.id, "Created item");
                Ok(SyncOutcome::Created)
            }
        }
    }

    async fn reconcile_groups(
        &self,
        package: &mut RemotePackage,
        diagnostics: &mut Vec<String>,
    ) -> Result<(), AppError> {
        let mode = self.policy.remote_groups;
        if mode == RemoteRefMode::Ignore {
            package.groups.clear();
            return Ok(());
        }

        let mut validated = Vec::with_capacity(package.groups.len());
        for reference in std::mem::take(&mut package.groups) {
            let Some(key) = reference.key().map(str::to_string) else {
                diagnostics.push("Group reference without id or name dropped".to_string());
                continue;
            };

            let group = match self.catalog.show_group(&key).await? {
                Lookup::Found(group) => group,
                Lookup::NotFound if mode == RemoteRefMode::Create => {
                    match self.copy_remote_group(&key).await {
                        Ok(group) => group,
                        Err(e) => {
                            tracing::warn!(group = key, error = %e, "Could not copy remote group");
                            diagnostics.push(format!("Could not get remote group {}: {}", key, e));
                            continue;
                        }
                    }
                }
                Lookup::NotFound => {
                    tracing::info!(group = key, "Group is not available locally");
                    diagnostics.push(format!("Group {} is not available locally", key));
                    continue;
                }
            };

            validated.push(group_ref(&group, self.policy.group_ref_style));
        }

        package.groups = validated;
        Ok(())
    }

    async fn copy_remote_group(&self, key: &str) -> Result<LocalGroup, AppError> {
        let url = self.api.group_url(key)?;
        let mut group = self
            .fetch_remote_object(&url, self.api.family().group_envelope(), "group", key)
            .await?;
        for field in REMOTE_GROUP_FIELDS {
            group.remove(*field);
        }

        match self
            .catalog
            .create_group(&self.policy.write_context, &group)
            .await
        {
            Ok(created) => {
                tracing::info!(group = key, id = created.id, "Group has been newly created");
                Ok(created)
            }
            // Records are imported concurrently; another one may have
            // created the same group since our lookup.
            Err(e) => match self.catalog.show_group(local_name(&group, key)).await? {
                Lookup::Found(existing) => {
                    tracing::debug!(group = key, id = existing.id, "Group was created concurrently");
                    Ok(existing)
                }
                Lookup::NotFound => Err(e),
            },
        }
    }

    async fn reconcile_organization(
        &self,
        package: &mut RemotePackage,
        diagnostics: &mut Vec<String>,
    ) -> Result<(), AppError> {
        let mode = self.policy.remote_orgs;
        if mode == RemoteRefMode::Ignore {
            package.owner_org = self.source_organization().await?;
            return Ok(());
        }

        let mut validated = None;
        if let Some(remote_org) = package.owner_org.clone().filter(|o| !o.is_empty()) {
            match self.catalog.show_organization(&remote_org).await? {
                Lookup::Found(org) => validated = Some(org.id),
                Lookup::NotFound if mode == RemoteRefMode::Create => {
                    match self.copy_remote_organization(&remote_org).await {
                        Ok(id) => validated = Some(id),
                        Err(e) => {
                            tracing::warn!(organization = remote_org, error = %e, "Could not copy remote organization");
                            diagnostics
                                .push(format!("Could not get remote org {}: {}", remote_org, e));
                        }
                    }
                }
                Lookup::NotFound => {
                    tracing::info!(organization = remote_org, "Organization is not available locally");
                    diagnostics.push(format!(
                        "Organization {} is not available locally",
                        remote_org
                    ));
                }
            }
        }

        package.owner_org = match validated {
            Some(id) => Some(id),
            None => self.source_organization().await?,
        };
        Ok(())
    }

    /// Fetches the remote organization, falling back to the group endpoint
    /// for catalogs that expose organizations only as groups.
    async fn copy_remote_organization(&self, key: &str) -> Result<String, AppError> {
        let family = self.api.family();
        let org_url = self.api.organization_url(key)?;
        let mut org = match self
            .fetch_remote_object(&org_url, family.organization_envelope(), "organization", key)
            .await
        {
            Ok(org) => org,
            Err(AppError::RemoteResourceError(e)) => {
                tracing::debug!(organization = key, error = e, "Retrying organization as a group");
                let group_url = self.api.group_url(key)?;
                self.fetch_remote_object(&group_url, family.group_envelope(), "organization", key)
                    .await?
            }
            Err(e) => return Err(e),
        };

        for field in REMOTE_GROUP_FIELDS.iter().chain(&["type"]) {
            org.remove(*field);
        }

        match self
            .catalog
            .create_organization(&self.policy.write_context, &org)
            .await
        {
            Ok(created) => {
                tracing::info!(organization = key, id = created.id, "Organization has been newly created");
                Ok(created.id)
            }
            Err(e) => match self.catalog.show_organization(local_name(&org, key)).await? {
                Lookup::Found(existing) => {
                    tracing::debug!(organization = key, id = existing.id, "Organization was created concurrently");
                    Ok(existing.id)
                }
                Lookup::NotFound => Err(e),
            },
        }
    }

    async fn fetch_remote_object(
        &self,
        url: &url::Url,
        envelope: Envelope,
        kind: &str,
        key: &str,
    ) -> Result<Map<String, Value>, AppError> {
        let remote_error =
            |detail: String| AppError::RemoteResourceError(format!("{} {}: {}", kind, key, detail));

        let content = self
            .fetcher
            .fetch(url, self.policy.credential.as_deref())
            .await
            .map_err(|e| remote_error(e.to_string()))?;
        let response: Value =
            serde_json::from_slice(&content).map_err(|e| remote_error(e.to_string()))?;

        match envelope.payload(response).map_err(remote_error)? {
            Value::Object(map) => Ok(map),
            _ => Err(remote_error("payload is not an object".to_string())),
        }
    }

    /// Owning organization of the local harvest source object.
    async fn source_organization(&self) -> Result<Option<String>, AppError> {
        match self.catalog.show_package(self.source_id).await? {
            Lookup::Found(source) => Ok(source.owner_org),
            Lookup::NotFound => Err(AppError::CatalogError(format!(
                "Harvest source {} not found in the local catalog",
                self.source_id
            ))),
        }
    }
}
