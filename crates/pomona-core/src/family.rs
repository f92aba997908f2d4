//! Source families and their remote API dialects.
//!
//! Each [`SourceFamily`] is a fixed combination of small adapters:
//!
//! - [`ResponseShape`]: where a search response keeps its item list
//! - [`Envelope`]: where a show response keeps its payload
//! - [`GroupRefStyle`]: how group references are written back into a payload
//! - [`NonStringExtras`]: what happens to extras whose value is not a string
//!
//! [`RemoteApi`] builds the endpoint URLs for one source.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::AppError;
use crate::text::munge_name;

/// Default REST API version for sources that do not configure one.
pub const DEFAULT_API_VERSION: u32 = 2;

// =============================================================================
// Adapters
// =============================================================================

/// Location of the item list inside a search response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `{"result": {"count": N, "results": [...]}}`
    ResultResults,
    /// `{"count": N, "more": [...]}`
    More,
}

impl ResponseShape {
    /// Extracts the item list from a decoded search response.
    pub fn items(self, response: &Value) -> Result<Vec<Value>, String> {
        match self {
            ResponseShape::ResultResults => response
                .get("result")
                .and_then(|r| r.get("results"))
                .and_then(Value::as_array)
                .cloned()
                .ok_or_else(|| "response has no result.results list".to_string()),
            ResponseShape::More => {
                let object = response
                    .as_object()
                    .ok_or_else(|| "response is not a JSON object".to_string())?;
                match object.get("more") {
                    None | Some(Value::Null) => Ok(Vec::new()),
                    Some(Value::Array(items)) => Ok(items.clone()),
                    Some(_) => Err("response field 'more' is not a list".to_string()),
                }
            }
        }
    }
}

/// Location of the payload inside a show response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// The response body is the payload.
    Direct,
    /// `{"success": true, "result": {...}}`
    Result,
}

impl Envelope {
    /// Unwraps the payload object from a decoded show response.
    pub fn payload(self, response: Value) -> Result<Value, String> {
        let payload = match self {
            Envelope::Direct => response,
            Envelope::Result => {
                let Value::Object(mut object) = response else {
                    return Err("response is not a JSON object".to_string());
                };
                if object.get("success") == Some(&Value::Bool(false)) {
                    return Err("remote API reported success: false".to_string());
                }
                object
                    .remove("result")
                    .ok_or_else(|| "response has no result".to_string())?
            }
        };

        if payload.is_object() {
            Ok(payload)
        } else {
            Err("payload is not a JSON object".to_string())
        }
    }
}

/// How resolved group references are written into the outgoing payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRefStyle {
    /// Bare group names.
    Name,
    /// Bare group ids.
    Id,
    /// `{"id": ..., "name": ...}` objects.
    Object,
}

/// Treatment of extras whose value is not a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonStringExtras {
    /// Replace the value with its JSON encoding.
    Encode,
    /// Pass the value through unchanged.
    Keep,
    /// Remove the extra.
    Drop,
}

// =============================================================================
// Source Family
// =============================================================================

/// The closed set of remote catalog dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFamily {
    /// Stock CKAN action API (`/api/3/action/...`).
    #[default]
    Ckan,
    /// CKAN with item and group access through the versioned REST API.
    Spod,
    /// Metadata repository exposing `package_list` with a `more` result list.
    Metarepo,
}

impl SourceFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFamily::Ckan => "ckan",
            SourceFamily::Spod => "spod",
            SourceFamily::Metarepo => "metarepo",
        }
    }

    pub fn response_shape(&self) -> ResponseShape {
        match self {
            SourceFamily::Ckan | SourceFamily::Spod => ResponseShape::ResultResults,
            SourceFamily::Metarepo => ResponseShape::More,
        }
    }

    pub fn item_envelope(&self) -> Envelope {
        match self {
            SourceFamily::Spod => Envelope::Direct,
            SourceFamily::Ckan | SourceFamily::Metarepo => Envelope::Result,
        }
    }

    pub fn group_envelope(&self) -> Envelope {
        self.item_envelope()
    }

    pub fn organization_envelope(&self) -> Envelope {
        Envelope::Result
    }

    pub fn group_ref_style(&self, api_version: u32) -> GroupRefStyle {
        match self {
            SourceFamily::Spod if api_version == 1 => GroupRefStyle::Name,
            SourceFamily::Spod => GroupRefStyle::Id,
            SourceFamily::Ckan | SourceFamily::Metarepo => GroupRefStyle::Object,
        }
    }

    pub fn default_non_string_extras(&self) -> NonStringExtras {
        match self {
            SourceFamily::Spod => NonStringExtras::Encode,
            SourceFamily::Ckan | SourceFamily::Metarepo => NonStringExtras::Keep,
        }
    }
}

impl fmt::Display for SourceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFamily {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ckan" => Ok(Self::Ckan),
            "spod" => Ok(Self::Spod),
            "metarepo" => Ok(Self::Metarepo),
            _ => Err(AppError::ConfigError(format!(
                "Unknown source family: '{}'. Valid options: ckan, spod, metarepo",
                s
            ))),
        }
    }
}

// =============================================================================
// Remote API endpoints
// =============================================================================

/// Endpoint builder for one remote source.
#[derive(Debug, Clone)]
pub struct RemoteApi {
    family: SourceFamily,
    base: String,
    api_version: u32,
}

impl RemoteApi {
    /// Creates an endpoint builder for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidSourceUrl` unless `base_url` is an absolute
    /// http(s) URL.
    pub fn new(family: SourceFamily, base_url: &str, api_version: u32) -> Result<Self, AppError> {
        let parsed =
            Url::parse(base_url).map_err(|_| AppError::InvalidSourceUrl(base_url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::InvalidSourceUrl(base_url.to_string()));
        }

        Ok(Self {
            family,
            base: base_url.trim_end_matches('/').to_string(),
            api_version,
        })
    }

    pub fn family(&self) -> SourceFamily {
        self.family
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        let raw = format!("{}{}", self.base, path);
        Url::parse(&raw).map_err(|e| AppError::InvalidUrl(format!("{}: {}", raw, e)))
    }

    fn with_segment(&self, path: &str, segment: &str) -> Result<Url, AppError> {
        let mut url = self.endpoint(path)?;
        let url_str = url.to_string();
        url.path_segments_mut()
            .map_err(|_| AppError::InvalidUrl(url_str))?
            .push(segment);
        Ok(url)
    }

    fn with_id(&self, path: &str, id: &str) -> Result<Url, AppError> {
        let mut url = self.endpoint(path)?;
        url.query_pairs_mut().append_pair("id", id);
        Ok(url)
    }

    /// Search page URL: `rows`, `start`, `sort=id asc` and an optional `fq`
    /// joining `filters` with spaces.
    pub fn search_url(&self, start: usize, rows: usize, filters: &[String]) -> Result<Url, AppError> {
        let path = match self.family {
            SourceFamily::Ckan | SourceFamily::Spod => "/api/3/action/package_search",
            SourceFamily::Metarepo => "/api/package_list",
        };
        let mut url = self.endpoint(path)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("rows", &rows.to_string())
                .append_pair("start", &start.to_string())
                .append_pair("sort", "id asc");
            if !filters.is_empty() {
                query.append_pair("fq", &filters.join(" "));
            }
        }
        Ok(url)
    }

    /// Full item payload URL for `guid`.
    pub fn package_url(&self, guid: &str) -> Result<Url, AppError> {
        match self.family {
            SourceFamily::Ckan => self.with_id("/api/3/action/package_show", guid),
            SourceFamily::Spod => {
                self.with_segment(&format!("/api/{}/rest/package", self.api_version), guid)
            }
            SourceFamily::Metarepo => self.with_id("/api/package_show", guid),
        }
    }

    /// Group definition URL. REST dialects address groups by munged name.
    pub fn group_url(&self, reference: &str) -> Result<Url, AppError> {
        match self.family {
            SourceFamily::Ckan => self.with_id("/api/3/action/group_show", reference),
            SourceFamily::Spod => self.with_segment(
                &format!("/api/{}/rest/group", self.api_version),
                &munge_name(reference),
            ),
            SourceFamily::Metarepo => self.with_id("/api/group_show", reference),
        }
    }

    pub fn organization_url(&self, id: &str) -> Result<Url, AppError> {
        match self.family {
            SourceFamily::Ckan | SourceFamily::Spod => {
                self.with_id("/api/3/action/organization_show", id)
            }
            SourceFamily::Metarepo => self.with_id("/api/organization_show", id),
        }
    }
}
