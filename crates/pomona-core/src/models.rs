//! Domain models shared by the pipeline stages.
//!
//! [`RemotePackage`] is the decoded view of one remote catalog item. Only the
//! fields the reconciler rewrites are typed; everything else is carried
//! through untouched in `other` so the local write sees the full payload.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::family::{NonStringExtras, SourceFamily};

/// Deserializes `null` as the type's default (remote catalogs send `"tags": null`).
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

// =============================================================================
// Harvest Source
// =============================================================================

/// One configured remote catalog.
///
/// `id` is the identifier of the harvest source object in the local catalog;
/// its owning organization is the default owner of everything harvested from
/// this source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestSource {
    pub id: String,
    pub url: String,
    pub title: String,
    pub family: SourceFamily,
    /// Opaque JSON configuration blob, parsed by [`crate::SourceConfig::parse`].
    pub config: Option<String>,
}

impl HarvestSource {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
        family: SourceFamily,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: title.into(),
            family,
            config: None,
        }
    }

    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = Some(config.into());
        self
    }
}

// =============================================================================
// Remote payloads
// =============================================================================

/// Summary of one item as returned by a remote search page.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageSummary {
    pub id: String,
    pub name: Option<String>,
    /// The item exactly as the search endpoint returned it.
    pub raw: Value,
}

impl PackageSummary {
    /// Builds a summary from one search result, or `None` if it carries no string id.
    pub fn from_value(raw: Value) -> Option<Self> {
        let id = raw.get("id")?.as_str()?.to_string();
        let name = raw.get("name").and_then(Value::as_str).map(str::to_string);
        Some(Self { id, name, raw })
    }
}

/// A remote catalog item, decoded for reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePackage {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Item type; `harvest` marks a harvest source configuration object.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub package_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_modified: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_org: Option<String>,

    #[serde(default, deserialize_with = "nullable")]
    pub tags: Vec<Tag>,

    #[serde(default, deserialize_with = "nullable")]
    pub groups: Vec<GroupRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<Extras>,

    #[serde(default, deserialize_with = "nullable")]
    pub resources: Vec<Map<String, Value>>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl RemotePackage {
    /// Returns true for harvest source configuration objects.
    pub fn is_harvest_source(&self) -> bool {
        self.package_type.as_deref() == Some("harvest")
    }
}

/// A tag on a remote item.
///
/// Older REST dialects send tags as bare strings; both forms decode to this
/// struct and serialize as `{"name": ...}` objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TagRepr")]
pub struct Tag {
    pub name: String,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            other: Map::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TagRepr {
    Name(String),
    Object {
        name: String,
        #[serde(flatten)]
        other: Map<String, Value>,
    },
}

impl From<TagRepr> for Tag {
    fn from(repr: TagRepr) -> Self {
        match repr {
            TagRepr::Name(name) => Tag::new(name),
            TagRepr::Object { name, other } => Tag { name, other },
        }
    }
}

/// A group reference as it appears in a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupRef {
    /// A bare group name or id.
    Name(String),
    /// A group object carrying at least an id or a name.
    Object(GroupObject),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl GroupRef {
    /// The identifier used to look this group up, preferring the id.
    pub fn key(&self) -> Option<&str> {
        match self {
            GroupRef::Name(name) => Some(name.as_str()),
            GroupRef::Object(obj) => obj.id.as_deref().or(obj.name.as_deref()),
        }
    }

    pub fn object(id: impl Into<String>, name: impl Into<String>) -> Self {
        GroupRef::Object(GroupObject {
            id: Some(id.into()),
            name: Some(name.into()),
            other: Map::new(),
        })
    }
}

// =============================================================================
// Extras
// =============================================================================

/// Free-form key/value metadata in either of the two shapes catalogs use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Extras {
    /// `[{"key": "k", "value": "v"}, ...]`
    List(Vec<ExtraEntry>),
    /// `{"k": "v", ...}`
    Map(Map<String, Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraEntry {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Extras {
    /// An empty extras container in the shape `family` uses natively.
    pub fn empty_for(family: SourceFamily) -> Self {
        match family {
            SourceFamily::Spod => Extras::Map(Map::new()),
            SourceFamily::Ckan | SourceFamily::Metarepo => Extras::List(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Extras::List(list) => list.len(),
            Extras::Map(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Extras::List(list) => list.iter().find(|e| e.key == key).map(|e| &e.value),
            Extras::Map(map) => map.get(key),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets `key` to `value`. In list form any existing entry is removed and
    /// the new one appended.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self {
            Extras::List(list) => {
                list.retain(|e| e.key != key);
                list.push(ExtraEntry {
                    key,
                    value,
                    other: Map::new(),
                });
            }
            Extras::Map(map) => {
                map.insert(key, value);
            }
        }
    }

    /// Applies the family's treatment of non-string extra values.
    pub fn apply_non_string_policy(&mut self, policy: NonStringExtras) {
        fn convert(value: &mut Value, policy: NonStringExtras) -> bool {
            if value.is_string() {
                return true;
            }
            match policy {
                NonStringExtras::Keep => true,
                NonStringExtras::Drop => false,
                NonStringExtras::Encode => {
                    *value = Value::String(value.to_string());
                    true
                }
            }
        }

        match self {
            Extras::List(list) => list.retain_mut(|e| convert(&mut e.value, policy)),
            Extras::Map(map) => map.retain(|_, v| convert(v, policy)),
        }
    }
}

// =============================================================================
// Local catalog entities
// =============================================================================

/// Outcome of a local catalog lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Lookup::Found(v),
            None => Lookup::NotFound,
        }
    }
}

/// An item as stored in the local catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalPackage {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub owner_org: Option<String>,
    #[serde(default)]
    pub metadata_modified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalGroup {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalOrganization {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    pub id: String,
    pub name: String,
}

/// Attribution for writes made on behalf of a harvest source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteContext {
    /// Local user the write is attributed to, if the source configures one.
    pub user: Option<String>,
}
