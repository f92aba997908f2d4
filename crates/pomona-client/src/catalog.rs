//! Local catalog client speaking the CKAN action API.
//!
//! CKAN API reference: <https://docs.ckan.org/en/2.9/api/>
//!
//! Every action answers with the same envelope:
//!
//! ```json
//! {"success": true, "result": {...}}
//! {"success": false, "error": {"__type": "Validation Error", "name": ["..."]}}
//! ```
//!
//! Show actions map "Not Found Error" to [`Lookup::NotFound`]; write actions
//! map "Validation Error" to [`AppError::ValidationError`] with the field
//! messages. Everything else is an [`AppError::CatalogError`].
//!
//! CKAN attributes a write to the owner of the API key it was sent with.
//! Writes for a [`WriteContext`] naming a user therefore go out with that
//! user's key, registered through [`CkanCatalog::with_user_key`]; all other
//! requests use the service key.

use std::collections::HashMap;

use pomona_core::HttpConfig;
use pomona_core::error::{AppError, ValidationErrors};
use pomona_core::models::{
    LocalGroup, LocalOrganization, LocalPackage, LocalUser, Lookup, RemotePackage, WriteContext,
};
use pomona_core::traits::LocalCatalog;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use url::Url;

const NOT_FOUND_ERROR: &str = "Not Found Error";
const VALIDATION_ERROR: &str = "Validation Error";

/// CKAN action API response envelope.
#[derive(Deserialize, Debug)]
struct ActionResponse {
    success: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Map<String, Value>>,
}

/// How a failed action was classified.
#[derive(Debug)]
enum ActionFailure {
    NotFound,
    Invalid(ValidationErrors),
    Other(String),
}

/// The local CKAN instance items are written into.
///
/// # Examples
///
/// ```no_run
/// use pomona_client::CkanCatalog;
/// use pomona_core::{HttpConfig, LocalCatalog};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = CkanCatalog::new(
///     "http://localhost:5000",
///     Some("sysadmin-api-key".to_string()),
///     &HttpConfig::default(),
/// )?
/// .with_user_key("harvest", "harvest-user-api-key");
/// let group = catalog.show_group("environment").await?;
/// println!("found: {}", group.is_found());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CkanCatalog {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    /// API keys by local user name, for attributed writes.
    user_keys: HashMap<String, String>,
}

impl CkanCatalog {
    /// Creates a client for the catalog at `base_url`.
    ///
    /// Reads and unattributed writes authenticate with `api_key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if the URL is malformed and
    /// `AppError::CatalogError` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        config: &HttpConfig,
    ) -> Result<Self, AppError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| AppError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::CatalogError(format!("Could not build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            user_keys: HashMap::new(),
        })
    }

    /// Registers the API key writes attributed to `user` are sent with.
    pub fn with_user_key(mut self, user: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.user_keys.insert(user.into(), api_key.into());
        self
    }

    /// True if writes can be attributed to `user`.
    pub fn can_write_as(&self, user: &str) -> bool {
        self.user_keys.contains_key(user)
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn action_url(&self, action: &str) -> Result<Url, AppError> {
        self.base_url
            .join(&format!("api/3/action/{}", action))
            .map_err(|e| AppError::InvalidUrl(format!("{}: {}", action, e)))
    }

    /// Key a write in `ctx` is sent with.
    fn write_key(&self, ctx: &WriteContext) -> Result<Option<&str>, AppError> {
        match ctx.user.as_deref() {
            None => Ok(self.api_key.as_deref()),
            Some(user) => self
                .user_keys
                .get(user)
                .map(|key| Some(key.as_str()))
                .ok_or_else(|| {
                    AppError::CatalogError(format!(
                        "No API key configured for user {}; cannot write on its behalf",
                        user
                    ))
                }),
        }
    }

    /// Sends an action request and unwraps the envelope.
    async fn call(
        &self,
        action: &str,
        request: RequestBuilder,
        api_key: Option<&str>,
    ) -> Result<Result<Value, ActionFailure>, AppError> {
        let request = match api_key {
            Some(key) => request.header(AUTHORIZATION, key),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|e| AppError::CatalogError(format!("{} request failed: {}", action, e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::CatalogError(format!("{} response unreadable: {}", action, e)))?;

        let envelope: ActionResponse = match serde_json::from_slice(&body) {
            Ok(envelope) => envelope,
            Err(_) if status == StatusCode::NOT_FOUND => return Ok(Err(ActionFailure::NotFound)),
            Err(e) => {
                return Err(AppError::CatalogError(format!(
                    "{} returned HTTP {} with an unexpected body: {}",
                    action,
                    status.as_u16(),
                    e
                )));
            }
        };

        if envelope.success && status.is_success() {
            return envelope.result.map(Ok).ok_or_else(|| {
                AppError::CatalogError(format!("{} returned no result", action))
            });
        }

        Ok(Err(classify_failure(status, envelope.error)))
    }

    async fn show<T: DeserializeOwned>(
        &self,
        action: &str,
        id: &str,
    ) -> Result<Lookup<T>, AppError> {
        let mut url = self.action_url(action)?;
        url.query_pairs_mut().append_pair("id", id);

        match self
            .call(action, self.client.get(url), self.api_key.as_deref())
            .await?
        {
            Ok(result) => Ok(Lookup::Found(serde_json::from_value(result)?)),
            Err(ActionFailure::NotFound) => Ok(Lookup::NotFound),
            Err(ActionFailure::Invalid(errors)) => Err(AppError::CatalogError(format!(
                "{} {} rejected: {}",
                action, id, errors
            ))),
            Err(ActionFailure::Other(message)) => Err(AppError::CatalogError(format!(
                "{} {} failed: {}",
                action, id, message
            ))),
        }
    }

    async fn write(
        &self,
        action: &str,
        ctx: &WriteContext,
        payload: &Value,
    ) -> Result<Value, AppError> {
        let api_key = self.write_key(ctx)?;
        tracing::debug!(action, user = ctx.user.as_deref(), "Writing to local catalog");
        let url = self.action_url(action)?;

        match self
            .call(action, self.client.post(url).json(payload), api_key)
            .await?
        {
            Ok(result) => Ok(result),
            Err(ActionFailure::Invalid(errors)) => Err(AppError::ValidationError(errors)),
            Err(ActionFailure::NotFound) => {
                Err(AppError::CatalogError(format!("{}: not found", action)))
            }
            Err(ActionFailure::Other(message)) => {
                Err(AppError::CatalogError(format!("{} failed: {}", action, message)))
            }
        }
    }

    async fn write_package(
        &self,
        action: &str,
        ctx: &WriteContext,
        package: &RemotePackage,
    ) -> Result<String, AppError> {
        let result = self
            .write(action, ctx, &serde_json::to_value(package)?)
            .await?;
        result
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::CatalogError(format!("{} returned no id", action)))
    }
}

fn classify_failure(status: StatusCode, error: Option<Map<String, Value>>) -> ActionFailure {
    let Some(mut error) = error else {
        return if status == StatusCode::NOT_FOUND {
            ActionFailure::NotFound
        } else {
            ActionFailure::Other(format!("HTTP {}", status.as_u16()))
        };
    };

    let kind = error
        .remove("__type")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();

    match kind.as_str() {
        NOT_FOUND_ERROR => ActionFailure::NotFound,
        VALIDATION_ERROR => {
            let mut errors = ValidationErrors::new();
            for (field, messages) in error {
                match messages {
                    Value::Array(items) => {
                        for item in items {
                            errors.add(field.clone(), message_text(item));
                        }
                    }
                    other => errors.add(field, message_text(other)),
                }
            }
            ActionFailure::Invalid(errors)
        }
        _ => {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(error.clone()).to_string());
            if kind.is_empty() {
                ActionFailure::Other(format!("HTTP {}: {}", status.as_u16(), message))
            } else {
                ActionFailure::Other(format!("HTTP {}: {}: {}", status.as_u16(), kind, message))
            }
        }
    }
}

fn message_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl LocalCatalog for CkanCatalog {
    async fn show_package(&self, id: &str) -> Result<Lookup<LocalPackage>, AppError> {
        self.show("package_show", id).await
    }

    async fn create_package(
        &self,
        ctx: &WriteContext,
        package: &RemotePackage,
    ) -> Result<String, AppError> {
        self.write_package("package_create", ctx, package).await
    }

    async fn update_package(
        &self,
        ctx: &WriteContext,
        package: &RemotePackage,
    ) -> Result<String, AppError> {
        self.write_package("package_update", ctx, package).await
    }

    async fn show_group(&self, id: &str) -> Result<Lookup<LocalGroup>, AppError> {
        self.show("group_show", id).await
    }

    async fn create_group(
        &self,
        ctx: &WriteContext,
        group: &Map<String, Value>,
    ) -> Result<LocalGroup, AppError> {
        let result = self
            .write("group_create", ctx, &Value::Object(group.clone()))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn show_organization(&self, id: &str) -> Result<Lookup<LocalOrganization>, AppError> {
        self.show("organization_show", id).await
    }

    async fn create_organization(
        &self,
        ctx: &WriteContext,
        organization: &Map<String, Value>,
    ) -> Result<LocalOrganization, AppError> {
        let result = self
            .write("organization_create", ctx, &Value::Object(organization.clone()))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn show_user(&self, id: &str) -> Result<Lookup<LocalUser>, AppError> {
        self.show("user_show", id).await
    }
}
