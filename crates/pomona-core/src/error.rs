use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Field-level validation failures reported by the local catalog.
///
/// Keys are payload field names (`name`, `owner_org`, `groups`, ...), values
/// the messages the catalog attached to that field. Ordered so that the
/// rendered message is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message for `field`, keeping earlier messages for the same field.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Builder-style variant of [`add`](Self::add).
    pub fn with(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.add(field, message);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.fields {
            if !first {
                write!(f, "; ")?;
            }
            first = false;
            write!(f, "{}: {}", field, messages.join(", "))?;
        }
        Ok(())
    }
}

/// Application-wide error types.
///
/// This enum represents every failure the harvester distinguishes. It uses the
/// `thiserror` crate for ergonomic error handling and automatic conversion
/// from underlying library errors.
///
/// # Error Conversion
///
/// - `sqlx::Error` → `AppError::DatabaseError`
/// - `serde_json::Error` → `AppError::SerializationError`
///
/// # Examples
///
/// ```no_run
/// use pomona_core::error::AppError;
///
/// fn example() -> Result<(), AppError> {
///     Err(AppError::Generic("Something went wrong".to_string()))
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// Wraps all errors from SQLx, including connection failures, query
    /// errors and constraint violations.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// The remote resource does not exist (HTTP 404).
    ///
    /// Kept apart from [`AppError::FetchError`] so callers can tell "this item
    /// is gone" from a transient failure.
    #[error("Remote resource not found: {0}")]
    NotFound(String),

    /// Fetching remote content failed.
    ///
    /// Covers any non-404 HTTP status, transport and socket errors, timeouts
    /// and body read failures.
    #[error("Fetch error: {0}")]
    FetchError(String),

    /// Paging through a remote search endpoint failed structurally.
    ///
    /// Raised for undecodable pages, stalled paging and wrapped fetch failures.
    #[error("Search error: {0}")]
    SearchError(String),

    /// A referenced remote group or organization could not be fetched or decoded.
    #[error("Remote resource error: {0}")]
    RemoteResourceError(String),

    /// The local catalog rejected a write.
    #[error("Validation error: {0}")]
    ValidationError(ValidationErrors),

    /// The local catalog failed for a reason other than validation.
    #[error("Catalog error: {0}")]
    CatalogError(String),

    /// JSON serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The configured harvest source URL cannot be used to build endpoints.
    #[error("Invalid harvest source URL: {0}")]
    InvalidSourceUrl(String),

    /// Configuration error.
    ///
    /// Raised for malformed `sources.toml` files and for source configuration
    /// blobs that fail validation.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic application error for cases not covered by specific variants.
    #[error("Error: {0}")]
    Generic(String),
}

impl AppError {
    /// Returns a user-friendly error message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DatabaseError(e) => {
                if e.to_string().contains("connection") {
                    "Cannot connect to database. Is PostgreSQL running?\n   Try: docker-compose up -d".to_string()
                } else {
                    format!("Database error: {}", e)
                }
            }
            AppError::FetchError(msg) => {
                if msg.contains("timed out") {
                    "Request timed out. The remote catalog may be slow or unreachable.\n   Try again later or check the source URL.".to_string()
                } else if msg.contains("connect") {
                    format!(
                        "Cannot connect to remote catalog: {}\n   Check your internet connection and the source URL.",
                        msg
                    )
                } else {
                    format!("Fetch error: {}", msg)
                }
            }
            AppError::InvalidSourceUrl(url) => {
                format!(
                    "Invalid harvest source URL: {}\n   Example: https://dati.toscana.it",
                    url
                )
            }
            AppError::ValidationError(errors) => {
                format!("The local catalog rejected the write: {}", errors)
            }
            AppError::ConfigError(msg) => {
                format!(
                    "Configuration error: {}\n   Check your sources file and source configuration.",
                    msg
                )
            }
            _ => self.to_string(),
        }
    }

    /// Returns true if the remote side reported the resource as absent.
    ///
    /// # Examples
    ///
    /// ```
    /// use pomona_core::error::AppError;
    ///
    /// assert!(AppError::NotFound("https://example.org/x".to_string()).is_not_found());
    /// assert!(!AppError::FetchError("HTTP 500".to_string()).is_not_found());
    /// ```
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }

    /// Short machine-friendly label used in logs and persisted diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::DatabaseError(_) => "database",
            AppError::NotFound(_) => "not_found",
            AppError::FetchError(_) => "fetch",
            AppError::SearchError(_) => "search",
            AppError::RemoteResourceError(_) => "remote_resource",
            AppError::ValidationError(_) => "validation",
            AppError::CatalogError(_) => "catalog",
            AppError::SerializationError(_) => "serialization",
            AppError::InvalidUrl(_) => "invalid_url",
            AppError::InvalidSourceUrl(_) => "invalid_source_url",
            AppError::ConfigError(_) => "config",
            AppError::Generic(_) => "generic",
        }
    }
}
