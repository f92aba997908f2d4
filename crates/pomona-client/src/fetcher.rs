//! Remote content fetcher over `reqwest`.

use pomona_core::HttpConfig;
use pomona_core::error::AppError;
use pomona_core::traits::ContentFetcher;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use url::Url;

/// HTTP client used for every request to a remote catalog.
///
/// Each call is a single GET attempt bounded by [`HttpConfig::timeout`]. The
/// credential, when present, is sent verbatim as the `Authorization` header.
///
/// # Examples
///
/// ```no_run
/// use pomona_client::HttpFetcher;
/// use pomona_core::{ContentFetcher, HttpConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = HttpFetcher::new(&HttpConfig::default())?;
/// let url = "https://dati.toscana.it/api/3/action/package_show?id=abc".parse()?;
/// let body = fetcher.fetch(&url, None).await?;
/// println!("{} bytes", body.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    /// Builds a fetcher from the HTTP configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::FetchError` if the HTTP client cannot be built.
    pub fn new(config: &HttpConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::FetchError(format!("Could not build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout_secs: config.timeout.as_secs(),
        })
    }

    fn transport_error(&self, url: &Url, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::FetchError(format!(
                "Request timed out after {}s: {}",
                self.timeout_secs, url
            ))
        } else if e.is_connect() {
            AppError::FetchError(format!("Connection failed: {}: {}", url, e))
        } else {
            AppError::FetchError(format!("Request failed: {}: {}", url, e))
        }
    }
}

impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, credential: Option<&str>) -> Result<Vec<u8>, AppError> {
        tracing::debug!(%url, "GET");

        let mut request = self.client.get(url.clone());
        if let Some(credential) = credential {
            request = request.header(AUTHORIZATION, credential);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(AppError::FetchError(format!(
                "HTTP {} from {}",
                status.as_u16(),
                url
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(url, e))?;
        Ok(body.to_vec())
    }
}
