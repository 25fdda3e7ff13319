// src/utils/http.rs

//! HTTP fetching with classified failures and bounded retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::error::Result;
use crate::models::CrawlerConfig;

/// Classified failure of a single fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The source does not (or no longer) serve this resource
    #[error("not found: {0}")]
    NotFound(String),

    /// Timeout, connection reset, 5xx or rate limiting; worth retrying
    #[error("transient failure for {url}: {message}")]
    Transient { url: String, message: String },

    /// Any other failure; retrying will not help
    #[error("request to {url} failed: {message}")]
    Fatal { url: String, message: String },
}

impl FetchError {
    pub fn transient(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Transient {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn fatal(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Fatal {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// Source of raw bytes for a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError>;
}

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &CrawlerConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// `Fetcher` backed by a `reqwest` client.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_transport(url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::transient(url, format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::fatal(url, format!("HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify_transport(url, e))?;
        Ok(bytes.to_vec())
    }
}

fn classify_transport(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        FetchError::transient(url, err)
    } else {
        FetchError::fatal(url, err)
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// One initial attempt plus `max_retries` retries.
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            max_attempts: config.max_retries.saturating_add(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Delay before the given retry attempt (1-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        self.base_delay * (1 << capped)
    }
}

/// Fetch `url`, retrying transient failures.
///
/// `Ok(None)` means the source reported the resource as missing.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetcher,
    url: &str,
    policy: RetryPolicy,
) -> std::result::Result<Option<Vec<u8>>, FetchError> {
    let mut attempt = 0usize;
    loop {
        match fetcher.fetch(url).await {
            Ok(bytes) => return Ok(Some(bytes)),
            Err(FetchError::NotFound(_)) => return Ok(None),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                attempt += 1;
                log::debug!("Retrying {} (attempt {}): {}", url, attempt + 1, err);
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}
