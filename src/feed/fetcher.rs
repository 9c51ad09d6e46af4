use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::cache::{format_http_date, parse_http_date, CacheCheck, ConditionalCache, Validators};
use super::http::RateLimitedFetcher;
use crate::util::{validate_feed_url, UrlValidationError};

/// Errors that can occur while fetching a feed.
///
/// Everything except [`FetchError::RetrySuppressed`] is a network-level
/// failure; HTTP error statuses are not errors at this layer.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Failure reported by a non-reqwest transport
    #[error("Transport error: {0}")]
    Transport(String),
    /// Request exceeded the configured deadline
    #[error("Request timed out")]
    Timeout,
    /// Feed URL is not an http(s) URL with a host
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// URL is inside its retry-suppression window; no request was made
    #[error("Retry suppressed for {url} ({} s remaining)", .retry_in.as_secs())]
    RetrySuppressed { url: String, retry_in: Duration },
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The request limiter was shut down
    #[error("Request limiter closed")]
    LimiterClosed,
}

impl FetchError {
    pub fn is_retry_suppressed(&self) -> bool {
        matches!(self, Self::RetrySuppressed { .. })
    }
}

/// Outcome of one conditional feed fetch.
///
/// `body` is empty for a 304. For a 304 the validators are the ones already
/// cached; for a 200 they are the ones the server just sent.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub status: u16,
    pub body: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl FetchResult {
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }
}

/// Conditional GET on top of the shared limiter and validator table.
pub struct FeedFetcher {
    http: RateLimitedFetcher,
    cache: Arc<ConditionalCache>,
}

impl FeedFetcher {
    pub fn new(http: RateLimitedFetcher, cache: Arc<ConditionalCache>) -> Self {
        Self { http, cache }
    }

    pub fn cache(&self) -> &Arc<ConditionalCache> {
        &self.cache
    }

    /// Fetches `url`, sending cached validators and recording the outcome.
    ///
    /// Fails fast with [`FetchError::RetrySuppressed`] while the URL is in its
    /// backoff window. Transport failures leave the cache untouched.
    pub async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        let parsed = validate_feed_url(url)?;

        let validators = match self.cache.check(url) {
            CacheCheck::Suppressed { retry_in } => {
                tracing::debug!(feed = %url, retry_in_secs = retry_in.as_secs(), "Fetch suppressed");
                return Err(FetchError::RetrySuppressed {
                    url: url.to_string(),
                    retry_in,
                });
            }
            CacheCheck::Ready(validators) => validators,
        };

        let response = self.http.fetch(&parsed, conditional_headers(&validators)).await?;

        let received = Validators {
            etag: response.header("etag").map(str::to_string),
            last_modified: response.header("last-modified").and_then(parse_http_date),
        };
        let validators = self.cache.record(url, response.status, received);

        if response.status == 304 {
            tracing::debug!(feed = %url, "Feed not modified");
            return Ok(FetchResult {
                status: 304,
                body: Vec::new(),
                etag: validators.etag,
                last_modified: validators.last_modified,
            });
        }

        Ok(FetchResult {
            status: response.status,
            body: response.body,
            etag: validators.etag,
            last_modified: validators.last_modified,
        })
    }
}

fn conditional_headers(validators: &Validators) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(etag) = validators.etag.as_deref() {
        if let Ok(value) = HeaderValue::from_str(etag) {
            headers.insert(IF_NONE_MATCH, value);
        }
    }
    if let Some(date) = validators.last_modified.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format_http_date(date)) {
            headers.insert(IF_MODIFIED_SINCE, value);
        }
    }
    headers
}
