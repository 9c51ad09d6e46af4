//! HTTP transport and the process-wide request limiter.
//!
//! [`Transport`] is the minimal `request -> (status, headers, body)` seam the
//! rest of the pipeline depends on. [`ReqwestTransport`] is the production
//! implementation; tests substitute counting or failing transports.
//! [`RateLimitedFetcher`] wraps any transport with a fixed cap on in-flight
//! requests.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

use super::fetcher::FetchError;
use crate::config::FetchConfig;

/// A GET request handed to a [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

/// Raw HTTP response: status, headers and the full body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Network transport collaborator.
///
/// Implementations must return `Ok` for every HTTP response regardless of
/// status and reserve `Err` for transport-level failures.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, FetchError>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
///
/// Each request gets a deadline and a body size limit; bodies shorter than the
/// advertised `Content-Length` are reported as incomplete.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client, config: &FetchConfig) -> Self {
        Self {
            client,
            timeout: config.request_timeout(),
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// Builds a client with the configured `User-Agent`.
    pub fn from_config(config: &FetchConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        if let Ok(agent) = HeaderValue::from_str(&config.user_agent) {
            headers.insert(USER_AGENT, agent);
        }
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(FetchError::Network)?;
        Ok(Self::new(client, config))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    /// The deadline covers both the response head and the full body.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        tokio::time::timeout(self.timeout, self.get(request))
            .await
            .map_err(|_| FetchError::Timeout)?
    }
}

impl ReqwestTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        let response = self
            .client
            .get(request.url.as_str())
            .headers(request.headers)
            .send()
            .await
            .map_err(FetchError::Network)?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = read_limited_bytes(response, self.max_body_bytes).await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

/// Issues requests through a [`Transport`] with at most `max_in_flight`
/// requests outstanding across every clone of this fetcher.
///
/// Callers beyond the cap wait on a semaphore. The slot is an RAII permit, so
/// it is released exactly once whether the request succeeds, fails or the
/// calling future is dropped.
#[derive(Clone)]
pub struct RateLimitedFetcher {
    transport: Arc<dyn Transport>,
    slots: Arc<Semaphore>,
    max_in_flight: usize,
}

impl RateLimitedFetcher {
    pub const DEFAULT_MAX_IN_FLIGHT: usize = 6;

    pub fn new(transport: Arc<dyn Transport>, max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            transport,
            slots: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    pub async fn fetch(&self, url: &Url, headers: HeaderMap) -> Result<HttpResponse, FetchError> {
        let _slot = self
            .slots
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;

        tracing::trace!(url = %url, in_flight = self.in_flight(), "Fetch slot acquired");

        self.transport
            .execute(HttpRequest {
                url: url.clone(),
                headers,
            })
            .await
    }

    /// Number of requests currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.slots.available_permits()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}
