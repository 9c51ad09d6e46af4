//! Per-URL conditional-request validators and retry suppression.
//!
//! The cache is an injected, mutex-guarded table. It never performs I/O; the
//! fetcher consults it before a request and records the outcome afterwards.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::FetchConfig;

/// Validators sent back to the server on the next request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Validators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Cached state for one feed URL.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub validators: Validators,
    /// Fetches before this instant fail fast without touching the network.
    pub retry_not_before: Option<Instant>,
    /// Consecutive 5xx responses; drives the backoff window.
    pub failure_streak: u32,
}

/// Outcome of consulting the cache before a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheCheck {
    Suppressed { retry_in: Duration },
    Ready(Validators),
}

/// Exponential suppression window: `base * 2^(streak - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            base: config.retry_backoff(),
            max: config.retry_backoff_max(),
        }
    }

    pub fn window(&self, streak: u32) -> Duration {
        let exponent = streak.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

#[derive(Debug, Default)]
pub struct ConditionalCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    backoff: BackoffPolicy,
}

impl ConditionalCache {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            backoff,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        // Entries stay consistent across a panic: every update is a plain field write.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decides whether `url` may be fetched now and returns the validators to send.
    pub fn check(&self, url: &str) -> CacheCheck {
        let entries = self.lock();
        let Some(entry) = entries.get(url) else {
            return CacheCheck::Ready(Validators::default());
        };

        if let Some(not_before) = entry.retry_not_before {
            let now = Instant::now();
            if not_before > now {
                return CacheCheck::Suppressed {
                    retry_in: not_before - now,
                };
            }
        }

        CacheCheck::Ready(entry.validators.clone())
    }

    /// Installs persisted validators for a URL the cache has not seen yet.
    ///
    /// Existing entries win: they are at least as fresh as what storage holds.
    pub fn seed(&self, url: &str, validators: Validators) {
        if validators.is_empty() {
            return;
        }
        self.lock()
            .entry(url.to_string())
            .or_insert_with(|| CacheEntry {
                validators,
                ..CacheEntry::default()
            });
    }

    /// Records a response status and returns the validators the caller should report.
    ///
    /// - 304: nothing changes; the cached validators are echoed.
    /// - 5xx: the suppression window grows.
    /// - anything else: suppression clears.
    /// - 200: validators are replaced by the response headers (absent clears).
    pub fn record(&self, url: &str, status: u16, response: Validators) -> Validators {
        let mut entries = self.lock();
        let entry = entries.entry(url.to_string()).or_default();

        match status {
            304 => {}
            500..=599 => {
                entry.failure_streak = entry.failure_streak.saturating_add(1);
                let window = self.backoff.window(entry.failure_streak);
                entry.retry_not_before = Some(Instant::now() + window);
                tracing::debug!(
                    feed = %url,
                    status,
                    streak = entry.failure_streak,
                    window_secs = window.as_secs(),
                    "Suppressing retries after server error"
                );
            }
            _ => {
                entry.failure_streak = 0;
                entry.retry_not_before = None;
                if status == 200 {
                    entry.validators = response;
                }
            }
        }

        entry.validators.clone()
    }

    /// Drops stored validators so the next fetch is unconditional.
    ///
    /// Used when a 200 body could not be processed: keeping its ETag would turn
    /// every later fetch into a 304 for content that was never stored.
    pub fn forget_validators(&self, url: &str) {
        if let Some(entry) = self.lock().get_mut(url) {
            entry.validators = Validators::default();
        }
    }

    pub fn get(&self, url: &str) -> Option<CacheEntry> {
        self.lock().get(url).cloned()
    }
}

/// Formats a timestamp as an RFC-1123 HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
///
/// Day and month names are fixed English tokens regardless of locale.
pub fn format_http_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an HTTP date header. Returns `None` for anything not RFC-1123/2822 shaped.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
