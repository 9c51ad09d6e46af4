//! Per-feed ingestion pipeline and the concurrent full refresh.
//!
//! One feed moves through `Fetching -> Parsing -> Merging -> Extracting ->
//! Persisting`. A full refresh spawns one task per non-muted feed on a
//! [`JoinSet`] and waits for all of them; a failing feed never cancels its
//! siblings.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use url::Url;

use super::cache::{BackoffPolicy, ConditionalCache, Validators};
use super::fetcher::{FeedFetcher, FetchError, FetchResult};
use super::http::{RateLimitedFetcher, Transport};
use super::parser::{FeedParser, ParseError, ParsedArticle};
use crate::config::Config;
use crate::content::{HtmlSanitizer, Readability};
use crate::storage::{ArticleRecord, ArticleStore, FeedMetadata, FeedSource, StoreError};
use crate::util::validate_feed_url;

// ============================================================================
// Error Types
// ============================================================================

/// Pipeline stage a feed was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStage {
    Fetching,
    Parsing,
    Merging,
    Extracting,
    Persisting,
}

/// Why a single feed's refresh failed.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Response status other than 200 or 304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// Store failure, tagged with the stage that issued the call
    #[error("{source}")]
    Storage {
        stage: RefreshStage,
        #[source]
        source: StoreError,
    },
    /// The extraction worker or the feed task itself panicked or was cancelled
    #[error("Refresh task failed: {0}")]
    Task(String),
}

impl RefreshError {
    pub fn stage(&self) -> RefreshStage {
        match self {
            Self::Fetch(_) | Self::HttpStatus(_) => RefreshStage::Fetching,
            Self::Parse(_) => RefreshStage::Parsing,
            Self::Storage { stage, .. } => *stage,
            Self::Task(_) => RefreshStage::Extracting,
        }
    }

    fn storage(stage: RefreshStage) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::Storage { stage, source }
    }

    pub fn is_retry_suppressed(&self) -> bool {
        matches!(self, Self::Fetch(e) if e.is_retry_suppressed())
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Result of refreshing one feed: new article count or a typed failure.
#[derive(Debug)]
pub struct RefreshOutcome {
    pub feed_id: i64,
    pub url: String,
    pub result: Result<usize, RefreshError>,
}

/// Outcomes of a full refresh, in completion order.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub outcomes: Vec<RefreshOutcome>,
}

impl RefreshReport {
    pub fn total_new(&self) -> usize {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok()).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RefreshOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn outcome_for(&self, feed_id: i64) -> Option<&RefreshOutcome> {
        self.outcomes.iter().find(|o| o.feed_id == feed_id)
    }
}

/// Progress update sent as each feed of a full refresh finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshProgress {
    pub completed: usize,
    pub total: usize,
}

// ============================================================================
// Ingestor
// ============================================================================

/// Drives feeds through fetch, parse, merge, extract and persist.
///
/// Cloning is cheap; clones share the limiter, validator table and store.
#[derive(Clone)]
pub struct Ingestor {
    fetcher: Arc<FeedFetcher>,
    parser: FeedParser,
    readability: Arc<Readability>,
    sanitizer: HtmlSanitizer,
    store: Arc<dyn ArticleStore>,
    progress: Option<mpsc::Sender<RefreshProgress>>,
}

impl Ingestor {
    pub fn new(
        fetcher: Arc<FeedFetcher>,
        readability: Readability,
        store: Arc<dyn ArticleStore>,
    ) -> Self {
        Self {
            fetcher,
            parser: FeedParser::new(),
            readability: Arc::new(readability),
            sanitizer: HtmlSanitizer::new(),
            store,
            progress: None,
        }
    }

    /// Wires a fresh limiter and validator table around `transport`.
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ArticleStore>,
    ) -> Self {
        let http = RateLimitedFetcher::new(transport, config.fetch.max_concurrent_requests);
        let cache = Arc::new(ConditionalCache::new(BackoffPolicy::from_config(&config.fetch)));
        Self::new(
            Arc::new(FeedFetcher::new(http, cache)),
            Readability::new(config.readability.clone()),
            store,
        )
    }

    /// Reports `(completed, total)` on `tx` during [`Ingestor::refresh_all`].
    pub fn with_progress(mut self, tx: mpsc::Sender<RefreshProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn fetcher(&self) -> &Arc<FeedFetcher> {
        &self.fetcher
    }

    /// Refreshes every non-muted feed concurrently and waits for all of them.
    pub async fn refresh_all(&self, feeds: &[FeedSource]) -> RefreshReport {
        let active: Vec<FeedSource> = feeds.iter().filter(|f| !f.muted).cloned().collect();

        let muted = feeds.len() - active.len();
        if muted > 0 {
            tracing::debug!(muted, "Skipping muted feeds");
        }

        let total = active.len();
        if total == 0 {
            self.report_progress(0, 0).await;
            return RefreshReport::default();
        }

        let mut tasks = JoinSet::new();
        let mut spawned: HashMap<tokio::task::Id, (i64, String)> = HashMap::with_capacity(total);

        for feed in active {
            let ingestor = self.clone();
            let key = (feed.id, feed.url.clone());
            let handle = tasks.spawn(async move { ingestor.refresh_one(&feed).await });
            spawned.insert(handle.id(), key);
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    let (feed_id, url) = spawned.remove(&e.id()).unwrap_or_default();
                    tracing::warn!(feed = %url, error = %e, "Feed refresh task failed");
                    RefreshOutcome {
                        feed_id,
                        url,
                        result: Err(RefreshError::Task(e.to_string())),
                    }
                }
            };
            outcomes.push(outcome);
            self.report_progress(outcomes.len(), total).await;
        }

        let report = RefreshReport { outcomes };
        tracing::info!(
            feeds = total,
            new_articles = report.total_new(),
            failures = report.failures().count(),
            "Refresh complete"
        );
        report
    }

    /// Refreshes one feed regardless of its muted flag.
    pub async fn refresh_one(&self, feed: &FeedSource) -> RefreshOutcome {
        let result = self.ingest(feed).await;

        match &result {
            Ok(_) => {}
            Err(e) if e.is_retry_suppressed() => {
                tracing::debug!(feed = %feed.url, error = %e, "Feed skipped");
            }
            Err(e) => {
                tracing::warn!(feed = %feed.url, stage = ?e.stage(), error = %e, "Feed refresh failed");
            }
        }

        RefreshOutcome {
            feed_id: feed.id,
            url: feed.url.clone(),
            result,
        }
    }

    async fn ingest(&self, feed: &FeedSource) -> Result<usize, RefreshError> {
        let url = feed.url.as_str();
        let cache = self.fetcher.cache();

        cache.seed(
            url,
            Validators {
                etag: feed.etag.clone(),
                last_modified: feed.last_modified,
            },
        );

        tracing::debug!(feed = %url, stage = ?RefreshStage::Fetching, "Refreshing feed");
        let fetched = self.fetcher.fetch(url).await?;
        match fetched.status {
            304 => return Ok(0),
            200 => {}
            status => return Err(RefreshError::HttpStatus(status)),
        }

        let result = self.process(feed, fetched).await;
        if result.is_err() {
            // Next fetch goes out unconditional.
            cache.forget_validators(url);
        }
        result
    }

    async fn process(&self, feed: &FeedSource, fetched: FetchResult) -> Result<usize, RefreshError> {
        let FetchResult {
            body,
            etag,
            last_modified,
            ..
        } = fetched;
        let source_url = validate_feed_url(&feed.url).map_err(FetchError::from)?;

        tracing::debug!(feed = %feed.url, stage = ?RefreshStage::Parsing, bytes = body.len(), "Parsing feed");
        let parsed = self.parser.parse(&body, &source_url)?;
        drop(body);

        let known = self
            .store
            .existing_guids(feed.id)
            .await
            .map_err(RefreshError::storage(RefreshStage::Merging))?;
        let total = parsed.articles.len();
        let fresh: Vec<ParsedArticle> = parsed
            .articles
            .into_iter()
            .filter(|a| !known.contains(&a.guid))
            .collect();
        tracing::debug!(
            feed = %feed.url,
            stage = ?RefreshStage::Merging,
            entries = total,
            new = fresh.len(),
            "Merged against known guids"
        );

        let records = self.extract(feed.id, &source_url, fresh).await?;
        let inserted = self
            .store
            .insert_articles(&records)
            .await
            .map_err(RefreshError::storage(RefreshStage::Persisting))?;

        let metadata = FeedMetadata {
            feed_id: feed.id,
            title: (!feed.has_title()).then_some(parsed.title),
            site_url: parsed.site_url.map(String::from),
            etag,
            last_modified,
            fetched_at: Utc::now(),
        };
        self.store
            .upsert_feed_metadata(&metadata)
            .await
            .map_err(RefreshError::storage(RefreshStage::Persisting))?;

        tracing::info!(feed = %feed.url, new = inserted, "Feed refreshed");
        Ok(inserted)
    }

    /// Runs extraction and sanitization off the async workers.
    async fn extract(
        &self,
        feed_id: i64,
        source_url: &Url,
        articles: Vec<ParsedArticle>,
    ) -> Result<Vec<ArticleRecord>, RefreshError> {
        if articles.is_empty() {
            return Ok(Vec::new());
        }

        let readability = Arc::clone(&self.readability);
        let sanitizer = self.sanitizer;
        let source_url = source_url.clone();

        tokio::task::spawn_blocking(move || {
            articles
                .into_iter()
                .map(|article| {
                    let content = article.extractable_html().map(|html| {
                        let base = article.link.as_ref().unwrap_or(&source_url);
                        let mut result = readability.extract(html, Some(base));
                        if result.degraded {
                            tracing::warn!(guid = %article.guid, "Extraction degraded");
                        }
                        result.html = sanitizer.sanitize(&result.html);
                        result
                    });
                    ArticleRecord::from_parsed(feed_id, article, content)
                })
                .collect()
        })
        .await
        .map_err(|e| RefreshError::Task(e.to_string()))
    }

    async fn report_progress(&self, completed: usize, total: usize) {
        if let Some(tx) = &self.progress {
            if let Err(e) = tx.send(RefreshProgress { completed, total }).await {
                tracing::warn!(error = %e, completed, total, "Progress channel send failed (receiver dropped)");
            }
        }
    }
}
