use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::content::ExtractionResult;
use crate::feed::ParsedArticle;

// ============================================================================
// Error Types
// ============================================================================

/// Storage errors with user-friendly messages
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another process holds the database lock
    #[error("Database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Maps lock-related sqlx errors to [`StoreError::InstanceLocked`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return StoreError::InstanceLocked;
        }
        StoreError::Database(err)
    }
}

pub(crate) fn is_lock_message(message: &str) -> bool {
    // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Domain Types
// ============================================================================

/// A subscribed feed as the ingestion pipeline sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSource {
    pub id: i64,
    pub url: String,
    /// `None` until a fetch supplies one.
    pub title: Option<String>,
    /// Muted feeds are skipped by a full refresh.
    pub muted: bool,
    /// Validators from the last 200 response.
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl FeedSource {
    pub fn new(id: i64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            title: None,
            muted: false,
            etag: None,
            last_modified: None,
        }
    }

    pub fn has_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Feed-level fields written after a successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedMetadata {
    pub feed_id: i64,
    /// Only set when the stored feed has no title yet.
    pub title: Option<String>,
    pub site_url: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

/// Storage-ready article: parsed metadata plus optional extracted content.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRecord {
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub author: Option<String>,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub language_code: Option<String>,
    pub content: Option<ExtractionResult>,
}

impl ArticleRecord {
    pub fn from_parsed(
        feed_id: i64,
        article: ParsedArticle,
        content: Option<ExtractionResult>,
    ) -> Self {
        Self {
            feed_id,
            guid: article.guid,
            title: article.title,
            author: article.author,
            link: article.link.map(String::from),
            published_at: article.published_at,
            updated_at: article.updated_at,
            summary: article.summary,
            language_code: article.language_code,
            content,
        }
    }
}
