//! Storage contract consumed by the ingestion pipeline, plus two adapters.
//!
//! The pipeline only needs three operations: known guids for a feed, a
//! feed-metadata upsert and a batch article insert. [`MemoryStore`] keeps
//! everything in process; [`Database`] persists to SQLite via `sqlx`.

mod articles;
mod feeds;
mod memory;
mod schema;
mod types;

use async_trait::async_trait;
use std::collections::HashSet;

pub use articles::StoredArticle;
pub use memory::MemoryStore;
pub use schema::Database;
pub use types::{ArticleRecord, FeedMetadata, FeedSource, StoreError};

/// Persistence collaborator for ingestion.
///
/// Implementations must ignore a record whose `(feed_id, guid)` is already
/// stored and count only the rows actually inserted.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn existing_guids(&self, feed_id: i64) -> Result<HashSet<String>, StoreError>;

    async fn upsert_feed_metadata(&self, metadata: &FeedMetadata) -> Result<(), StoreError>;

    async fn insert_articles(&self, records: &[ArticleRecord]) -> Result<usize, StoreError>;
}
