use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::types::{ArticleRecord, FeedMetadata, StoreError};
use super::ArticleStore;

#[derive(Debug, Default)]
struct Inner {
    feeds: HashMap<i64, FeedMetadata>,
    articles: HashMap<i64, Vec<ArticleRecord>>,
}

/// In-process [`ArticleStore`] backed by mutex-guarded maps.
///
/// Duplicate `(feed_id, guid)` inserts are ignored, matching the SQLite schema.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Articles stored for `feed_id`, in insertion order.
    pub fn articles(&self, feed_id: i64) -> Vec<ArticleRecord> {
        self.lock().articles.get(&feed_id).cloned().unwrap_or_default()
    }

    pub fn feed_metadata(&self, feed_id: i64) -> Option<FeedMetadata> {
        self.lock().feeds.get(&feed_id).cloned()
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn existing_guids(&self, feed_id: i64) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .lock()
            .articles
            .get(&feed_id)
            .map(|list| list.iter().map(|a| a.guid.clone()).collect())
            .unwrap_or_default())
    }

    async fn upsert_feed_metadata(&self, metadata: &FeedMetadata) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.feeds.get_mut(&metadata.feed_id) {
            Some(existing) => {
                if metadata.title.is_some() {
                    existing.title = metadata.title.clone();
                }
                if metadata.site_url.is_some() {
                    existing.site_url = metadata.site_url.clone();
                }
                existing.etag = metadata.etag.clone();
                existing.last_modified = metadata.last_modified;
                existing.fetched_at = metadata.fetched_at;
            }
            None => {
                inner.feeds.insert(metadata.feed_id, metadata.clone());
            }
        }
        Ok(())
    }

    async fn insert_articles(&self, records: &[ArticleRecord]) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        let mut inserted = 0;
        for record in records {
            let list = inner.articles.entry(record.feed_id).or_default();
            if list.iter().any(|a| a.guid == record.guid) {
                continue;
            }
            list.push(record.clone());
            inserted += 1;
        }
        Ok(inserted)
    }
}
