use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{FeedMetadata, FeedSource, StoreError};

type FeedRow = (
    i64,
    String,
    Option<String>,
    bool,
    Option<String>,
    Option<i64>,
);

fn timestamp(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

impl Database {
    /// Subscribe to `url`, returning the feed id. Existing subscriptions are reused.
    pub async fn subscribe(&self, url: &str) -> Result<i64, StoreError> {
        sqlx::query("INSERT OR IGNORE INTO feeds (url) VALUES (?)")
            .bind(url)
            .execute(&self.pool)
            .await?;

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// All subscriptions with their stored validators, ordered by id.
    pub async fn feed_sources(&self) -> Result<Vec<FeedSource>, StoreError> {
        let rows: Vec<FeedRow> = sqlx::query_as(
            "SELECT id, url, title, muted, etag, last_modified FROM feeds ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, url, title, muted, etag, last_modified)| FeedSource {
                id,
                url,
                title,
                muted,
                etag,
                last_modified: timestamp(last_modified),
            })
            .collect())
    }

    pub async fn set_feed_muted(&self, feed_id: i64, muted: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE feeds SET muted = ? WHERE id = ?")
            .bind(muted)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set or clear the error status for a feed
    pub async fn set_feed_error(&self, feed_id: i64, error: Option<&str>) -> Result<(), StoreError> {
        sqlx::query("UPDATE feeds SET error = ? WHERE id = ?")
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn feed_error(&self, feed_id: i64) -> Result<Option<String>, StoreError> {
        let row: Option<(Option<String>,)> = sqlx::query_as("SELECT error FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(error,)| error))
    }

    /// Writes post-fetch feed fields and clears the error status.
    ///
    /// `title` and `site_url` only overwrite when provided; validators are
    /// always replaced so an absent header clears the stored value.
    pub(crate) async fn write_feed_metadata(&self, metadata: &FeedMetadata) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE feeds SET
                title = COALESCE(?, title),
                site_url = COALESCE(?, site_url),
                etag = ?,
                last_modified = ?,
                last_fetched = ?,
                error = NULL
            WHERE id = ?
        "#,
        )
        .bind(&metadata.title)
        .bind(&metadata.site_url)
        .bind(&metadata.etag)
        .bind(metadata.last_modified.map(|d| d.timestamp()))
        .bind(metadata.fetched_at.timestamp())
        .bind(metadata.feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
