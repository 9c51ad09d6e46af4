use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::QueryBuilder;
use std::collections::HashSet;

use super::schema::Database;
use super::types::{ArticleRecord, FeedMetadata, StoreError};
use super::ArticleStore;

/// Summary row for listing stored articles.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArticle {
    pub guid: String,
    pub title: String,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub word_count: Option<i64>,
    pub reading_time_seconds: Option<i64>,
    pub degraded: bool,
}

type ArticleRow = (
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    bool,
);

impl Database {
    /// Articles stored for `feed_id`, newest first.
    pub async fn articles_for_feed(&self, feed_id: i64) -> Result<Vec<StoredArticle>, StoreError> {
        let rows: Vec<ArticleRow> = sqlx::query_as(
            r#"
            SELECT guid, title, url, published, word_count, reading_time_seconds, degraded
            FROM articles
            WHERE feed_id = ?
            ORDER BY published DESC, id
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(guid, title, url, published, word_count, reading_time_seconds, degraded)| {
                    StoredArticle {
                        guid,
                        title,
                        url,
                        published_at: published.and_then(|s| DateTime::from_timestamp(s, 0)),
                        word_count,
                        reading_time_seconds,
                        degraded,
                    }
                },
            )
            .collect())
    }

    /// Sanitized content HTML for one article, if extraction ran.
    pub async fn article_content(
        &self,
        feed_id: i64,
        guid: &str,
    ) -> Result<Option<String>, StoreError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT content_html FROM articles WHERE feed_id = ? AND guid = ?")
                .bind(feed_id)
                .bind(guid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(html,)| html))
    }
}

#[async_trait]
impl ArticleStore for Database {
    async fn existing_guids(&self, feed_id: i64) -> Result<HashSet<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT guid FROM articles WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(guid,)| guid).collect())
    }

    async fn upsert_feed_metadata(&self, metadata: &FeedMetadata) -> Result<(), StoreError> {
        self.write_feed_metadata(metadata).await
    }

    /// Inserts new articles in one transaction and returns how many were new.
    ///
    /// `INSERT OR IGNORE` on `UNIQUE(feed_id, guid)` drops duplicates; the
    /// count comes from `changes()` per batch.
    async fn insert_articles(&self, records: &[ArticleRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        // 17 binds per row keeps a batch under the SQLite variable limit.
        const BATCH_SIZE: usize = 50;
        let mut total_inserted: usize = 0;

        for chunk in records.chunks(BATCH_SIZE) {
            let mut insert_builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO articles (feed_id, guid, title, author, url, published, \
                 updated, summary, language_code, content_title, byline, content_html, plain_text, \
                 word_count, reading_time_seconds, degraded, fetched_at) ",
            );

            insert_builder.push_values(chunk, |mut b, record| {
                let content = record.content.as_ref();
                b.push_bind(record.feed_id)
                    .push_bind(&record.guid)
                    .push_bind(&record.title)
                    .push_bind(&record.author)
                    .push_bind(&record.link)
                    .push_bind(record.published_at.map(|d| d.timestamp()))
                    .push_bind(record.updated_at.map(|d| d.timestamp()))
                    .push_bind(&record.summary)
                    .push_bind(&record.language_code)
                    .push_bind(content.map(|c| c.title.clone()))
                    .push_bind(content.and_then(|c| c.byline.clone()))
                    .push_bind(content.map(|c| c.html.clone()))
                    .push_bind(content.map(|c| c.plain_text.clone()))
                    .push_bind(content.map(|c| c.word_count as i64))
                    .push_bind(content.map(|c| i64::from(c.reading_time_seconds)))
                    .push_bind(content.is_some_and(|c| c.degraded))
                    .push_bind(now);
            });

            insert_builder.build().execute(&mut *tx).await?;

            let changes: (i64,) = sqlx::query_as("SELECT changes()")
                .fetch_one(&mut *tx)
                .await?;
            total_inserted += changes.0 as usize;
        }

        tx.commit().await?;
        Ok(total_inserted)
    }
}
