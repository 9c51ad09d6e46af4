//! Integration tests for the refresh lifecycle: fetch, merge, extract, persist.
//!
//! Each test starts its own mock server and in-memory SQLite database.
//! Feeds are served by wiremock so conditional requests, server errors and
//! retry suppression run over real HTTP.

use std::sync::Arc;

use kitsune::config::Config;
use kitsune::feed::{Ingestor, RefreshError, ReqwestTransport};
use kitsune::storage::{ArticleStore, Database, FeedMetadata};
use pretty_assertions::assert_eq;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

fn ingestor(db: &Database) -> Ingestor {
    let config = Config::default();
    let transport = ReqwestTransport::from_config(&config.fetch).unwrap();
    Ingestor::from_config(&config, Arc::new(transport), Arc::new(db.clone()))
}

fn rss(title: &str, items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, body)| {
            format!(
                "<item><title>Post {guid}</title><guid>{guid}</guid>\
                 <link>/posts/{guid}</link>\
                 <description>&lt;p&gt;{body}&lt;/p&gt;</description></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>{title}</title><link>/</link>{items}</channel></rss>"#
    )
}

async fn serve(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

// ============================================================================
// Ingestion
// ============================================================================

#[tokio::test]
async fn test_refresh_persists_articles_and_feed_metadata() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed.xml",
        rss("Example Feed", &[("1", "First body"), ("2", "Second body")]),
    )
    .await;

    let db = test_db().await;
    let url = format!("{}/feed.xml", server.uri());
    let feed_id = db.subscribe(&url).await.unwrap();

    let feeds = db.feed_sources().await.unwrap();
    let report = ingestor(&db).refresh_all(&feeds).await;
    assert_eq!(report.total_new(), 2);
    assert_eq!(report.failures().count(), 0);

    let feed = db.feed_sources().await.unwrap().remove(0);
    assert_eq!(feed.title.as_deref(), Some("Example Feed"));
    assert_eq!(feed.etag.as_deref(), Some("\"v1\""));

    let articles = db.articles_for_feed(feed_id).await.unwrap();
    assert_eq!(articles.len(), 2);
    let first = articles.iter().find(|a| a.guid == "1").unwrap();
    assert_eq!(first.url, Some(format!("{}/posts/1", server.uri())));
    assert!(first.word_count.unwrap() >= 6);
    assert_eq!(first.reading_time_seconds, Some(60));

    let html = db.article_content(feed_id, "1").await.unwrap().unwrap();
    assert!(html.contains("First body"));
}

#[tokio::test]
async fn test_same_feed_twice_adds_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss("F", &[("a", "A"), ("b", "B")])))
        .expect(2)
        .mount(&server)
        .await;

    let db = test_db().await;
    let feed_id = db.subscribe(&format!("{}/feed.xml", server.uri())).await.unwrap();
    let ingestor = ingestor(&db);

    let feeds = db.feed_sources().await.unwrap();
    assert_eq!(ingestor.refresh_all(&feeds).await.total_new(), 2);

    let feeds = db.feed_sources().await.unwrap();
    assert_eq!(ingestor.refresh_all(&feeds).await.total_new(), 0);
    assert_eq!(db.articles_for_feed(feed_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_repeated_guid_within_feed_stored_once_per_entry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss("F", &[("same", "First"), ("same", "Second")])),
        )
        .expect(3)
        .mount(&server)
        .await;

    let db = test_db().await;
    let feed_id = db.subscribe(&format!("{}/feed.xml", server.uri())).await.unwrap();
    let ingestor = ingestor(&db);

    let mut new_per_refresh = Vec::new();
    for _ in 0..3 {
        let feeds = db.feed_sources().await.unwrap();
        new_per_refresh.push(ingestor.refresh_all(&feeds).await.total_new());
    }

    assert_eq!(new_per_refresh, vec![2, 0, 0]);
    assert_eq!(db.articles_for_feed(feed_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_scripts_removed_from_stored_content() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/feed.xml",
        rss(
            "F",
            &[("x", "Hello&lt;/p&gt;&lt;script&gt;alert(1)&lt;/script&gt;&lt;p&gt;world")],
        ),
    )
    .await;

    let db = test_db().await;
    let feed_id = db.subscribe(&format!("{}/feed.xml", server.uri())).await.unwrap();
    let feeds = db.feed_sources().await.unwrap();
    ingestor(&db).refresh_all(&feeds).await;

    let html = db.article_content(feed_id, "x").await.unwrap().unwrap();
    assert!(html.contains("Hello"));
    assert!(!html.contains("<script"));
    assert!(!html.contains("alert(1)"));
}

#[tokio::test]
async fn test_stored_title_is_not_overwritten() {
    let server = MockServer::start().await;
    serve(&server, "/feed.xml", rss("Remote Title", &[("1", "Body")])).await;

    let db = test_db().await;
    let feed_id = db.subscribe(&format!("{}/feed.xml", server.uri())).await.unwrap();
    db.upsert_feed_metadata(&FeedMetadata {
        feed_id,
        title: Some("My Title".to_string()),
        site_url: None,
        etag: None,
        last_modified: None,
        fetched_at: chrono::Utc::now(),
    })
    .await
    .unwrap();

    let feeds = db.feed_sources().await.unwrap();
    ingestor(&db).refresh_all(&feeds).await;

    let feed = db.feed_sources().await.unwrap().remove(0);
    assert_eq!(feed.title.as_deref(), Some("My Title"));
}

// ============================================================================
// Conditional requests and failures
// ============================================================================

#[tokio::test]
async fn test_persisted_etag_survives_restart() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .and(header("If-None-Match", "\"v1\""))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"v1\"")
                .set_body_string(rss("F", &[("1", "Body")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let db = test_db().await;
    db.subscribe(&format!("{}/feed.xml", server.uri())).await.unwrap();

    let feeds = db.feed_sources().await.unwrap();
    assert_eq!(ingestor(&db).refresh_all(&feeds).await.total_new(), 1);

    // A fresh ingestor has an empty cache; validators come from the database.
    let feeds = db.feed_sources().await.unwrap();
    let report = ingestor(&db).refresh_all(&feeds).await;
    assert_eq!(report.total_new(), 0);
    assert_eq!(report.failures().count(), 0);
}

#[tokio::test]
async fn test_failing_feed_does_not_cancel_siblings() {
    let server = MockServer::start().await;
    serve(&server, "/good.xml", rss("Good", &[("g1", "Body"), ("g2", "Body")])).await;
    Mock::given(method("GET"))
        .and(path("/bad.xml"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let db = test_db().await;
    let good = db.subscribe(&format!("{}/good.xml", server.uri())).await.unwrap();
    let bad = db.subscribe(&format!("{}/bad.xml", server.uri())).await.unwrap();
    let ingestor = ingestor(&db);

    let feeds = db.feed_sources().await.unwrap();
    let report = ingestor.refresh_all(&feeds).await;
    assert_eq!(report.outcome_for(good).unwrap().result.as_ref().unwrap(), &2);
    assert!(matches!(
        report.outcome_for(bad).unwrap().result,
        Err(RefreshError::HttpStatus(500))
    ));

    // Inside the backoff window the failing feed is not requested again.
    let report = ingestor.refresh_all(&feeds).await;
    let err = report.outcome_for(bad).unwrap().result.as_ref().unwrap_err();
    assert!(err.is_retry_suppressed());
    assert_eq!(report.outcome_for(good).unwrap().result.as_ref().unwrap(), &0);
}

#[tokio::test]
async fn test_muted_feed_is_not_requested() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/muted.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss("M", &[("m", "Body")])))
        .expect(0)
        .mount(&server)
        .await;

    let db = test_db().await;
    let feed_id = db.subscribe(&format!("{}/muted.xml", server.uri())).await.unwrap();
    db.set_feed_muted(feed_id, true).await.unwrap();

    let feeds = db.feed_sources().await.unwrap();
    let report = ingestor(&db).refresh_all(&feeds).await;
    assert!(report.outcomes.is_empty());
    assert!(db.articles_for_feed(feed_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_feed_reports_parse_error() {
    let server = MockServer::start().await;
    serve(&server, "/feed.xml", "<html><body>not a feed</body></html>".to_string()).await;

    let db = test_db().await;
    let feed_id = db.subscribe(&format!("{}/feed.xml", server.uri())).await.unwrap();
    let feeds = db.feed_sources().await.unwrap();
    let report = ingestor(&db).refresh_all(&feeds).await;

    assert!(matches!(
        report.outcome_for(feed_id).unwrap().result,
        Err(RefreshError::Parse(_))
    ));
    // Validators from the failed 200 are not persisted.
    assert_eq!(db.feed_sources().await.unwrap()[0].etag, None);
}
