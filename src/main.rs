use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use kitsune::config::Config;
use kitsune::content::{HtmlSanitizer, Readability};
use kitsune::feed::{Ingestor, RefreshProgress, ReqwestTransport};
use kitsune::storage::{Database, StoreError};
use kitsune::util::validate_feed_url;

/// Get the config directory path (~/.config/kitsune/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("kitsune"))
}

#[derive(Parser, Debug)]
#[command(name = "kitsune", about = "Feed ingestion and readable-content extraction")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to feeds and refresh every subscription
    Refresh {
        /// SQLite database path (default: ~/.config/kitsune/kitsune.db)
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,

        /// Config file path (default: ~/.config/kitsune/config.toml)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Feed URLs to subscribe before refreshing
        #[arg(value_name = "URL")]
        urls: Vec<String>,
    },

    /// Extract readable content from a local HTML file and print it as JSON
    Extract {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Base URL for resolving relative links
        #[arg(long, value_name = "URL")]
        base_url: Option<String>,

        /// Config file path (default: ~/.config/kitsune/config.toml)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Print the sanitized form of a local HTML file
    Sanitize {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Args::parse().command {
        Command::Refresh { db, config, urls } => refresh(db, config, urls).await,
        Command::Extract {
            file,
            base_url,
            config,
        } => extract(&file, base_url.as_deref(), config),
        Command::Sanitize { file } => {
            let html = read_html(&file)?;
            println!("{}", HtmlSanitizer::new().sanitize(&html));
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let path = match path {
        Some(path) => path,
        None => get_config_dir()?.join("config.toml"),
    };
    Config::load(&path).with_context(|| format!("Failed to load config '{}'", path.display()))
}

fn read_html(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read '{}': check file permissions", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn refresh(db_path: Option<PathBuf>, config: Option<PathBuf>, urls: Vec<String>) -> Result<()> {
    let config = load_config(config)?;

    let db_path = match db_path {
        Some(path) => path,
        None => {
            let dir = get_config_dir()?;
            std::fs::create_dir_all(&dir).context("Failed to create config directory")?;
            dir.join("kitsune.db")
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;

    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(StoreError::InstanceLocked) => {
            eprintln!("Error: Another instance of kitsune appears to be running. Please close it and try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    for url in &urls {
        let url = validate_feed_url(url).with_context(|| format!("Invalid feed URL '{url}'"))?;
        db.subscribe(url.as_str())
            .await
            .with_context(|| format!("Failed to subscribe to '{url}'"))?;
    }

    let feeds = db.feed_sources().await.context("Failed to load feeds")?;
    if feeds.is_empty() {
        eprintln!("No feeds to refresh. Pass one or more feed URLs:");
        eprintln!("  kitsune refresh https://example.com/feed.xml");
        return Ok(());
    }

    let transport = ReqwestTransport::from_config(&config.fetch)
        .context("Failed to build HTTP client")?;
    let (progress_tx, mut progress_rx) = mpsc::channel::<RefreshProgress>(32);
    let ingestor = Ingestor::from_config(&config, Arc::new(transport), Arc::new(db.clone()))
        .with_progress(progress_tx);

    let progress = tokio::spawn(async move {
        while let Some(RefreshProgress { completed, total }) = progress_rx.recv().await {
            tracing::debug!(completed, total, "Refresh progress");
        }
    });

    let report = ingestor.refresh_all(&feeds).await;
    drop(ingestor);
    finish_reporter(progress).await;

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(new) => println!("{:>4} new  {}", new, outcome.url),
            Err(e) => {
                println!("  ERR  {}  ({:?}: {})", outcome.url, e.stage(), e);
                if let Err(store_err) = db.set_feed_error(outcome.feed_id, Some(&e.to_string())).await {
                    tracing::warn!(feed = %outcome.url, error = %store_err, "Failed to record feed error");
                }
            }
        }
    }
    println!(
        "{} new articles from {} feeds ({} failed)",
        report.total_new(),
        report.outcomes.len(),
        report.failures().count()
    );
    Ok(())
}

/// Waits for the progress reporter; returns false if it panicked or was cancelled.
async fn finish_reporter(handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Progress reporter task failed");
            false
        }
    }
}

fn extract(path: &Path, base_url: Option<&str>, config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config)?;
    let base = base_url
        .map(validate_feed_url)
        .transpose()
        .context("Invalid base URL")?;

    let html = read_html(path)?;
    let result = Readability::new(config.readability).extract(&html, base.as_ref());
    let json = serde_json::to_string_pretty(&result).context("Failed to serialize extraction")?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_finish_reporter_drains_channel() {
        let (tx, mut rx) = mpsc::channel::<RefreshProgress>(4);
        let handle = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        tx.send(RefreshProgress { completed: 1, total: 1 }).await.unwrap();
        drop(tx);

        assert!(finish_reporter(handle).await);
    }

    #[tokio::test]
    async fn test_finish_reporter_survives_panicked_task() {
        let handle = tokio::spawn(async { panic!("reporter crashed") });
        assert!(!finish_reporter(handle).await);
    }
}
