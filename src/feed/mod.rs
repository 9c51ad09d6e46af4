//! Feed ingestion: fetching, conditional caching, parsing and refresh.
//!
//! - [`http`] - transport seam and the process-wide in-flight request cap
//! - [`cache`] - per-URL validators and retry-suppression windows
//! - [`fetcher`] - conditional GET over the limiter and cache
//! - [`parser`] - RSS/Atom into [`ParsedFeed`] via `feed-rs`
//! - [`refresh`] - the per-feed pipeline and concurrent full refresh
//!
//! # Example
//!
//! ```ignore
//! use kitsune::feed::Ingestor;
//!
//! let ingestor = Ingestor::from_config(&config, transport, store);
//! let report = ingestor.refresh_all(&feeds).await;
//! println!("{} new articles", report.total_new());
//! ```

mod cache;
mod fetcher;
mod http;
mod parser;
mod refresh;

pub use cache::{
    format_http_date, parse_http_date, BackoffPolicy, CacheCheck, CacheEntry, ConditionalCache,
    Validators,
};
pub use fetcher::{FeedFetcher, FetchError, FetchResult};
pub use http::{HttpRequest, HttpResponse, RateLimitedFetcher, ReqwestTransport, Transport};
pub use parser::{FeedParser, ParseError, ParsedArticle, ParsedFeed};
pub use refresh::{
    Ingestor, RefreshError, RefreshOutcome, RefreshProgress, RefreshReport, RefreshStage,
};
