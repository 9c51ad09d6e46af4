use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed, FeedType, Link};
use feed_rs::parser::{Builder, ParseErrorKind, ParseFeedError};
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::util::{resolve_link, strip_control_chars};

const UNTITLED_FEED: &str = "Untitled Feed";
const UNTITLED_ARTICLE: &str = "Untitled";

#[derive(Debug, Error)]
pub enum ParseError {
    /// Well-formed input in a format other than RSS or Atom (e.g. JSON Feed)
    #[error("Unsupported feed format: {0}")]
    UnsupportedFormat(String),
    /// Input is not parseable XML
    #[error("Malformed feed: {0}")]
    MalformedFeed(String),
}

/// One feed entry in canonical form. Lives for a single ingest pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedArticle {
    pub guid: String,
    pub title: String,
    pub author: Option<String>,
    /// Always absolute when present.
    pub link: Option<Url>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    /// Entry-embedded HTML or text.
    pub raw_content: Option<String>,
    pub language_code: Option<String>,
}

impl ParsedArticle {
    /// Embedded HTML to run through extraction, preferring full content over the summary.
    pub fn extractable_html(&self) -> Option<&str> {
        self.raw_content
            .as_deref()
            .or(self.summary.as_deref())
            .filter(|html| !html.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    pub title: String,
    pub site_url: Option<Url>,
    /// Entries in document order.
    pub articles: Vec<ParsedArticle>,
}

/// Tolerant RSS 2.0 / Atom decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedParser;

impl FeedParser {
    pub fn new() -> Self {
        Self
    }

    /// Parses `bytes` fetched from `source_url` into a [`ParsedFeed`].
    ///
    /// Entries are never dropped: missing titles get a placeholder and missing
    /// ids fall back to the entry link, then to a random UUID. Guids are unique
    /// within the result; the n-th repeat of a guid becomes `guid#n`, so the
    /// same document always yields the same guids.
    pub fn parse(&self, bytes: &[u8], source_url: &Url) -> Result<ParsedFeed, ParseError> {
        if looks_like_json(bytes) {
            return Err(ParseError::UnsupportedFormat("JSON Feed".to_string()));
        }

        // Empty ids are kept so the entry link is tried before any synthetic id.
        let parser = Builder::new()
            .id_generator(|_links, _title, _uri| String::new())
            .sanitize_content(false)
            .build();

        let feed = parser
            .parse(bytes)
            .map_err(|e| classify_error(e, bytes))?;

        if feed.feed_type == FeedType::JSON {
            return Err(ParseError::UnsupportedFormat("JSON Feed".to_string()));
        }

        Ok(self.to_canonical(feed, source_url))
    }

    fn to_canonical(&self, feed: Feed, source_url: &Url) -> ParsedFeed {
        let site_url = site_link(&feed.links).and_then(|href| resolve_link(Some(source_url), href));

        let title = feed
            .title
            .as_ref()
            .map(|t| clean_text(&t.content))
            .filter(|t| !t.is_empty())
            .or_else(|| site_url.as_ref().and_then(|u| u.host_str()).map(str::to_string))
            .or_else(|| source_url.host_str().map(str::to_string))
            .unwrap_or_else(|| UNTITLED_FEED.to_string());

        let feed_language = feed.language.clone();
        let mut seen = HashSet::new();

        let articles = feed
            .entries
            .into_iter()
            .map(|entry| {
                let mut article = map_entry(entry, source_url, feed_language.as_deref());
                if !seen.insert(article.guid.clone()) {
                    let replacement = (2..)
                        .map(|n| format!("{}#{n}", article.guid))
                        .find(|candidate| !seen.contains(candidate))
                        .unwrap_or_default();
                    tracing::warn!(
                        feed = %source_url,
                        guid = %article.guid,
                        replacement = %replacement,
                        "Duplicate entry guid in feed"
                    );
                    article.guid = replacement;
                    seen.insert(article.guid.clone());
                }
                article
            })
            .collect();

        ParsedFeed {
            title,
            site_url,
            articles,
        }
    }
}

fn map_entry(entry: Entry, source_url: &Url, feed_language: Option<&str>) -> ParsedArticle {
    let link = entry
        .links
        .iter()
        .find_map(|l| resolve_link(Some(source_url), &l.href));

    let guid = Some(entry.id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| link.as_ref().map(|u| u.to_string()))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let title = entry
        .title
        .as_ref()
        .map(|t| clean_text(&t.content))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED_ARTICLE.to_string());

    let author = entry
        .authors
        .first()
        .map(|p| clean_text(&p.name))
        .filter(|name| !name.is_empty());

    let summary = entry
        .summary
        .map(|s| s.content)
        .filter(|s| !s.trim().is_empty());
    let raw_content = entry
        .content
        .and_then(|c| c.body)
        .filter(|s| !s.trim().is_empty());

    let language_code = entry
        .language
        .or_else(|| feed_language.map(str::to_string))
        .filter(|l| !l.trim().is_empty());

    ParsedArticle {
        guid,
        title,
        author,
        link,
        published_at: entry.published.or(entry.updated),
        updated_at: entry.updated,
        summary,
        raw_content,
        language_code,
    }
}

/// The site link: the `alternate` (or rel-less) link when present, else the first.
fn site_link(links: &[Link]) -> Option<&str> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.as_str())
}

fn clean_text(s: &str) -> String {
    strip_control_chars(s).trim().to_string()
}

fn looks_like_json(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace() && **b != 0xEF && **b != 0xBB && **b != 0xBF)
        .is_some_and(|b| *b == b'{' || *b == b'[')
}

fn classify_error(err: ParseFeedError, bytes: &[u8]) -> ParseError {
    match err {
        // Markup that parsed but had no rss/feed/RDF root
        ParseFeedError::ParseError(ParseErrorKind::NoFeedRoot) if bytes.contains(&b'<') => {
            ParseError::UnsupportedFormat("document root is not RSS or Atom".to_string())
        }
        ParseFeedError::ParseError(ParseErrorKind::UnknownMimeType(mime)) => {
            ParseError::UnsupportedFormat(mime)
        }
        ParseFeedError::JsonSerde(_) | ParseFeedError::JsonUnsupportedVersion(_) => {
            ParseError::UnsupportedFormat("JSON Feed".to_string())
        }
        other => ParseError::MalformedFeed(other.to_string()),
    }
}
