//! Heuristic main-content extraction.
//!
//! Every non-noise element is scored by how much non-link text it holds,
//! with a bonus per paragraph and a penalty per heading. The best-scoring
//! element is rendered through an allow-list and measured for word count and
//! reading time.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use super::dom::{content_elements, measure, render_filtered, visible_text, Policy};
use crate::config::ReadabilityConfig;
use crate::util::{reading_time_seconds, strip_control_chars, word_count};

const UNTITLED: &str = "Untitled";

const POLICY: Policy = Policy {
    tags: &[
        "article", "section", "div", "p", "h1", "h2", "h3", "h4", "ul", "ol", "li", "strong", "em",
        "code", "pre", "blockquote", "img", "figure", "figcaption", "a", "span",
    ],
    attributes: &["href", "src", "alt", "title", "rel"],
    anchor_target_blank: true,
    drop_empty_images: true,
    skip_noise: true,
};

/// Readable content extracted from one HTML document. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub title: String,
    pub byline: Option<String>,
    /// Sanitized HTML of the best candidate block.
    pub html: String,
    pub plain_text: String,
    /// Always at least 1.
    pub word_count: usize,
    /// Always at least 60.
    pub reading_time_seconds: u32,
    /// Set when the fallback path produced this result.
    #[serde(default)]
    pub degraded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Readability {
    config: ReadabilityConfig,
}

impl Readability {
    pub fn new(config: ReadabilityConfig) -> Self {
        Self { config }
    }

    /// Extracts the main content of `html`. Never fails.
    ///
    /// `base_url` resolves relative links and image sources in the output.
    pub fn extract(&self, html: &str, base_url: Option<&Url>) -> ExtractionResult {
        let document = Html::parse_document(html);
        let title = document_title(&document);

        match self.extract_from(&document, title.clone(), base_url) {
            Some(result) => result,
            None => {
                tracing::warn!(
                    base_url = base_url.map(Url::as_str).unwrap_or(""),
                    "Readability fell back to raw text"
                );
                self.fallback(html, title)
            }
        }
    }

    fn extract_from(
        &self,
        document: &Html,
        title: Option<String>,
        base_url: Option<&Url>,
    ) -> Option<ExtractionResult> {
        let body = find_body(document)?;
        let body_text = visible_text(body, true);

        let best = self.best_candidate(body);
        let html = render_filtered(*best, &POLICY, base_url);
        let sanitized_text = visible_text(best, true);

        let plain_text = [sanitized_text.as_str(), body_text.as_str()]
            .into_iter()
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let word_count = word_count(&plain_text).max(self.config.min_word_count.max(1));
        let reading_time_seconds = reading_time_seconds(
            word_count,
            self.config.words_per_minute,
            self.config.min_reading_seconds.max(60),
        );

        Some(ExtractionResult {
            title: title.unwrap_or_else(|| UNTITLED.to_string()),
            byline: find_byline(document),
            html,
            plain_text,
            word_count,
            reading_time_seconds,
            degraded: false,
        })
    }

    /// Highest-scoring element under `body`; `body` itself when nothing scores above zero.
    ///
    /// Ties keep the earlier element in document order.
    fn best_candidate<'a>(&self, body: ElementRef<'a>) -> ElementRef<'a> {
        let mut best = body;
        let mut best_score = 0.0;

        for candidate in content_elements(body) {
            let score = self.score(candidate);
            if score > best_score {
                best_score = score;
                best = candidate;
            }
        }

        best
    }

    fn score(&self, element: ElementRef<'_>) -> f64 {
        let metrics = measure(element, true);
        if metrics.text_chars <= self.config.min_text_length {
            return 0.0;
        }

        let text_len = metrics.text_chars as f64;
        let link_len = metrics.link_chars as f64;
        let density = ((text_len - link_len) / text_len.max(1.0)).max(self.config.min_link_density);

        text_len * density + self.config.paragraph_bonus * metrics.paragraphs as f64
            - self.config.heading_penalty * metrics.headings as f64
    }

    fn fallback(&self, html: &str, title: Option<String>) -> ExtractionResult {
        let text = html.trim().to_string();
        ExtractionResult {
            title: title.unwrap_or_else(|| UNTITLED.to_string()),
            byline: None,
            html: html.to_string(),
            word_count: (text.chars().count() / 4).max(1),
            plain_text: text,
            reading_time_seconds: 60,
            degraded: true,
        }
    }
}

fn find_body(document: &Html) -> Option<ElementRef<'_>> {
    let selector = Selector::parse("body").ok()?;
    document.select(&selector).next()
}

fn document_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let title = document.select(&selector).next()?;
    let text: String = title.text().collect();
    let text = strip_control_chars(text.trim()).into_owned();
    (!text.is_empty()).then_some(text)
}

/// First non-empty `[rel=author]` or `.byline` element outside page chrome.
fn find_byline(document: &Html) -> Option<String> {
    content_elements(document.root_element())
        .into_iter()
        .filter(|el| {
            el.value().attr("rel").is_some_and(|rel| rel.eq_ignore_ascii_case("author"))
                || el.value().classes().any(|c| c == "byline")
        })
        .map(|el| visible_text(el, true))
        .find(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn article_page() -> String {
        let paragraph = "This paragraph carries the actual article body with enough words to score well. ";
        format!(
            r#"<!DOCTYPE html>
<html>
<head><title> Sample Article </title></head>
<body>
  <header><h1>Site name</h1><nav><a href="/">Home</a><a href="/about">About</a></nav></header>
  <div id="sidebar"><p>{side}</p></div>
  <article>
    <h1>Headline</h1>
    <span class="byline">By Jane Doe</span>
    <p>{p}{p}</p>
    <p>{p}<a href="/more" onclick="steal()">read more</a></p>
    <img src="">
    <img src="/img/photo.jpg" class="hero">
    <script>var tracking = 1;</script>
  </article>
  <footer><p>Copyright</p></footer>
</body>
</html>"#,
            p = paragraph,
            side = paragraph.repeat(3)
        )
    }

    #[test]
    fn test_picks_article_block() {
        let base = Url::parse("https://example.com/posts/1").unwrap();
        let result = Readability::default().extract(&article_page(), Some(&base));

        assert_eq!(result.title, "Sample Article");
        assert_eq!(result.byline.as_deref(), Some("By Jane Doe"));
        assert!(result.html.trim_start().starts_with("<article>"));
        assert!(result.html.contains("Headline"));
        assert!(!result.html.contains("Site name"));
        assert!(!result.html.contains("Copyright"));
        assert!(!result.html.contains("tracking"));
        assert!(!result.html.contains("onclick"));
        assert!(!result.html.contains("class="));
        assert!(!result.degraded);
    }

    #[test]
    fn test_anchors_and_images_rewritten() {
        let base = Url::parse("https://example.com/posts/1").unwrap();
        let result = Readability::default().extract(&article_page(), Some(&base));

        assert!(result
            .html
            .contains(r#"<a href="https://example.com/more" rel="noopener" target="_blank">read more</a>"#));
        assert!(result.html.contains(r#"<img src="https://example.com/img/photo.jpg">"#));
        assert!(!result.html.contains(r#"src="""#));
    }

    #[test]
    fn test_plain_text_joins_candidate_and_body() {
        let result = Readability::default().extract(&article_page(), None);
        assert!(result.plain_text.starts_with("Headline By Jane Doe"));
        // Body text follows the candidate text, still without chrome
        assert!(result.plain_text.matches("Headline").count() == 2);
        assert!(!result.plain_text.contains("Copyright"));
    }

    #[test]
    fn test_metrics_follow_word_count() {
        let words = "word ".repeat(1000);
        let html = format!("<html><body><p>{words}</p></body></html>");
        let result = Readability::default().extract(&html, None);

        // Candidate text and body text are both counted
        assert_eq!(result.word_count, 2000);
        assert_eq!(result.reading_time_seconds, 545);
    }

    #[test]
    fn test_short_page_uses_body_and_floors() {
        let result = Readability::default().extract("<p>Hi</p>", None);
        assert_eq!(result.title, UNTITLED);
        assert_eq!(result.html, "<p>Hi</p>");
        assert_eq!(result.word_count, 6);
        assert_eq!(result.reading_time_seconds, 60);
        assert_eq!(result.byline, None);
    }

    #[test]
    fn test_javascript_href_stripped() {
        let html = r#"<body><a href="javascript:alert(1)">x</a></body>"#;
        let result = Readability::default().extract(html, None);
        assert!(!result.html.contains("javascript"));
        assert!(result.html.contains(r#"rel="noopener""#));
    }

    #[test]
    fn test_link_heavy_block_loses_to_prose() {
        let links = r#"<a href="/1">A link with a fairly long descriptive label</a> "#.repeat(6);
        let prose = "Plain sentence with real content in it, nothing linked. ".repeat(3);
        let html = format!(
            r#"<body><div id="links"><h3></h3><h3></h3><h3></h3><h3></h3>{links}</div><div id="prose"><p>{prose}</p></div></body>"#
        );
        let result = Readability::default().extract(&html, None);
        assert_eq!(result.html, format!("<div><p>{}</p></div>", prose));
    }

    #[test]
    fn test_config_thresholds_apply() {
        let config = ReadabilityConfig {
            min_word_count: 1,
            ..ReadabilityConfig::default()
        };
        let result = Readability::new(config).extract("<p>Hi</p>", None);
        assert_eq!(result.word_count, 2);
    }

    #[test]
    fn test_fallback_shape() {
        let result = Readability::default().fallback("  some raw text  ", None);
        assert!(result.degraded);
        assert_eq!(result.plain_text, "some raw text");
        assert_eq!(result.word_count, 3);
        assert_eq!(result.reading_time_seconds, 60);

        let empty = Readability::default().fallback("", None);
        assert_eq!(empty.word_count, 1);
    }

    proptest! {
        #[test]
        fn prop_extract_is_total(html in ".{0,400}") {
            let result = Readability::default().extract(&html, None);
            prop_assert!(result.word_count >= 1);
            prop_assert!(result.reading_time_seconds >= 60);
        }

        #[test]
        fn prop_extract_tag_soup(parts in proptest::collection::vec(
            prop_oneof![
                Just("<div>"), Just("</div>"), Just("<p>"), Just("</p>"), Just("<a href='/x'>"),
                Just("</a>"), Just("<nav>"), Just("<script>"), Just("text "), Just("<h2>"),
                Just("<img src=''>"), Just("&amp;"), Just("<!--"), Just("-->"),
            ],
            0..80,
        )) {
            let html = parts.concat();
            let result = Readability::default().extract(&html, None);
            prop_assert!(result.word_count >= 6);
            prop_assert!(result.reading_time_seconds >= 60);
            prop_assert!(!result.html.contains("<script"));
        }
    }
}
