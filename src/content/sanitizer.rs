use scraper::Html;

use super::dom::{render_filtered, Policy};

const POLICY: Policy = Policy {
    tags: &[
        "p", "a", "img", "strong", "em", "ul", "ol", "li", "pre", "code", "blockquote", "span",
        "div",
    ],
    attributes: &["href", "src", "alt", "title", "rel", "target"],
    anchor_target_blank: false,
    drop_empty_images: false,
    skip_noise: false,
};

/// Allow-list HTML sanitizer for feed-supplied and extracted markup.
///
/// Tags outside the allow-list are unwrapped rather than dropped, so their
/// text survives (a `<script>` body comes out as escaped text). Attributes
/// outside the allow-list are removed individually, `javascript:` and
/// `vbscript:` URLs are stripped, `data:` links are dropped and every anchor
/// carries `rel="noopener"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlSanitizer;

impl HtmlSanitizer {
    pub fn new() -> Self {
        Self
    }

    /// Returns the safe subset of `html`. Never fails.
    pub fn sanitize(&self, html: &str) -> String {
        let fragment = Html::parse_fragment(html);
        render_filtered(*fragment.root_element(), &POLICY, None)
    }
}
