//! Read-only helpers over a parsed `scraper` document.
//!
//! Nothing here mutates the tree. Noise is skipped while walking and
//! sanitized output is produced by serializing a filtered copy.

use ego_tree::iter::Edge;
use ego_tree::NodeRef;
use scraper::node::Element;
use scraper::{ElementRef, Node};
use std::fmt::Write;
use url::Url;

use crate::util::{is_data_url, is_script_url, normalize_whitespace, resolve_link};

const NOISE_TAGS: &[&str] = &[
    "nav", "aside", "header", "footer", "script", "noscript", "style", "form",
];
const NOISE_CLASSES: &[&str] = &["advert", "sponsored"];
const NOISE_IDS: &[&str] = &["sidebar"];

/// Elements whose boundaries separate words in extracted text.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption", "figure",
    "h1", "h2", "h3", "h4", "h5", "h6", "hr", "li", "main", "ol", "p", "pre", "section", "table",
    "td", "th", "tr", "ul",
];

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4"];

/// Page chrome that never contributes content: navigation, scripts, ads.
pub fn is_noise(element: &Element) -> bool {
    NOISE_TAGS.contains(&element.name())
        || element.classes().any(|c| NOISE_CLASSES.contains(&c))
        || element.id().is_some_and(|id| NOISE_IDS.contains(&id))
}

fn is_block(element: &Element) -> bool {
    BLOCK_TAGS.contains(&element.name())
}

/// Visible text and structural counts for one subtree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextMetrics {
    /// Whitespace-normalized visible text.
    pub text: String,
    /// Character count of `text`.
    pub text_chars: usize,
    /// Characters of text inside `<a>` elements.
    pub link_chars: usize,
    /// `<p>` elements, the root included.
    pub paragraphs: usize,
    /// `<h1>`..`<h4>` elements, the root included.
    pub headings: usize,
}

/// Walks `root` once, skipping noise subtrees when `skip_noise` is set.
pub fn measure(root: ElementRef<'_>, skip_noise: bool) -> TextMetrics {
    let mut text = String::new();
    let mut link_text = String::new();
    let mut link_depth = 0usize;
    let mut skip_depth = 0usize;
    let mut paragraphs = 0;
    let mut headings = 0;

    for edge in root.traverse() {
        match edge {
            Edge::Open(node) => match node.value() {
                Node::Element(el) => {
                    if skip_depth > 0 {
                        skip_depth += 1;
                        continue;
                    }
                    if skip_noise && is_noise(el) {
                        skip_depth = 1;
                        continue;
                    }
                    match el.name() {
                        "p" => paragraphs += 1,
                        "a" => link_depth += 1,
                        name if HEADING_TAGS.contains(&name) => headings += 1,
                        _ => {}
                    }
                    if is_block(el) {
                        text.push(' ');
                    }
                }
                Node::Text(t) if skip_depth == 0 => {
                    text.push_str(t);
                    if link_depth > 0 {
                        link_text.push_str(t);
                    }
                }
                _ => {}
            },
            Edge::Close(node) => {
                if let Node::Element(el) = node.value() {
                    if skip_depth > 0 {
                        skip_depth -= 1;
                        continue;
                    }
                    if el.name() == "a" {
                        link_depth = link_depth.saturating_sub(1);
                        link_text.push(' ');
                    }
                    if is_block(el) {
                        text.push(' ');
                    }
                }
            }
        }
    }

    let text = normalize_whitespace(&text).into_owned();
    let text_chars = text.chars().count();
    let link_chars = normalize_whitespace(&link_text).chars().count();

    TextMetrics {
        text,
        text_chars,
        link_chars,
        paragraphs,
        headings,
    }
}

/// Normalized visible text of `root`.
pub fn visible_text(root: ElementRef<'_>, skip_noise: bool) -> String {
    measure(root, skip_noise).text
}

/// Every element under (and including) `root` in document order, excluding
/// noise subtrees.
pub fn content_elements(root: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut out = Vec::new();
    let mut skip_depth = 0usize;

    for edge in root.traverse() {
        match edge {
            Edge::Open(node) => {
                let Some(el) = ElementRef::wrap(node) else {
                    continue;
                };
                if skip_depth > 0 {
                    skip_depth += 1;
                } else if is_noise(el.value()) {
                    skip_depth = 1;
                } else {
                    out.push(el);
                }
            }
            Edge::Close(node) => {
                if node.value().is_element() && skip_depth > 0 {
                    skip_depth -= 1;
                }
            }
        }
    }

    out
}

/// Allow-list rules for [`render_filtered`].
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub tags: &'static [&'static str],
    pub attributes: &'static [&'static str],
    /// Add `target="_blank"` to every anchor.
    pub anchor_target_blank: bool,
    /// Drop `<img>` elements whose `src` is missing or empty.
    pub drop_empty_images: bool,
    /// Omit noise subtrees entirely.
    pub skip_noise: bool,
}

enum Action {
    Emit,
    Unwrap,
    Skip,
}

fn action_for(el: &Element, policy: &Policy) -> Action {
    if policy.skip_noise && is_noise(el) {
        return Action::Skip;
    }
    if !policy.tags.contains(&el.name()) {
        return Action::Unwrap;
    }
    if policy.drop_empty_images
        && el.name() == "img"
        && el.attr("src").map_or(true, |src| src.trim().is_empty())
    {
        return Action::Skip;
    }
    Action::Emit
}

/// Serializes `root` keeping only what `policy` allows.
///
/// Disallowed elements are unwrapped (their children are kept), disallowed
/// attributes are dropped one by one, script URLs are removed from `href`
/// and `src`, `data:` URLs are removed from `href`, and every anchor gets
/// `rel="noopener"`. Relative `href`/`src` values are resolved against
/// `base` when one is given. Comments, doctypes and processing
/// instructions are never emitted.
pub fn render_filtered(root: NodeRef<'_, Node>, policy: &Policy, base: Option<&Url>) -> String {
    let mut out = String::new();
    // One entry per open element that was not skipped: whether a close tag is owed.
    let mut open: Vec<bool> = Vec::new();
    let mut skip_depth = 0usize;

    for edge in root.traverse() {
        match edge {
            Edge::Open(node) => match node.value() {
                Node::Element(el) => {
                    if skip_depth > 0 {
                        skip_depth += 1;
                        continue;
                    }
                    match action_for(el, policy) {
                        Action::Skip => skip_depth = 1,
                        Action::Unwrap => open.push(false),
                        Action::Emit => {
                            write_start_tag(&mut out, el, policy, base);
                            open.push(!VOID_TAGS.contains(&el.name()));
                        }
                    }
                }
                Node::Text(t) if skip_depth == 0 => escape_text(&mut out, t),
                _ => {}
            },
            Edge::Close(node) => {
                let Node::Element(el) = node.value() else {
                    continue;
                };
                if skip_depth > 0 {
                    skip_depth -= 1;
                    continue;
                }
                if open.pop() == Some(true) {
                    let _ = write!(out, "</{}>", el.name());
                }
            }
        }
    }

    out
}

fn write_start_tag(out: &mut String, el: &Element, policy: &Policy, base: Option<&Url>) {
    let is_anchor = el.name() == "a";
    out.push('<');
    out.push_str(el.name());

    for (name, value) in el.attrs() {
        if !policy.attributes.contains(&name) {
            continue;
        }
        if is_anchor && (name == "rel" || (name == "target" && policy.anchor_target_blank)) {
            continue;
        }
        if matches!(name, "href" | "src") {
            if is_script_url(value) || (name == "href" && is_data_url(value)) {
                continue;
            }
            let resolved = base.and_then(|b| resolve_link(Some(b), value));
            match resolved {
                Some(url) => write_attr(out, name, url.as_str()),
                None => write_attr(out, name, value),
            }
            continue;
        }
        write_attr(out, name, value);
    }

    if is_anchor {
        write_attr(out, "rel", "noopener");
        if policy.anchor_target_blank {
            write_attr(out, "target", "_blank");
        }
    }
    out.push('>');
}

fn write_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use scraper::Html;

    const LOOSE: Policy = Policy {
        tags: &["p", "a", "img", "div"],
        attributes: &["href", "src", "alt"],
        anchor_target_blank: false,
        drop_empty_images: true,
        skip_noise: true,
    };

    #[test]
    fn test_measure_counts_structure() {
        let doc = Html::parse_fragment(
            "<div><h2>Title</h2><p>First <a href=\"/x\">link</a></p><p>Second</p></div>",
        );
        let metrics = measure(doc.root_element(), true);
        assert_eq!(metrics.text, "Title First link Second");
        assert_eq!(metrics.paragraphs, 2);
        assert_eq!(metrics.headings, 1);
        assert_eq!(metrics.link_chars, 4);
        assert_eq!(metrics.text_chars, metrics.text.chars().count());
    }

    #[test]
    fn test_measure_skips_noise() {
        let doc = Html::parse_fragment(
            "<div><nav>Menu</nav><p>Body</p><div class=\"advert\">Buy</div><div id=\"sidebar\">Side</div></div>",
        );
        assert_eq!(visible_text(doc.root_element(), true), "Body");
        assert_eq!(visible_text(doc.root_element(), false), "Menu Body Buy Side");
    }

    #[test]
    fn test_inline_elements_do_not_split_words() {
        let doc = Html::parse_fragment("<p>foo<b>bar</b> baz</p>");
        assert_eq!(visible_text(doc.root_element(), true), "foobar baz");
    }

    #[test]
    fn test_content_elements_exclude_noise() {
        let doc = Html::parse_fragment("<div><footer><p>f</p></footer><p>kept</p></div>");
        let names: Vec<_> = content_elements(doc.root_element())
            .iter()
            .map(|e| e.value().name().to_string())
            .collect();
        assert_eq!(names, vec!["html", "div", "p"]);
    }

    #[test]
    fn test_render_unwraps_and_filters() {
        let doc = Html::parse_fragment(
            "<div onclick=\"x()\"><section><p>Hi <b>there</b></p></section><img src=\"\"><img src=\"a.png\"></div>",
        );
        let html = render_filtered(*doc.root_element(), &LOOSE, None);
        assert_eq!(html, "<div><p>Hi there</p><img src=\"a.png\"></div>");
    }

    #[test]
    fn test_render_neutralizes_anchors() {
        let doc = Html::parse_fragment(
            "<a href=\"javascript:alert(1)\" rel=\"opener\">x</a><a href=\"/p\">y</a>",
        );
        let base = Url::parse("https://example.com/post").unwrap();
        let html = render_filtered(*doc.root_element(), &LOOSE, Some(&base));
        assert_eq!(
            html,
            "<a rel=\"noopener\">x</a><a href=\"https://example.com/p\" rel=\"noopener\">y</a>"
        );
    }

    #[test]
    fn test_render_escapes_text_and_attributes() {
        let doc = Html::parse_fragment("<p title=\"a&quot;b\">1 &lt; 2 &amp; 3</p>");
        let policy = Policy {
            attributes: &["title"],
            ..LOOSE
        };
        let html = render_filtered(*doc.root_element(), &policy, None);
        assert_eq!(html, "<p title=\"a&quot;b\">1 &lt; 2 &amp; 3</p>");
    }

    #[test]
    fn test_render_drops_comments() {
        let doc = Html::parse_fragment("<p>a<!-- hidden -->b</p>");
        let html = render_filtered(*doc.root_element(), &LOOSE, None);
        assert_eq!(html, "<p>ab</p>");
    }
}
