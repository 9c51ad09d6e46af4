use thiserror::Error;
use url::Url;

/// Errors that can occur while validating a feed URL.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a URL string for use as a feed source.
///
/// Only `http` and `https` URLs with a host are accepted. Loopback and
/// private addresses are allowed: self-hosted feeds on a LAN are a normal
/// subscription target for an offline reader.
///
/// # Examples
///
/// ```
/// use kitsune::util::validate_feed_url;
///
/// let url = validate_feed_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// assert!(validate_feed_url("not a url").is_err());
/// ```
pub fn validate_feed_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost),
    }
}

/// Resolves a possibly-relative link against `base`.
///
/// Returns `None` for empty input, unparseable references and anything that
/// does not end up as an http(s) URL.
pub fn resolve_link(base: Option<&Url>, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    let resolved = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };

    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        _ => None,
    }
}

/// Returns true for `javascript:` / `vbscript:` URLs.
///
/// Browsers ignore ASCII whitespace and control characters inside the scheme,
/// so `java\tscript:` is treated the same as `javascript:`.
pub fn is_script_url(href: &str) -> bool {
    let scheme = scheme_prefix(href);
    scheme.starts_with("javascript:") || scheme.starts_with("vbscript:")
}

/// Returns true for inline `data:` URLs, with the same scheme normalization
/// as [`is_script_url`].
pub fn is_data_url(href: &str) -> bool {
    scheme_prefix(href).starts_with("data:")
}

fn scheme_prefix(href: &str) -> String {
    href.chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_ascii_control())
        .take(11)
        .collect::<String>()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(validate_feed_url("https://example.com/feed.xml").is_ok());
        assert!(validate_feed_url("http://news.example.org").is_ok());
        assert!(validate_feed_url("  https://example.com/rss  ").is_ok());
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_feed_url("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_feed_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_unparseable_rejected() {
        assert!(matches!(
            validate_feed_url("example.com/feed"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_local_hosts_accepted() {
        assert!(validate_feed_url("http://127.0.0.1:8080/feed").is_ok());
        assert!(validate_feed_url("http://192.168.1.10/rss.xml").is_ok());
    }

    #[test]
    fn test_resolve_relative_link() {
        let base = Url::parse("https://example.com/blog/feed.xml").unwrap();
        let link = resolve_link(Some(&base), "/posts/1").unwrap();
        assert_eq!(link.as_str(), "https://example.com/posts/1");

        let link = resolve_link(Some(&base), "post-2.html").unwrap();
        assert_eq!(link.as_str(), "https://example.com/blog/post-2.html");
    }

    #[test]
    fn test_resolve_absolute_link_ignores_base() {
        let base = Url::parse("https://example.com/feed").unwrap();
        let link = resolve_link(Some(&base), "https://other.org/a").unwrap();
        assert_eq!(link.host_str(), Some("other.org"));
    }

    #[test]
    fn test_resolve_rejects_non_http() {
        let base = Url::parse("https://example.com/feed").unwrap();
        assert!(resolve_link(Some(&base), "mailto:someone@example.com").is_none());
        assert!(resolve_link(Some(&base), "javascript:alert(1)").is_none());
        assert!(resolve_link(Some(&base), "   ").is_none());
        assert!(resolve_link(None, "/relative/only").is_none());
    }

    #[test]
    fn test_script_urls_detected() {
        assert!(is_script_url("javascript:alert(1)"));
        assert!(is_script_url("  JavaScript:void(0)"));
        assert!(is_script_url("java\tscript:alert(1)"));
        assert!(is_script_url("vbscript:msgbox"));
        assert!(!is_script_url("https://example.com/javascript:"));
        assert!(!is_script_url("/docs/javascript"));
    }

    #[test]
    fn test_data_urls_detected() {
        assert!(is_data_url("data:text/html,<script>alert(1)</script>"));
        assert!(is_data_url(" DATA:image/png;base64,AAAA"));
        assert!(is_data_url("da\nta:text/plain,x"));
        assert!(!is_data_url("https://example.com/data:"));
        assert!(!is_data_url("/data/feed.xml"));
    }
}
