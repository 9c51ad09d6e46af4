//! Utility functions shared by the feed and content pipelines.
//!
//! - **URL handling**: feed URL validation, link resolution and script-URL detection
//! - **Text processing**: whitespace normalization, word counts and reading time
//!
//! # Examples
//!
//! ```
//! use kitsune::util::{validate_feed_url, word_count, reading_time_seconds};
//!
//! let url = validate_feed_url("https://example.com/feed.xml").unwrap();
//! assert_eq!(url.scheme(), "https");
//!
//! let words = word_count("a short sentence");
//! assert_eq!(reading_time_seconds(words, 220, 60), 60);
//! ```

mod text;
mod url_validator;

pub use text::{normalize_whitespace, reading_time_seconds, strip_control_chars, word_count};
pub use url_validator::{
    is_data_url, is_script_url, resolve_link, validate_feed_url, UrlValidationError,
};
