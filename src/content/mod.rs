//! Readable-content extraction and HTML sanitization.
//!
//! - [`Readability`] isolates the main content block of a page and derives
//!   word count and reading time.
//! - [`HtmlSanitizer`] reduces arbitrary HTML to a small allow-listed subset.
//!
//! Both are total: any input, including non-HTML, produces a result.

mod dom;
mod readability;
mod sanitizer;

pub use readability::{ExtractionResult, Readability};
pub use sanitizer::HtmlSanitizer;
