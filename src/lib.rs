//! Feed ingestion and readable-content extraction for offline reading.

pub mod config;
pub mod content;
pub mod feed;
pub mod storage;
pub mod util;
