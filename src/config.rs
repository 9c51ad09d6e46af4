//! Configuration file parser for `kitsune.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fetch: FetchConfig,
    pub readability: ReadabilityConfig,
}

/// HTTP fetching, conditional caching and backoff settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Process-wide cap on in-flight requests.
    pub max_concurrent_requests: usize,
    /// Per-request deadline.
    pub request_timeout_secs: u64,
    /// Response bodies above this size are rejected.
    pub max_body_bytes: usize,
    /// Retry-suppression window after the first server error.
    pub retry_backoff_secs: u64,
    /// Upper bound for the doubling retry-suppression window.
    pub retry_backoff_max_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 6,
            request_timeout_secs: 30,
            max_body_bytes: 10 * 1024 * 1024,
            retry_backoff_secs: 300,
            retry_backoff_max_secs: 3600,
            user_agent: concat!("kitsune/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_max_secs.max(self.retry_backoff_secs))
    }
}

/// Scoring constants for the readability extractor.
///
/// The defaults are tuning choices, not correctness requirements.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadabilityConfig {
    /// Elements with this many visible characters or fewer are never candidates.
    pub min_text_length: usize,
    /// Score added per `<p>` inside a candidate.
    pub paragraph_bonus: f64,
    /// Score removed per `<h1>`..`<h4>` inside a candidate.
    pub heading_penalty: f64,
    /// Floor for the non-link text ratio.
    pub min_link_density: f64,
    pub words_per_minute: u32,
    pub min_word_count: usize,
    pub min_reading_seconds: u32,
}

impl Default for ReadabilityConfig {
    fn default() -> Self {
        Self {
            min_text_length: 80,
            paragraph_bonus: 20.0,
            heading_penalty: 5.0,
            min_link_density: 0.2,
            words_per_minute: 220,
            min_word_count: 6,
            min_reading_seconds: 60,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw);
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            max_concurrent_requests = config.fetch.max_concurrent_requests,
            "Loaded configuration"
        );
        Ok(config)
    }
}

fn warn_unknown_keys(raw: &toml::Table) {
    const SECTIONS: [(&str, &[&str]); 2] = [
        (
            "fetch",
            &[
                "max_concurrent_requests",
                "request_timeout_secs",
                "max_body_bytes",
                "retry_backoff_secs",
                "retry_backoff_max_secs",
                "user_agent",
            ],
        ),
        (
            "readability",
            &[
                "min_text_length",
                "paragraph_bonus",
                "heading_penalty",
                "min_link_density",
                "words_per_minute",
                "min_word_count",
                "min_reading_seconds",
            ],
        ),
    ];

    for (key, value) in raw {
        let Some((_, known)) = SECTIONS.iter().find(|(name, _)| *name == key.as_str()) else {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            continue;
        };
        if let Some(table) = value.as_table() {
            for sub in table.keys() {
                if !known.contains(&sub.as_str()) {
                    tracing::warn!(section = %key, key = %sub, "Unknown key in config file, ignoring");
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
