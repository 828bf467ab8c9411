//! Content processors: URL in, structured content out.
//!
//! - [`ContentProcessor`] - Async trait the processing engine calls once per attempt
//! - [`ProcessedPayload`] - Success payload
//! - [`PageFetchProcessor`] - HTTP fetch with title and text extraction
//!
//! Processors perform a single attempt. Timeouts, retries, rate limiting and
//! concurrency all belong to the engine.

mod http;

pub use http::PageFetchProcessor;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::store::{ContentRecord, normalize_country, normalize_news_date};

/// Metadata key lifted into [`ContentRecord::tags`].
pub const META_TAGS: &str = "tags";
/// Metadata key lifted into [`ContentRecord::country`].
pub const META_COUNTRY: &str = "country";
/// Metadata key lifted into [`ContentRecord::news_date`].
pub const META_NEWS_DATE: &str = "news_date";

/// Why a single processing attempt failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessorError {
    /// Processor ran but reported no usable result.
    #[error("processing failed: {0}")]
    Failed(String),

    /// Network-level failure reaching the URL.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The page answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// The attempt exceeded the engine's processing timeout.
    #[error("processing timed out after {millis}ms")]
    Timeout {
        /// Configured timeout in milliseconds.
        millis: u64,
    },

    /// The processor panicked.
    #[error("processor panicked: {0}")]
    Panicked(String),
}

/// Successful processing output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedPayload {
    pub title: Option<String>,
    pub content: Option<String>,
    pub translated_content: Option<String>,
    /// Free-form metadata. `tags`, `country` and `news_date` keys are
    /// promoted to columns by [`into_record`](Self::into_record).
    pub metadata: Map<String, Value>,
}

impl ProcessedPayload {
    /// Converts to the stored record, moving the well-known metadata keys into columns.
    ///
    /// `tags` may be a JSON array of strings or a comma-separated string.
    /// `country` and `news_date` move only when they normalize; otherwise the
    /// raw value is kept in `metadata`.
    #[must_use]
    pub fn into_record(mut self) -> ContentRecord {
        let tags = match self.metadata.remove(META_TAGS) {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(tag) => Some(tag),
                    _ => None,
                })
                .collect(),
            Some(Value::String(joined)) => joined.split(',').map(str::to_string).collect(),
            Some(other) => {
                self.metadata.insert(META_TAGS.to_string(), other);
                Vec::new()
            }
            None => Vec::new(),
        };
        let country = lift_normalized(&mut self.metadata, META_COUNTRY, normalize_country);
        let news_date = lift_normalized(&mut self.metadata, META_NEWS_DATE, normalize_news_date);

        ContentRecord {
            title: self.title,
            content: self.content,
            translated_content: self.translated_content,
            tags,
            country,
            news_date,
            metadata: self.metadata,
        }
    }
}

/// Removes `key` from `metadata` only when it is a string `normalize` accepts.
/// Rejected values stay in `metadata` as written.
fn lift_normalized(
    metadata: &mut Map<String, Value>,
    key: &str,
    normalize: fn(&str) -> Option<String>,
) -> Option<String> {
    let normalized = metadata.get(key).and_then(Value::as_str).and_then(normalize)?;
    metadata.remove(key);
    Some(normalized)
}

/// Turns a URL into structured content.
///
/// Uses `async_trait` so the engine can hold `Arc<dyn ContentProcessor>`.
#[async_trait]
pub trait ContentProcessor: Send + Sync {
    /// Processes one URL in a single attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError`] when the attempt yields no usable result.
    async fn process(&self, url: &str) -> Result<ProcessedPayload, ProcessorError>;
}
