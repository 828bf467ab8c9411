//! Processed content rows.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::FromRow;

use super::StoreError;

/// Most tags kept per record.
pub const MAX_TAGS: usize = 10;

/// Longest tag kept, in characters.
pub const MAX_TAG_CHARS: usize = 64;

/// Earliest publication year accepted.
pub const MIN_NEWS_YEAR: i32 = 1900;

/// Content written when a link completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentRecord {
    /// Document title.
    pub title: Option<String>,
    /// Extracted body text.
    pub content: Option<String>,
    /// Translated body text.
    pub translated_content: Option<String>,
    /// Short labels; normalized on write.
    pub tags: Vec<String>,
    /// ISO 3166 alpha-2 code; normalized on write.
    pub country: Option<String>,
    /// Publication date, `YYYY-MM-DD`; normalized on write.
    pub news_date: Option<String>,
    /// Opaque processor metadata.
    pub metadata: Map<String, Value>,
}

/// Stored processed content for one link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedContent {
    pub id: i64,
    pub link_id: i64,
    pub title: Option<String>,
    pub content: Option<String>,
    pub translated_content: Option<String>,
    pub tags: Vec<String>,
    pub country: Option<String>,
    pub news_date: Option<String>,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, FromRow)]
pub(super) struct ProcessedContentRow {
    id: i64,
    link_id: i64,
    title: Option<String>,
    content: Option<String>,
    translated_content: Option<String>,
    tags: String,
    country: Option<String>,
    news_date: Option<String>,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ProcessedContentRow> for ProcessedContent {
    type Error = StoreError;

    fn try_from(row: ProcessedContentRow) -> Result<Self, Self::Error> {
        let tags = serde_json::from_str(&row.tags).map_err(|e| StoreError::json("tags", &e))?;
        let metadata =
            serde_json::from_str(&row.metadata).map_err(|e| StoreError::json("metadata", &e))?;
        Ok(Self {
            id: row.id,
            link_id: row.link_id,
            title: row.title,
            content: row.content,
            translated_content: row.translated_content,
            tags,
            country: row.country,
            news_date: row.news_date,
            metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Trims, truncates and de-duplicates tags (case-insensitively, first spelling wins),
/// keeping at most [`MAX_TAGS`].
#[must_use]
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut kept: Vec<String> = Vec::new();
    for tag in tags {
        let tag: String = tag.as_ref().trim().chars().take(MAX_TAG_CHARS).collect();
        let tag = tag.trim_end().to_string();
        if tag.is_empty() || kept.iter().any(|seen| seen.eq_ignore_ascii_case(&tag)) {
            continue;
        }
        kept.push(tag);
        if kept.len() == MAX_TAGS {
            break;
        }
    }
    kept
}

/// Uppercased two-letter country code, or `None` if `raw` is not one.
#[must_use]
pub fn normalize_country(raw: &str) -> Option<String> {
    let code = raw.trim();
    (code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()))
        .then(|| code.to_ascii_uppercase())
}

/// Calendar date of `raw` as `YYYY-MM-DD`, or `None` if it is not a real date.
///
/// Accepts a bare date, an RFC 3339 timestamp, or a zone-less
/// `YYYY-MM-DDTHH:MM:SS` timestamp. Years before [`MIN_NEWS_YEAR`] are rejected.
#[must_use]
pub fn normalize_news_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|dt| dt.date())
        })?;
    (date.year() >= MIN_NEWS_YEAR).then(|| date.format("%Y-%m-%d").to_string())
}

impl ContentRecord {
    /// Column values as written: normalized tags/country/date plus JSON text.
    pub(super) fn column_values(
        &self,
    ) -> Result<(String, Option<String>, Option<String>, String), StoreError> {
        let tags = serde_json::to_string(&normalize_tags(&self.tags))
            .map_err(|e| StoreError::json("tags", &e))?;
        let metadata =
            serde_json::to_string(&self.metadata).map_err(|e| StoreError::json("metadata", &e))?;
        Ok((
            tags,
            self.country.as_deref().and_then(normalize_country),
            self.news_date.as_deref().and_then(normalize_news_date),
            metadata,
        ))
    }
}
