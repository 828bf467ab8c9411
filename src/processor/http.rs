//! Page fetch processor.
//!
//! Fetches the URL and extracts the `<title>`, visible text, and a
//! publication date from common `<meta>` tags. No translation is performed.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use scraper::{Html, Selector};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use super::{ContentProcessor, META_NEWS_DATE, ProcessedPayload, ProcessorError};
use crate::http_client::build_http_client;

macro_rules! selector {
    ($s:literal) => {
        LazyLock::new(|| Selector::parse($s).expect(concat!("invalid CSS selector: ", $s)))
    };
}

#[allow(clippy::expect_used)]
static TITLE: LazyLock<Selector> = selector!("title");

#[allow(clippy::expect_used)]
static BODY: LazyLock<Selector> = selector!("body");

#[allow(clippy::expect_used)]
static PUBLISHED: LazyLock<Selector> = selector!(
    "meta[property='article:published_time'], meta[name='article:published_time'], \
     meta[itemprop='datePublished'], meta[name='datePublished'], \
     meta[name='pubdate'], meta[name='date']"
);

/// Elements whose text is never rendered.
const INVISIBLE_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

#[allow(clippy::expect_used)]
static WHITESPACE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Processor that downloads the page and extracts text.
#[derive(Debug, Clone)]
pub struct PageFetchProcessor {
    client: Client,
}

impl PageFetchProcessor {
    /// Creates a processor whose requests give up after `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessorError::Fetch`] if the HTTP client cannot be built.
    pub fn new(request_timeout: Duration) -> Result<Self, ProcessorError> {
        let client =
            build_http_client(request_timeout).map_err(|e| ProcessorError::Fetch(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentProcessor for PageFetchProcessor {
    #[instrument(skip(self), fields(url = %url))]
    async fn process(&self, url: &str) -> Result<ProcessedPayload, ProcessorError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProcessorError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProcessorError::Rejected {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| ProcessorError::Fetch(e.to_string()))?;

        let is_html = content_type.is_empty() || content_type.contains("html");
        let page = if is_html {
            ExtractedPage::from_html(&body)
        } else {
            ExtractedPage {
                title: None,
                text: collapse_whitespace(&body),
                published: None,
            }
        };
        let ExtractedPage {
            title,
            text,
            published,
        } = page;

        if title.is_none() && text.is_empty() {
            return Err(ProcessorError::Failed("page has no extractable content".into()));
        }

        let mut metadata = Map::new();
        metadata.insert("status".into(), json!(status.as_u16()));
        metadata.insert("content_type".into(), json!(content_type));
        metadata.insert("final_url".into(), json!(final_url));
        metadata.insert("content_chars".into(), json!(text.chars().count()));
        if let Some(published) = published {
            metadata.insert(META_NEWS_DATE.into(), Value::String(published));
        }

        debug!(title = ?title, chars = text.len(), "page processed");
        Ok(ProcessedPayload {
            title,
            content: Some(text),
            translated_content: None,
            metadata,
        })
    }
}

/// Title, visible text and publication date pulled from one document.
#[derive(Debug)]
struct ExtractedPage {
    title: Option<String>,
    text: String,
    published: Option<String>,
}

impl ExtractedPage {
    fn from_html(html: &str) -> Self {
        let document = Html::parse_document(html);
        Self {
            title: extract_title(&document),
            text: extract_text(&document),
            published: extract_published(&document),
        }
    }
}

fn extract_title(document: &Html) -> Option<String> {
    document
        .select(&TITLE)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|title| !title.is_empty())
}

/// Text nodes under `<body>` outside [`INVISIBLE_ELEMENTS`]. Comments are not text nodes.
fn extract_text(document: &Html) -> String {
    let root = document
        .select(&BODY)
        .next()
        .unwrap_or_else(|| document.root_element());
    let visible: Vec<&str> = root
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|el| INVISIBLE_ELEMENTS.contains(&el.name()))
            });
            (!hidden).then_some(&**text)
        })
        .collect();
    collapse_whitespace(&visible.join(" "))
}

fn extract_published(document: &Html) -> Option<String> {
    document
        .select(&PUBLISHED)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_PATTERN.replace_all(text.trim(), " ").into_owned()
}
