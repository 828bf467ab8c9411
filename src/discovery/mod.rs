//! Discovery providers: prompt in, candidate URLs out.
//!
//! - [`DiscoveryClient`] - Async trait the orchestrator depends on
//! - [`ChatSearchClient`] - OpenAI-compatible chat completions provider
//!
//! A provider failure (`Err`) is always distinct from "found nothing"
//! (`Ok(vec![])`); the orchestrator aborts a run on the former only.

mod chat;

pub use chat::{ChatSearchClient, strip_code_fences};

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by discovery providers.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// HTTP client could not be built.
    #[error("failed to build discovery client: {0}")]
    Client(String),

    /// Request never produced a response (connect, timeout, TLS).
    #[error("discovery request failed: {0}")]
    Request(String),

    /// Provider answered with a non-success status.
    #[error("discovery provider returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Response could not be decoded.
    #[error("unexpected discovery response: {0}")]
    UnexpectedFormat(String),
}

/// Source of candidate URLs for a prompt.
///
/// Uses `async_trait` so the orchestrator can hold `Arc<dyn DiscoveryClient>`.
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Returns candidate URL strings in provider order.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when the provider cannot answer.
    async fn search(&self, prompt: &str) -> Result<Vec<String>, DiscoveryError>;
}
