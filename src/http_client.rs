//! Shared HTTP client construction for discovery and page fetching.
//!
//! Single source for the User-Agent format and timeout policy so both kinds
//! of outbound traffic identify the same way.

use std::time::Duration;

use reqwest::Client;

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/harvester";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default User-Agent for all outbound requests.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("harvester/{version} (news-harvester; +{PROJECT_UA_URL})")
}

/// Builds a client with the shared User-Agent, gzip, and the given total request timeout.
///
/// # Errors
///
/// Returns [`reqwest::Error`] if the TLS backend cannot be initialized.
pub fn build_http_client(request_timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(default_user_agent())
        .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
        .timeout(request_timeout)
        .gzip(true)
        .build()
}
