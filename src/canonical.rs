//! URL canonicalization, validation and fingerprinting.
//!
//! Every discovered URL passes through this module before it reaches the
//! store. Two URLs that differ only in tracking parameters, fragment, a
//! `www.` prefix, letter case of scheme/host, or a trailing slash collapse
//! to the same canonical string and therefore the same fingerprint.
//!
//! # Example
//!
//! ```
//! use harvester_core::canonical::{fingerprint, normalize};
//!
//! let canonical = normalize("HTTP://WWW.Example.com/Path/?utm_source=x&id=7#frag").unwrap();
//! assert_eq!(canonical, "http://example.com/Path?id=7");
//! assert_eq!(fingerprint(&canonical).len(), 64);
//! ```

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Query keys removed during normalization (exact, case-sensitive match).
pub const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "msclkid",
    "mc_cid",
    "mc_eid",
    "_ga",
    "_gl",
    "ref",
    "source",
];

const WWW_PREFIX: &str = "www.";

/// Reasons a raw URL cannot be canonicalized.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CanonicalError {
    /// Input was empty or whitespace.
    #[error("empty URL")]
    Empty,

    /// Input is not an absolute URL.
    #[error("malformed URL '{url}': {source}")]
    Parse {
        /// The trimmed input.
        url: String,
        /// Underlying parser error.
        #[source]
        source: url::ParseError,
    },

    /// Input parsed but carries no host to route on.
    #[error("URL has no host: {url}")]
    MissingHost {
        /// The trimmed input.
        url: String,
    },
}

/// One raw URL after a full canonicalization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonicalized {
    /// The input exactly as discovered, trimmed.
    pub original: String,
    /// Normalized form used for equality.
    pub canonical: String,
    /// SHA-256 hex of `canonical`.
    pub fingerprint: String,
}

impl Canonicalized {
    /// Normalizes and fingerprints `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`CanonicalError`] when `raw` cannot be normalized.
    pub fn from_raw(raw: &str) -> Result<Self, CanonicalError> {
        let canonical = normalize(raw)?;
        Ok(Self {
            original: raw.trim().to_string(),
            fingerprint: fingerprint(&canonical),
            canonical,
        })
    }
}

/// Produces the canonical form of `raw`.
///
/// Lowercases scheme and host, strips a leading `www.`, removes the fragment
/// and [`TRACKING_PARAMS`], keeps the remaining query pairs in their original
/// order and encoding, and strips one trailing slash from a non-root path.
///
/// # Errors
///
/// Returns [`CanonicalError`] for empty input, relative or unparseable URLs,
/// and URLs without a host.
pub fn normalize(raw: &str) -> Result<String, CanonicalError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CanonicalError::Empty);
    }

    let mut url = Url::parse(trimmed).map_err(|source| CanonicalError::Parse {
        url: trimmed.to_string(),
        source,
    })?;

    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| CanonicalError::MissingHost {
            url: trimmed.to_string(),
        })?;
    let host = strip_www(&host);
    if host.is_empty() {
        return Err(CanonicalError::MissingHost {
            url: trimmed.to_string(),
        });
    }
    if url.host_str() != Some(host) {
        url.set_host(Some(host))
            .map_err(|source| CanonicalError::Parse {
                url: trimmed.to_string(),
                source,
            })?;
    }

    url.set_fragment(None);

    let kept_query = url.query().map(|query| {
        query
            .split('&')
            .filter(|pair| !pair.is_empty() && !is_tracking_pair(pair))
            .collect::<Vec<_>>()
            .join("&")
    });
    match kept_query {
        Some(query) if !query.is_empty() => url.set_query(Some(&query)),
        _ => url.set_query(None),
    }

    let stripped_path = Some(url.path())
        .filter(|path| path.len() > 1)
        .and_then(|path| path.strip_suffix('/'))
        .map(str::to_string);
    if let Some(path) = stripped_path {
        url.set_path(&path);
    }

    Ok(url.to_string())
}

/// Returns `true` iff `raw` parses with a non-empty scheme and host.
#[must_use]
pub fn validate(raw: &str) -> bool {
    Url::parse(raw.trim()).is_ok_and(|url| {
        !url.scheme().is_empty() && url.host_str().is_some_and(|host| !host.is_empty())
    })
}

/// 64-character lowercase hex SHA-256 of the canonical URL.
#[must_use]
pub fn fingerprint(canonical: &str) -> String {
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

/// Routing domain: lowercase host minus a leading `www.`, or `""` without a host.
#[must_use]
pub fn domain_of(url: &str) -> String {
    Url::parse(url.trim())
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_ascii_lowercase))
        .map(|host| strip_www(&host).to_string())
        .unwrap_or_default()
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix(WWW_PREFIX).unwrap_or(host)
}

fn is_tracking_pair(pair: &str) -> bool {
    let key = pair.split_once('=').map_or(pair, |(key, _)| key);
    TRACKING_PARAMS.contains(&key)
}
