//! Link rows and the link status lifecycle.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::StoreError;

/// Processing status of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Registered, not yet processed.
    Pending,
    /// A worker has claimed the link and is calling the content processor.
    Processing,
    /// Processed content was stored.
    Completed,
    /// Every attempt failed.
    Failed,
}

impl LinkStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 4] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
    ];

    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the status ends a processing run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Statuses a link may hold immediately before moving to `self`.
    ///
    /// Nothing moves back to `pending`. A failed link re-enters `processing`
    /// only when an operator re-runs it by id.
    #[must_use]
    pub fn allowed_predecessors(self) -> &'static [LinkStatus] {
        match self {
            Self::Pending => &[],
            Self::Processing => &[Self::Pending, Self::Failed],
            Self::Completed | Self::Failed => &[Self::Processing],
        }
    }

    /// Whether `self -> to` is a permitted transition.
    #[must_use]
    pub fn can_transition_to(self, to: LinkStatus) -> bool {
        to.allowed_predecessors().contains(&self)
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LinkStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(StoreError::InvalidStatus(s.to_string())),
        }
    }
}

/// A tracked, discovered URL.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Link {
    /// Store-assigned identifier.
    pub id: i64,
    /// Canonical URL.
    pub url: String,
    /// URL as returned by discovery.
    pub original_url: String,
    /// SHA-256 hex of `url`.
    pub url_fingerprint: String,
    /// Title cached after successful processing.
    pub title: Option<String>,
    /// When discovery first registered the link.
    pub discovered_at: String,
    /// Task whose run discovered the link.
    pub source_task: Option<String>,
    /// Current status (stored as text, parsed via `status()`).
    #[sqlx(rename = "status")]
    #[serde(rename = "status")]
    pub status_str: String,
    /// Last processing error when failed.
    pub error_message: Option<String>,
    /// When the link reached a terminal status.
    pub processed_at: Option<String>,
    /// When a worker last claimed the link.
    pub last_checked: Option<String>,
    /// Row creation time.
    pub created_at: String,
}

impl Link {
    /// Returns the parsed status enum.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidStatus`] if the stored text is unknown.
    pub fn status(&self) -> Result<LinkStatus, StoreError> {
        self.status_str.parse()
    }
}

/// Input for [`Store::register_link`](super::Store::register_link).
#[derive(Debug, Clone, Copy)]
pub struct NewLink<'a> {
    /// Canonical URL.
    pub url: &'a str,
    /// Raw URL as discovered.
    pub original_url: &'a str,
    /// Fingerprint of `url`.
    pub fingerprint: &'a str,
    /// Discovering task, when known.
    pub source_task: Option<&'a str>,
}

/// A link newly registered by a discovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredLink {
    /// Store-assigned identifier.
    pub id: i64,
    /// Canonical URL.
    pub url: String,
    /// URL as returned by discovery.
    pub original_url: String,
}
