//! Error types for state store operations.

use std::fmt;

use thiserror::Error;

use super::LinkStatus;

/// Structured classification for store/database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/foreign-key/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Expected row was not found.
    RowNotFound,
    /// Filesystem or transport IO failure.
    Io,
    /// Stored JSON column could not be decoded.
    Decode,
    /// Unclassified database failure.
    Other,
}

impl StoreDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => Self::Decode,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }

    /// Whether this failure means the store itself is unreachable, not just one row.
    #[must_use]
    pub fn is_connectivity(self) -> bool {
        matches!(self, Self::PoolClosed | Self::PoolTimeout | Self::Io)
    }
}

impl fmt::Display for StoreDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::RowNotFound => "row_not_found",
            Self::Io => "io",
            Self::Decode => "decode",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> StoreDbErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return StoreDbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_foreign_key_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return StoreDbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked") || message.contains("database is busy") {
        return StoreDbErrorKind::BusyOrLocked;
    }

    StoreDbErrorKind::Other
}

/// Errors that can occur during store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Typed classification used by callers deciding abort vs. continue.
        kind: StoreDbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// No link with this id.
    #[error("link not found: id {0}\n  Suggestion: Check the id with `harvester stats` or `harvester show`")]
    LinkNotFound(i64),

    /// Status change not permitted from the link's current status.
    #[error("invalid status transition for link {id}: {from} -> {to}")]
    InvalidTransition {
        /// Link id.
        id: i64,
        /// Status the link currently has.
        from: LinkStatus,
        /// Requested status.
        to: LinkStatus,
    },

    /// Stored status text is not a known status.
    #[error(
        "invalid status '{0}'\n  Suggestion: Use one of: pending, processing, completed, failed"
    )]
    InvalidStatus(String),

    /// No task with this name.
    #[error("task not found: {0}\n  Suggestion: List tasks with `harvester task list --all`")]
    TaskNotFound(String),

    /// A task with this name already exists.
    #[error("task already exists: {0}")]
    DuplicateTask(String),

    /// JSON column could not be encoded or decoded.
    #[error("invalid JSON in column {column}: {message}")]
    Json {
        /// Column name.
        column: &'static str,
        /// Serializer error text.
        message: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: StoreDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl StoreError {
    pub(crate) fn json(column: &'static str, err: &serde_json::Error) -> Self {
        Self::Json {
            column,
            message: err.to_string(),
        }
    }

    /// Returns the typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<StoreDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true when this error is a database busy/locked condition.
    #[must_use]
    pub fn is_busy_or_locked(&self) -> bool {
        self.database_kind() == Some(StoreDbErrorKind::BusyOrLocked)
    }

    /// Returns true when the store is unreachable and a run should abort.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        self.database_kind()
            .is_some_and(StoreDbErrorKind::is_connectivity)
    }
}
