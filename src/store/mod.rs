//! Persistent state for links, processed content and query tasks.
//!
//! The [`Store`] is the only component that talks SQL. Every logical
//! operation is a single statement or a single transaction, so callers never
//! observe partial writes. Deduplication happens at the unique fingerprint
//! index (`ON CONFLICT DO NOTHING`), which keeps registration atomic under
//! concurrent discovery runs.
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::{Database, Store};
//! use harvester_core::store::NewLink;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::new(Database::new_in_memory().await?);
//! let id = store
//!     .register_link(&NewLink {
//!         url: "https://example.com/a",
//!         original_url: "https://www.example.com/a/",
//!         fingerprint: "…",
//!         source_task: Some("demo"),
//!     })
//!     .await?;
//! assert!(id.is_some());
//! # Ok(())
//! # }
//! ```

mod content;
mod error;
mod link;
mod stats;
mod task;

use sqlx::{Executor, Sqlite};
use tracing::{debug, instrument};

use crate::db::Database;

pub use content::{
    ContentRecord, MAX_TAG_CHARS, MAX_TAGS, ProcessedContent, normalize_country,
    normalize_news_date, normalize_tags,
};
pub use error::{StoreDbErrorKind, StoreError};
pub use link::{Link, LinkStatus, NewLink, RegisteredLink};
pub use stats::{LinkCounts, StoreStatistics, TaskCounts};
pub use task::{NewQueryTask, QueryTask};

use content::ProcessedContentRow;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

const LINK_COLUMNS: &str = "id, url, original_url, url_fingerprint, title, discovered_at, \
     source_task, status, error_message, processed_at, last_checked, created_at";

const TASK_COLUMNS: &str = "id, task_name, prompt_template, is_active, schedule, last_run, \
     total_runs, total_links_found, created_at, updated_at";

const CONTENT_COLUMNS: &str = "id, link_id, title, content, translated_content, tags, country, \
     news_date, metadata, created_at, updated_at";

/// SQLite-backed state store.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Wraps an opened database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Underlying database handle.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    // ==================== Links ====================

    /// Inserts a `pending` link unless its fingerprint is already stored.
    ///
    /// Returns `Some(id)` for a new link and `None` for a duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    #[instrument(skip(self, link), fields(url = %link.url))]
    pub async fn register_link(&self, link: &NewLink<'_>) -> Result<Option<i64>> {
        let inserted: Option<(i64,)> = sqlx::query_as(
            r"INSERT INTO links (url, original_url, url_fingerprint, source_task)
              VALUES (?, ?, ?, ?)
              ON CONFLICT(url_fingerprint) DO NOTHING
              RETURNING id",
        )
        .bind(link.url)
        .bind(link.original_url)
        .bind(link.fingerprint)
        .bind(link.source_task)
        .fetch_optional(self.db.pool())
        .await?;

        let id = inserted.map(|(id,)| id);
        debug!(?id, duplicate = id.is_none(), "registered link");
        Ok(id)
    }

    /// Whether a link with this fingerprint exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn link_exists(&self, fingerprint: &str) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM links WHERE url_fingerprint = ?)")
                .bind(fingerprint)
                .fetch_one(self.db.pool())
                .await?;
        Ok(exists)
    }

    /// Fetches a link by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_link(&self, id: i64) -> Result<Option<Link>> {
        let link = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(link)
    }

    /// Pending links, most recently discovered first, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn pending_links(&self, limit: u32) -> Result<Vec<Link>> {
        let links = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE status = 'pending' \
             ORDER BY discovered_at DESC, id DESC LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(self.db.pool())
        .await?;
        Ok(links)
    }

    /// Links with the given ids, most recently discovered first. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn links_by_ids(&self, ids: &[i64]) -> Result<Vec<Link>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut unique = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let placeholders = vec!["?"; unique.len()].join(", ");
        let sql = format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE id IN ({placeholders}) \
             ORDER BY discovered_at DESC, id DESC"
        );
        let mut query = sqlx::query_as::<_, Link>(&sql);
        for id in &unique {
            query = query.bind(*id);
        }
        Ok(query.fetch_all(self.db.pool()).await?)
    }

    /// Links left in `processing`, oldest claim first.
    ///
    /// A link only stays here if a worker died between claiming it and
    /// writing an outcome.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn stuck_links(&self) -> Result<Vec<Link>> {
        let links = sqlx::query_as::<_, Link>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE status = 'processing' \
             ORDER BY last_checked ASC, id ASC"
        ))
        .fetch_all(self.db.pool())
        .await?;
        Ok(links)
    }

    /// Moves a link to `to`, if permitted from its current status.
    ///
    /// Terminal statuses stamp `processed_at`; `error` is persisted only for
    /// `failed` and cleared otherwise. Entering `processing` stamps
    /// `last_checked`. The guard and the write are one statement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LinkNotFound`], [`StoreError::InvalidTransition`],
    /// or [`StoreError::Database`].
    #[instrument(skip(self, error))]
    pub async fn set_link_status(
        &self,
        id: i64,
        to: LinkStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let allowed = to.allowed_predecessors();
        if allowed.is_empty() {
            return Err(self.transition_error(id, to).await);
        }

        let allowed_list = allowed
            .iter()
            .map(|status| format!("'{}'", status.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            r"UPDATE links SET
                status = ?,
                error_message = ?,
                processed_at = CASE WHEN ? THEN strftime('%Y-%m-%d %H:%M:%f', 'now') ELSE processed_at END,
                last_checked = CASE WHEN ? THEN strftime('%Y-%m-%d %H:%M:%f', 'now') ELSE last_checked END
              WHERE id = ? AND status IN ({allowed_list})"
        );

        let stored_error = if to == LinkStatus::Failed { error } else { None };
        let result = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(stored_error)
            .bind(to.is_terminal())
            .bind(to == LinkStatus::Processing)
            .bind(id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, to).await);
        }
        debug!(status = %to, "link status updated");
        Ok(())
    }

    /// Marks a `processing` link completed and stores its content atomically.
    ///
    /// The title is cached on the link row. Either both writes land or neither does.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LinkNotFound`], [`StoreError::InvalidTransition`]
    /// if the link is not `processing`, or [`StoreError::Database`].
    #[instrument(skip(self, record))]
    pub async fn complete_link(&self, id: i64, record: &ContentRecord) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            r"UPDATE links SET
                status = 'completed',
                error_message = NULL,
                title = COALESCE(?, title),
                processed_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE id = ? AND status = 'processing'",
        )
        .bind(record.title.as_deref())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.transition_error(id, LinkStatus::Completed).await);
        }

        write_content(&mut *tx, id, record).await?;
        tx.commit().await?;

        debug!("link completed");
        Ok(())
    }

    /// Classifies a rejected status change as missing link vs. bad transition.
    async fn transition_error(&self, id: i64, to: LinkStatus) -> StoreError {
        let current: std::result::Result<Option<(String,)>, sqlx::Error> =
            sqlx::query_as("SELECT status FROM links WHERE id = ?")
                .bind(id)
                .fetch_optional(self.db.pool())
                .await;
        match current {
            Ok(None) => StoreError::LinkNotFound(id),
            Ok(Some((status,))) => match status.parse::<LinkStatus>() {
                Ok(from) => StoreError::InvalidTransition { id, from, to },
                Err(err) => err,
            },
            Err(err) => err.into(),
        }
    }

    // ==================== Processed content ====================

    /// Inserts or replaces the processed content for a link.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LinkNotFound`] if the link does not exist, or
    /// [`StoreError::Database`].
    #[instrument(skip(self, record))]
    pub async fn upsert_processed_content(&self, link_id: i64, record: &ContentRecord) -> Result<()> {
        let written = write_content(self.db.pool(), link_id, record).await;
        if let Err(StoreError::Database {
            kind: StoreDbErrorKind::ConstraintViolation,
            ..
        }) = &written
        {
            if self.get_link(link_id).await?.is_none() {
                return Err(StoreError::LinkNotFound(link_id));
            }
        }
        written
    }

    /// Processed content for a link, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::Json`] for corrupt columns.
    #[instrument(skip(self))]
    pub async fn get_processed_content(&self, link_id: i64) -> Result<Option<ProcessedContent>> {
        let row = sqlx::query_as::<_, ProcessedContentRow>(&format!(
            "SELECT {CONTENT_COLUMNS} FROM processed_content WHERE link_id = ?"
        ))
        .bind(link_id)
        .fetch_optional(self.db.pool())
        .await?;
        row.map(ProcessedContent::try_from).transpose()
    }

    // ==================== Tasks ====================

    /// Creates a query task and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateTask`] if the name is taken, or
    /// [`StoreError::Database`].
    #[instrument(skip(self, task), fields(task = task.task_name))]
    pub async fn create_task(&self, task: &NewQueryTask<'_>) -> Result<i64> {
        let inserted: std::result::Result<(i64,), sqlx::Error> = sqlx::query_as(
            r"INSERT INTO query_tasks (task_name, prompt_template, schedule, is_active)
              VALUES (?, ?, ?, ?)
              RETURNING id",
        )
        .bind(task.task_name)
        .bind(task.prompt_template)
        .bind(task.schedule)
        .bind(task.is_active)
        .fetch_one(self.db.pool())
        .await;

        match inserted {
            Ok((id,)) => Ok(id),
            Err(err) => match StoreError::from(err) {
                StoreError::Database {
                    kind: StoreDbErrorKind::ConstraintViolation,
                    ..
                } => Err(StoreError::DuplicateTask(task.task_name.to_string())),
                other => Err(other),
            },
        }
    }

    /// Fetches a task by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_task(&self, task_name: &str) -> Result<Option<QueryTask>> {
        let task = sqlx::query_as::<_, QueryTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM query_tasks WHERE task_name = ?"
        ))
        .bind(task_name)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(task)
    }

    /// All tasks ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_tasks(&self) -> Result<Vec<QueryTask>> {
        let tasks = sqlx::query_as::<_, QueryTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM query_tasks ORDER BY task_name"
        ))
        .fetch_all(self.db.pool())
        .await?;
        Ok(tasks)
    }

    /// Active tasks ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_active_tasks(&self) -> Result<Vec<QueryTask>> {
        let tasks = sqlx::query_as::<_, QueryTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM query_tasks WHERE is_active = 1 ORDER BY task_name"
        ))
        .fetch_all(self.db.pool())
        .await?;
        Ok(tasks)
    }

    /// Enables or disables a task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] or [`StoreError::Database`].
    #[instrument(skip(self))]
    pub async fn set_task_active(&self, task_name: &str, active: bool) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE query_tasks
              SET is_active = ?, updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE task_name = ?",
        )
        .bind(active)
        .bind(task_name)
        .execute(self.db.pool())
        .await?;
        check_task_affected(task_name, result.rows_affected())
    }

    /// Stamps `last_run`, increments `total_runs` and adds `links_found`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] or [`StoreError::Database`].
    #[instrument(skip(self))]
    pub async fn record_task_run(&self, task_name: &str, links_found: usize) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE query_tasks SET
                last_run = strftime('%Y-%m-%d %H:%M:%f', 'now'),
                total_runs = total_runs + 1,
                total_links_found = total_links_found + ?,
                updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
              WHERE task_name = ?",
        )
        .bind(i64::try_from(links_found).unwrap_or(i64::MAX))
        .bind(task_name)
        .execute(self.db.pool())
        .await?;
        check_task_affected(task_name, result.rows_affected())
    }

    // ==================== Statistics ====================

    /// Link counts by status and task counts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the queries fail.
    #[instrument(skip(self))]
    pub async fn statistics(&self) -> Result<StoreStatistics> {
        let (total, pending, processing, completed, failed): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r"SELECT
                    COUNT(*),
                    COALESCE(SUM(status = 'pending'), 0),
                    COALESCE(SUM(status = 'processing'), 0),
                    COALESCE(SUM(status = 'completed'), 0),
                    COALESCE(SUM(status = 'failed'), 0)
                  FROM links",
            )
            .fetch_one(self.db.pool())
            .await?;

        let (task_total, task_active): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM query_tasks")
                .fetch_one(self.db.pool())
                .await?;

        Ok(StoreStatistics {
            links: LinkCounts {
                total,
                pending,
                processing,
                completed,
                failed,
            },
            tasks: TaskCounts {
                total: task_total,
                active: task_active,
            },
        })
    }
}

async fn write_content<'e, E>(executor: E, link_id: i64, record: &ContentRecord) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (tags, country, news_date, metadata) = record.column_values()?;
    sqlx::query(
        r"INSERT INTO processed_content
            (link_id, title, content, translated_content, tags, country, news_date, metadata)
          VALUES (?, ?, ?, ?, ?, ?, ?, ?)
          ON CONFLICT(link_id) DO UPDATE SET
            title = excluded.title,
            content = excluded.content,
            translated_content = excluded.translated_content,
            tags = excluded.tags,
            country = excluded.country,
            news_date = excluded.news_date,
            metadata = excluded.metadata,
            updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')",
    )
    .bind(link_id)
    .bind(record.title.as_deref())
    .bind(record.content.as_deref())
    .bind(record.translated_content.as_deref())
    .bind(tags)
    .bind(country)
    .bind(news_date)
    .bind(metadata)
    .execute(executor)
    .await?;
    Ok(())
}

fn check_task_affected(task_name: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::TaskNotFound(task_name.to_string()))
    } else {
        Ok(())
    }
}
