//! Query task rows.

use serde::Serialize;
use sqlx::FromRow;

/// A named, reusable discovery prompt with run statistics.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct QueryTask {
    pub id: i64,
    pub task_name: String,
    pub prompt_template: String,
    pub is_active: bool,
    /// Free-text schedule; never interpreted.
    pub schedule: Option<String>,
    pub last_run: Option<String>,
    pub total_runs: i64,
    pub total_links_found: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for [`Store::create_task`](super::Store::create_task).
#[derive(Debug, Clone, Copy)]
pub struct NewQueryTask<'a> {
    pub task_name: &'a str,
    pub prompt_template: &'a str,
    pub schedule: Option<&'a str>,
    pub is_active: bool,
}

impl<'a> NewQueryTask<'a> {
    /// Active task without a schedule.
    #[must_use]
    pub fn new(task_name: &'a str, prompt_template: &'a str) -> Self {
        Self {
            task_name,
            prompt_template,
            schedule: None,
            is_active: true,
        }
    }
}
