//! Discovery runs: task → search → canonicalize → register → optional processing.
//!
//! The [`Orchestrator`] is the only writer of new links. A run either fails
//! before anything is registered (unknown or inactive task, discovery error)
//! or registers every valid, previously unseen URL and reports the counts.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::canonical::{Canonicalized, validate};
use crate::discovery::{DiscoveryClient, DiscoveryError};
use crate::engine::{EngineError, ProcessingEngine, ProcessingStats};
use crate::store::{NewLink, RegisteredLink, Store, StoreError};

/// Why a discovery run did not produce a report.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task is inactive: {0}")]
    TaskInactive(String),

    /// The search provider failed; nothing was registered.
    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Links were registered but auto-processing could not start.
    #[error("processing failed: {0}")]
    Processing(#[from] EngineError),
}

/// Outcome of one discovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRunReport {
    pub task_name: String,
    /// URLs returned by discovery, valid or not.
    pub total_found: usize,
    pub new_links: usize,
    pub duplicates: usize,
    pub invalid: usize,
    /// Newly registered links in discovery order.
    pub links: Vec<RegisteredLink>,
    /// Present when the new links were processed in the same run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing: Option<ProcessingStats>,
}

/// Result of one task inside [`Orchestrator::run_active_tasks`].
#[derive(Debug)]
pub struct TaskOutcome {
    pub task_name: String,
    pub result: Result<TaskRunReport, OrchestratorError>,
}

/// Drives discovery runs against the store.
pub struct Orchestrator {
    store: Store,
    discovery: Arc<dyn DiscoveryClient>,
    engine: Option<Arc<ProcessingEngine>>,
    auto_process: bool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("engine", &self.engine)
            .field("auto_process", &self.auto_process)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Discovery-only orchestrator; new links stay `pending`.
    #[must_use]
    pub fn new(store: Store, discovery: Arc<dyn DiscoveryClient>) -> Self {
        Self {
            store,
            discovery,
            engine: None,
            auto_process: false,
        }
    }

    /// Attaches an engine that processes each run's new links when `auto_process` is set.
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<ProcessingEngine>, auto_process: bool) -> Self {
        self.engine = Some(engine);
        self.auto_process = auto_process;
        self
    }

    /// Runs a stored task by name.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::TaskNotFound`] / [`OrchestratorError::TaskInactive`]
    /// before any discovery call; otherwise as [`run_prompt`](Self::run_prompt).
    #[instrument(skip(self))]
    pub async fn run_task(&self, task_name: &str) -> Result<TaskRunReport, OrchestratorError> {
        let task = self
            .store
            .get_task(task_name)
            .await?
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_name.to_string()))?;
        if !task.is_active {
            return Err(OrchestratorError::TaskInactive(task_name.to_string()));
        }
        self.run_prompt(&task.task_name, &task.prompt_template).await
    }

    /// Runs discovery for `prompt`, attributing new links to `task_name`.
    ///
    /// Task statistics are updated when `task_name` names a stored task.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Discovery`] leaves the store untouched.
    /// [`OrchestratorError::Store`] aborts registration midway.
    /// [`OrchestratorError::Processing`] means links were registered but not processed.
    #[instrument(skip(self, prompt))]
    pub async fn run_prompt(
        &self,
        task_name: &str,
        prompt: &str,
    ) -> Result<TaskRunReport, OrchestratorError> {
        let urls = self.discovery.search(prompt).await?;
        info!(found = urls.len(), "discovery returned urls");

        let mut report = TaskRunReport {
            task_name: task_name.to_string(),
            total_found: urls.len(),
            new_links: 0,
            duplicates: 0,
            invalid: 0,
            links: Vec::new(),
            processing: None,
        };

        for raw in &urls {
            if !validate(raw) {
                debug!(url = %raw, "discarding url without scheme or host");
                report.invalid += 1;
                continue;
            }
            let item = match Canonicalized::from_raw(raw) {
                Ok(item) => item,
                Err(e) => {
                    debug!(url = %raw, error = %e, "discarding invalid url");
                    report.invalid += 1;
                    continue;
                }
            };

            let registered = self
                .store
                .register_link(&NewLink {
                    url: &item.canonical,
                    original_url: &item.original,
                    fingerprint: &item.fingerprint,
                    source_task: Some(task_name),
                })
                .await?;

            match registered {
                Some(id) => {
                    debug!(link_id = id, url = %item.canonical, "registered new link");
                    report.links.push(RegisteredLink {
                        id,
                        url: item.canonical,
                        original_url: item.original,
                    });
                }
                None => {
                    debug!(url = %item.canonical, "duplicate link");
                    report.duplicates += 1;
                }
            }
        }
        report.new_links = report.links.len();

        match self.store.record_task_run(task_name, report.new_links).await {
            Ok(()) => {}
            Err(StoreError::TaskNotFound(_)) => {
                debug!("ad-hoc prompt; no task statistics to update");
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            new = report.new_links,
            duplicates = report.duplicates,
            invalid = report.invalid,
            "discovery run registered links"
        );

        let engine = self
            .engine
            .as_ref()
            .filter(|_| self.auto_process && report.new_links > 0);
        if let Some(engine) = engine {
            let ids: Vec<i64> = report.links.iter().map(|link| link.id).collect();
            report.processing = Some(engine.process_specific(&ids).await?);
        }

        Ok(report)
    }

    /// Runs every active task in name order. A failing task does not stop the rest.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Store`] only if the task list cannot be read.
    #[instrument(skip(self))]
    pub async fn run_active_tasks(&self) -> Result<Vec<TaskOutcome>, OrchestratorError> {
        let tasks = self.store.list_active_tasks().await?;
        info!(tasks = tasks.len(), "running active tasks");

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            let result = self
                .run_prompt(&task.task_name, &task.prompt_template)
                .await;
            if let Err(e) = &result {
                warn!(task = %task.task_name, error = %e, "task run failed");
            }
            outcomes.push(TaskOutcome {
                task_name: task.task_name,
                result,
            });
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::db::Database;
    use crate::engine::{EngineOptions, RetryPolicy};
    use crate::processor::{ContentProcessor, ProcessedPayload, ProcessorError};
    use crate::store::{LinkStatus, NewQueryTask};

    struct StaticDiscovery {
        urls: Vec<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl StaticDiscovery {
        fn new(urls: &[&str]) -> Self {
            Self {
                urls: urls.iter().map(ToString::to_string).collect(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DiscoveryClient for StaticDiscovery {
        async fn search(&self, prompt: &str) -> Result<Vec<String>, DiscoveryError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if prompt.contains("broken") {
                return Err(DiscoveryError::Request("connection refused".into()));
            }
            Ok(self.urls.clone())
        }
    }

    struct OkProcessor;

    #[async_trait]
    impl ContentProcessor for OkProcessor {
        async fn process(&self, url: &str) -> Result<ProcessedPayload, ProcessorError> {
            Ok(ProcessedPayload {
                title: Some(url.to_string()),
                ..ProcessedPayload::default()
            })
        }
    }

    const DEMO_URLS: [&str; 4] = [
        "http://a.com/1",
        "http://a.com/1?utm_source=x",
        "http://b.com/2",
        "not a url",
    ];

    async fn store_with_task(name: &str, prompt: &str, active: bool) -> Store {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        store
            .create_task(&NewQueryTask {
                is_active: active,
                ..NewQueryTask::new(name, prompt)
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_run_task_demo_counts() {
        let store = store_with_task("demo", "solar news", true).await;
        let orchestrator =
            Orchestrator::new(store.clone(), Arc::new(StaticDiscovery::new(&DEMO_URLS)));

        let report = orchestrator.run_task("demo").await.unwrap();

        assert_eq!(report.total_found, 4);
        assert_eq!(report.new_links, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.links[0].url, "http://a.com/1");
        assert!(report.processing.is_none());

        let task = store.get_task("demo").await.unwrap().unwrap();
        assert_eq!(task.total_runs, 1);
        assert_eq!(task.total_links_found, 2);
        assert!(task.last_run.is_some());
    }

    #[tokio::test]
    async fn test_second_run_registers_nothing_new() {
        let store = store_with_task("demo", "solar news", true).await;
        let orchestrator =
            Orchestrator::new(store.clone(), Arc::new(StaticDiscovery::new(&DEMO_URLS)));

        orchestrator.run_task("demo").await.unwrap();
        let second = orchestrator.run_task("demo").await.unwrap();

        assert_eq!(second.new_links, 0);
        assert_eq!(second.duplicates, 3);
        let task = store.get_task("demo").await.unwrap().unwrap();
        assert_eq!(task.total_runs, 2);
        assert_eq!(task.total_links_found, 2);
    }

    #[tokio::test]
    async fn test_urls_without_scheme_or_host_are_invalid() {
        let store = store_with_task("odd", "p", true).await;
        let urls = [
            "mailto:desk@a.com",
            "/relative/path",
            "file:///tmp/page.html",
            "  ",
            "https://a.com/ok",
        ];
        let orchestrator =
            Orchestrator::new(store.clone(), Arc::new(StaticDiscovery::new(&urls)));

        let report = orchestrator.run_task("odd").await.unwrap();

        assert_eq!(report.total_found, 5);
        assert_eq!(report.invalid, 4);
        assert_eq!(report.new_links, 1);
        assert_eq!(store.statistics().await.unwrap().links.total, 1);
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_tasks_never_call_discovery() {
        let store = store_with_task("paused", "p", false).await;
        let discovery = Arc::new(StaticDiscovery::new(&DEMO_URLS));
        let orchestrator = Orchestrator::new(store, Arc::clone(&discovery) as Arc<dyn DiscoveryClient>);

        assert!(matches!(
            orchestrator.run_task("missing").await,
            Err(OrchestratorError::TaskNotFound(name)) if name == "missing"
        ));
        assert!(matches!(
            orchestrator.run_task("paused").await,
            Err(OrchestratorError::TaskInactive(_))
        ));
        assert!(discovery.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_failure_changes_nothing() {
        let store = store_with_task("demo", "broken prompt", true).await;
        let orchestrator =
            Orchestrator::new(store.clone(), Arc::new(StaticDiscovery::new(&DEMO_URLS)));

        let result = orchestrator.run_task("demo").await;

        assert!(matches!(result, Err(OrchestratorError::Discovery(_))));
        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.links.total, 0);
        assert_eq!(store.get_task("demo").await.unwrap().unwrap().total_runs, 0);
    }

    #[tokio::test]
    async fn test_auto_process_handles_only_new_links() {
        let store = store_with_task("demo", "solar news", true).await;
        let engine = ProcessingEngine::new(
            store.clone(),
            Arc::new(OkProcessor),
            EngineOptions {
                retry_policy: RetryPolicy::new(1, Duration::ZERO),
                same_domain_delay: Duration::ZERO,
                ..EngineOptions::default()
            },
        )
        .unwrap();
        let orchestrator =
            Orchestrator::new(store.clone(), Arc::new(StaticDiscovery::new(&DEMO_URLS)))
                .with_engine(Arc::new(engine), true);

        let report = orchestrator.run_task("demo").await.unwrap();

        let processing = report.processing.unwrap();
        assert_eq!(processing.succeeded, 2);
        for link in &report.links {
            let stored = store.get_link(link.id).await.unwrap().unwrap();
            assert_eq!(stored.status().unwrap(), LinkStatus::Completed);
        }

        let again = orchestrator.run_task("demo").await.unwrap();
        assert!(again.processing.is_none());
    }

    #[tokio::test]
    async fn test_run_active_tasks_continues_after_failure() {
        let store = store_with_task("a-broken", "broken prompt", true).await;
        store
            .create_task(&NewQueryTask::new("b-good", "good prompt"))
            .await
            .unwrap();
        store
            .create_task(&NewQueryTask {
                is_active: false,
                ..NewQueryTask::new("c-off", "off")
            })
            .await
            .unwrap();
        let orchestrator = Orchestrator::new(store, Arc::new(StaticDiscovery::new(&DEMO_URLS)));

        let outcomes = orchestrator.run_active_tasks().await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].task_name, "a-broken");
        assert!(outcomes[0].result.is_err());
        assert_eq!(outcomes[1].result.as_ref().unwrap().new_links, 2);
    }

    #[tokio::test]
    async fn test_run_prompt_without_stored_task() {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let orchestrator =
            Orchestrator::new(store.clone(), Arc::new(StaticDiscovery::new(&DEMO_URLS)));

        let report = orchestrator.run_prompt("adhoc", "anything").await.unwrap();

        assert_eq!(report.new_links, 2);
        let link = store.get_link(report.links[0].id).await.unwrap().unwrap();
        assert_eq!(link.source_task.as_deref(), Some("adhoc"));
    }
}
