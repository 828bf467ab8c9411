//! Concurrent, domain-aware processing of discovered links.
//!
//! The [`ProcessingEngine`] turns `pending` links into `completed` or
//! `failed` ones:
//!
//! 1. Links are partitioned up front by routing domain
//!    ([`domain_of`](crate::canonical::domain_of)).
//! 2. Each partition runs in its own Tokio task; a semaphore bounds how many
//!    partitions run at once.
//! 3. Inside a partition links run strictly in order. Before every processor
//!    call the [`RateLimiter`] enforces same-domain spacing.
//! 4. Failed attempts are retried per [`RetryPolicy`]; the last error is stored
//!    once attempts run out.
//!
//! A failure in one partition (store error, processor panic, even a panic in
//! the worker itself) never affects the others.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use harvester_core::engine::{EngineOptions, ProcessingEngine};
//! use harvester_core::processor::PageFetchProcessor;
//! use harvester_core::{Database, Store};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::new(Database::new_in_memory().await?);
//! let processor = Arc::new(PageFetchProcessor::new(Duration::from_secs(30))?);
//! let engine = ProcessingEngine::new(store, processor, EngineOptions::default())?;
//! let stats = engine.process_pending(100).await?;
//! println!("succeeded {}, failed {}", stats.succeeded, stats.failed);
//! # Ok(())
//! # }
//! ```

pub mod rate_limiter;
pub mod retry;
mod stats;

pub use rate_limiter::RateLimiter;
pub use retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, RetryDecision, RetryPolicy};
pub use stats::{DomainStats, ProcessingStats};

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::canonical::domain_of;
use crate::processor::{ContentProcessor, ProcessedPayload, ProcessorError};
use crate::store::{Link, LinkStatus, Store, StoreError};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default number of domains processed at once.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default minimum spacing between calls to one domain.
pub const DEFAULT_SAME_DOMAIN_DELAY: Duration = Duration::from_secs(3);

/// Default bound on a single processor call.
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for processing engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Loading the links to process failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Domains processed in parallel (1-100).
    pub concurrency: usize,
    /// Attempt cap and backoff.
    pub retry_policy: RetryPolicy,
    /// Minimum start-to-start gap between calls to one domain.
    pub same_domain_delay: Duration,
    /// Bound on a single processor call; exceeding it fails the attempt.
    pub processing_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_policy: RetryPolicy::default(),
            same_domain_delay: DEFAULT_SAME_DOMAIN_DELAY,
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
        }
    }
}

/// Outcome of one link inside a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkOutcome {
    Succeeded,
    Failed,
    Skipped,
}

/// Live counters for one partition, readable after its task panics.
#[derive(Debug, Default)]
struct PartitionProgress {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl PartitionProgress {
    fn record(&self, outcome: LinkOutcome) {
        let counter = match outcome {
            LinkOutcome::Succeeded => &self.succeeded,
            LinkOutcome::Failed => &self.failed,
            LinkOutcome::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Snapshot as domain stats; links never reached count as failed when `error` is set.
    fn snapshot(&self, partition_len: usize, error: Option<String>) -> DomainStats {
        let succeeded = self.succeeded.load(Ordering::SeqCst);
        let skipped = self.skipped.load(Ordering::SeqCst);
        let mut failed = self.failed.load(Ordering::SeqCst);
        if error.is_some() {
            failed = partition_len.saturating_sub(succeeded + skipped);
        }
        DomainStats {
            total: succeeded + failed,
            succeeded,
            failed,
            skipped,
            error,
        }
    }
}

/// Everything a partition task needs, cloned into each spawned task.
#[derive(Clone)]
struct PartitionWorker {
    store: Store,
    processor: Arc<dyn ContentProcessor>,
    rate_limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
    processing_timeout: Duration,
}

/// Concurrent, rate-limited, retrying link processor.
pub struct ProcessingEngine {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    worker: PartitionWorker,
}

impl std::fmt::Debug for ProcessingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingEngine")
            .field("concurrency", &self.concurrency)
            .field("retry_policy", &self.worker.retry_policy)
            .field("same_domain_delay", &self.worker.rate_limiter.min_spacing())
            .field("processing_timeout", &self.worker.processing_timeout)
            .finish_non_exhaustive()
    }
}

impl ProcessingEngine {
    /// Creates an engine over `store` calling `processor`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `options.concurrency`
    /// is outside 1-100.
    #[instrument(level = "debug", skip(store, processor))]
    pub fn new(
        store: Store,
        processor: Arc<dyn ContentProcessor>,
        options: EngineOptions,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&options.concurrency) {
            return Err(EngineError::InvalidConcurrency {
                value: options.concurrency,
            });
        }

        debug!(
            concurrency = options.concurrency,
            max_attempts = options.retry_policy.max_attempts(),
            same_domain_delay_ms = options.same_domain_delay.as_millis(),
            "creating processing engine"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(options.concurrency)),
            concurrency: options.concurrency,
            worker: PartitionWorker {
                store,
                processor,
                rate_limiter: Arc::new(RateLimiter::new(options.same_domain_delay)),
                retry_policy: options.retry_policy,
                processing_timeout: options.processing_timeout,
            },
        })
    }

    /// Configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.worker.retry_policy
    }

    /// Processes up to `limit` pending links, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] only if the pending links cannot be
    /// loaded. Per-link failures are counted in the stats.
    #[instrument(skip(self))]
    pub async fn process_pending(&self, limit: u32) -> Result<ProcessingStats, EngineError> {
        let links = self.worker.store.pending_links(limit).await?;
        info!(count = links.len(), "processing pending links");
        self.run(links, ProcessingStats::default()).await
    }

    /// Processes exactly the given links.
    ///
    /// `pending` and `failed` links are processed (a failed link is re-run);
    /// links in any other status are counted as skipped. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] only if the links cannot be loaded.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn process_specific(&self, ids: &[i64]) -> Result<ProcessingStats, EngineError> {
        let links = self.worker.store.links_by_ids(ids).await?;
        let mut stats = ProcessingStats::default();

        let mut eligible = Vec::with_capacity(links.len());
        for link in links {
            match link.status() {
                Ok(LinkStatus::Pending | LinkStatus::Failed) => eligible.push(link),
                Ok(status) => {
                    debug!(link_id = link.id, %status, "skipping link not awaiting processing");
                    let domain = domain_of(&link.url);
                    stats.record_skipped(Some(domain.as_str()).filter(|d| !d.is_empty()));
                }
                Err(e) => {
                    warn!(link_id = link.id, error = %e, "skipping link with unreadable status");
                    stats.record_skipped(None);
                }
            }
        }

        info!(count = eligible.len(), "processing selected links");
        self.run(eligible, stats).await
    }

    async fn run(
        &self,
        links: Vec<Link>,
        mut stats: ProcessingStats,
    ) -> Result<ProcessingStats, EngineError> {
        let partitions = partition_by_domain(links, &mut stats);
        let mut handles: Vec<(String, usize, Arc<PartitionProgress>, JoinHandle<()>)> =
            Vec::with_capacity(partitions.len());

        for (domain, links) in partitions {
            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;

            let worker = self.worker.clone();
            let progress = Arc::new(PartitionProgress::default());
            let task_progress = Arc::clone(&progress);
            let task_domain = domain.clone();
            let partition_len = links.len();

            handles.push((
                domain,
                partition_len,
                progress,
                tokio::spawn(async move {
                    let _permit = permit;
                    worker
                        .process_partition(&task_domain, links, &task_progress)
                        .await;
                }),
            ));
        }

        for (domain, partition_len, progress, handle) in handles {
            let error = match handle.await {
                Ok(()) => None,
                Err(join_error) => {
                    warn!(domain = %domain, error = %join_error, "domain worker aborted");
                    Some(format!("domain worker aborted: {join_error}"))
                }
            };
            stats.merge_domain(&domain, progress.snapshot(partition_len, error));
        }

        info!(
            total = stats.total,
            succeeded = stats.succeeded,
            failed = stats.failed,
            skipped = stats.skipped,
            domains = stats.by_domain.len(),
            "processing run finished"
        );
        Ok(stats)
    }
}

/// Groups links by routing domain, keeping input order within each group.
/// Links without a routable host are counted as skipped.
fn partition_by_domain(
    links: Vec<Link>,
    stats: &mut ProcessingStats,
) -> BTreeMap<String, Vec<Link>> {
    let mut partitions: BTreeMap<String, Vec<Link>> = BTreeMap::new();
    for link in links {
        let domain = domain_of(&link.url);
        if domain.is_empty() {
            warn!(link_id = link.id, url = %link.url, "skipping link without routable host");
            stats.record_skipped(None);
            continue;
        }
        partitions.entry(domain).or_default().push(link);
    }
    partitions
}

impl PartitionWorker {
    #[instrument(skip(self, links, progress), fields(links = links.len()))]
    async fn process_partition(&self, domain: &str, links: Vec<Link>, progress: &PartitionProgress) {
        for link in links {
            let outcome = self.process_link(domain, &link).await;
            progress.record(outcome);
        }
    }

    #[instrument(skip(self, link), fields(link_id = link.id, url = %link.url))]
    async fn process_link(&self, domain: &str, link: &Link) -> LinkOutcome {
        match self
            .store
            .set_link_status(link.id, LinkStatus::Processing, None)
            .await
        {
            Ok(()) => {}
            Err(e @ (StoreError::InvalidTransition { .. } | StoreError::LinkNotFound(_))) => {
                debug!(error = %e, "link no longer claimable");
                return LinkOutcome::Skipped;
            }
            Err(e) => {
                warn!(error = %e, "failed to mark link processing");
                return LinkOutcome::Failed;
            }
        }

        let mut attempt = 1;
        let last_error = loop {
            self.rate_limiter.acquire(domain).await;

            let error = match self.call_processor(&link.url).await {
                Ok(payload) => return self.store_success(link.id, payload).await,
                Err(error) => error,
            };
            debug!(attempt, error = %error, "attempt failed");

            match self.retry_policy.should_retry(attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { .. } => break error,
            }
        };

        warn!(attempts = attempt, error = %last_error, "link failed after all attempts");
        let message = last_error.to_string();
        if let Err(e) = self
            .store
            .set_link_status(link.id, LinkStatus::Failed, Some(&message))
            .await
        {
            warn!(error = %e, "failed to mark link failed");
        }
        LinkOutcome::Failed
    }

    /// One processor call bounded by the timeout, with panics turned into errors.
    async fn call_processor(&self, url: &str) -> Result<ProcessedPayload, ProcessorError> {
        let call = AssertUnwindSafe(self.processor.process(url)).catch_unwind();
        match tokio::time::timeout(self.processing_timeout, call).await {
            Err(_) => Err(ProcessorError::Timeout {
                millis: u64::try_from(self.processing_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Ok(Err(panic)) => Err(ProcessorError::Panicked(panic_message(panic.as_ref()))),
            Ok(Ok(result)) => result,
        }
    }

    async fn store_success(&self, link_id: i64, payload: ProcessedPayload) -> LinkOutcome {
        match self.store.complete_link(link_id, &payload.into_record()).await {
            Ok(()) => {
                debug!("link completed");
                LinkOutcome::Succeeded
            }
            Err(e) => {
                warn!(error = %e, "failed to store processed content");
                let message = format!("failed to store processed content: {e}");
                if let Err(mark_error) = self
                    .store
                    .set_link_status(link_id, LinkStatus::Failed, Some(&message))
                    .await
                {
                    warn!(error = %mark_error, "failed to mark link failed");
                }
                LinkOutcome::Failed
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
