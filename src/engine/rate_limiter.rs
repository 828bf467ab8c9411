//! Per-domain request spacing.
//!
//! [`RateLimiter`] enforces a minimum gap between the *starts* of consecutive
//! calls to the same routing domain. Calls to different domains never wait
//! on each other.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harvester_core::engine::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::new(Duration::from_secs(3));
//!
//! limiter.acquire("example.com").await; // immediate
//! limiter.acquire("other.com").await;   // immediate, different domain
//! limiter.acquire("example.com").await; // waits until 3s after the first call
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Warning threshold for cumulative delay per domain.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(60);

/// Per-domain rate limiter, shared across partition workers via `Arc`.
///
/// The `DashMap` entry is cloned out before awaiting so no shard lock is
/// held across the sleep; the per-domain `Mutex` serializes check-and-update.
#[derive(Debug)]
pub struct RateLimiter {
    min_spacing: Duration,
    domains: DashMap<String, Arc<DomainState>>,
}

#[derive(Debug)]
struct DomainState {
    /// Start of the previous call; `None` until the first call.
    last_request: Mutex<Option<Instant>>,
    /// Total time this domain has spent waiting, for telemetry.
    cumulative_delay_ms: AtomicU64,
}

impl DomainState {
    fn new() -> Self {
        Self {
            last_request: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }
}

impl RateLimiter {
    /// Creates a limiter with the given minimum same-domain spacing.
    /// `Duration::ZERO` disables waiting.
    #[must_use]
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            domains: DashMap::new(),
        }
    }

    /// Configured minimum spacing.
    #[must_use]
    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }

    /// Waits until `domain` may be called again, then records now as its last call start.
    ///
    /// The first call to a domain returns immediately.
    #[instrument(skip(self))]
    pub async fn acquire(&self, domain: &str) {
        let state = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(DomainState::new()))
            .clone();

        let mut last_request = state.last_request.lock().await;

        if let Some(previous) = *last_request {
            let elapsed = previous.elapsed();
            if elapsed < self.min_spacing {
                let delay = self.min_spacing.saturating_sub(elapsed);
                let cumulative = state.add_cumulative_delay(delay);

                debug!(
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );

                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting - many links queued for one domain"
                    );
                }

                tokio::time::sleep(delay).await;
            }
        } else {
            debug!("first request to domain - no delay");
        }

        // Start-to-start spacing: stamp after the wait, before the call.
        *last_request = Some(Instant::now());
    }

    /// Total time spent waiting on `domain` so far.
    #[must_use]
    pub fn cumulative_delay(&self, domain: &str) -> Duration {
        self.domains.get(domain).map_or(Duration::ZERO, |state| {
            Duration::from_millis(state.cumulative_delay_ms.load(Ordering::SeqCst))
        })
    }
}
