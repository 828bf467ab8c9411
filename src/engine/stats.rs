//! Outcome counters for a processing run.

use std::collections::BTreeMap;

use serde::Serialize;

/// Counters for one routing domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainStats {
    /// Links attempted (`succeeded + failed`).
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Links not attempted (wrong status for this run).
    pub skipped: usize,
    /// Set when the domain's worker died; its unfinished links count as failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate counters returned by the processing engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    /// Links attempted (`succeeded + failed`).
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Links never attempted: malformed URL or ineligible status.
    pub skipped: usize,
    pub by_domain: BTreeMap<String, DomainStats>,
}

impl ProcessingStats {
    /// Counts a link skipped before partitioning, optionally under its domain.
    pub(crate) fn record_skipped(&mut self, domain: Option<&str>) {
        self.skipped += 1;
        if let Some(domain) = domain {
            self.by_domain.entry(domain.to_string()).or_default().skipped += 1;
        }
    }

    /// Folds one domain's results into the aggregate.
    pub(crate) fn merge_domain(&mut self, domain: &str, stats: DomainStats) {
        self.total += stats.total;
        self.succeeded += stats.succeeded;
        self.failed += stats.failed;
        self.skipped += stats.skipped;

        let entry = self.by_domain.entry(domain.to_string()).or_default();
        entry.total += stats.total;
        entry.succeeded += stats.succeeded;
        entry.failed += stats.failed;
        entry.skipped += stats.skipped;
        if stats.error.is_some() {
            entry.error = stats.error;
        }
    }

    /// True when nothing was attempted or skipped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.skipped == 0
    }
}
