//! Harvester Core Library
//!
//! This library discovers candidate news URLs from a search provider,
//! deduplicates and persists them, then processes each link through a
//! content pipeline with domain-aware rate limiting and bounded concurrency.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`canonical`] - URL normalization, validation, fingerprints and routing domains
//! - [`db`] - Database connection and schema management
//! - [`store`] - Links, processed content and query tasks
//! - [`discovery`] - Search providers (prompt → URLs)
//! - [`processor`] - Content processors (URL → structured content)
//! - [`engine`] - Concurrent, rate-limited, retrying link processing
//! - [`orchestrator`] - Discovery runs tying the above together
//! - [`config`] - TOML configuration with environment overrides

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod canonical;
pub mod config;
pub mod db;
pub mod discovery;
pub mod engine;
pub mod http_client;
pub mod orchestrator;
pub mod processor;
pub mod store;

// Re-export commonly used types
pub use canonical::{CanonicalError, Canonicalized, domain_of, fingerprint, normalize, validate};
pub use config::{AppConfig, ConfigError};
pub use db::{Database, DatabaseOptions, DbError};
pub use discovery::{ChatSearchClient, DiscoveryClient, DiscoveryError};
pub use engine::{
    DEFAULT_CONCURRENCY, DomainStats, EngineError, EngineOptions, ProcessingEngine,
    ProcessingStats, RateLimiter, RetryDecision, RetryPolicy,
};
pub use orchestrator::{Orchestrator, OrchestratorError, TaskOutcome, TaskRunReport};
pub use processor::{ContentProcessor, PageFetchProcessor, ProcessedPayload, ProcessorError};
pub use store::{Link, LinkStatus, Store, StoreError};
