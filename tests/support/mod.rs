//! Shared fakes and fixtures for integration tests.
//!
//! Each test binary includes this module with `mod support;` and uses only
//! part of it, hence the `dead_code` allowances.

#![allow(dead_code)]

pub mod socket_guard;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use harvester_core::discovery::{DiscoveryClient, DiscoveryError};
use harvester_core::processor::{ContentProcessor, ProcessedPayload, ProcessorError};
use harvester_core::store::NewLink;
use harvester_core::{Canonicalized, Database, Store};
use serde_json::json;
use tempfile::TempDir;
use tokio::time::Instant;

/// File-backed store in a temp dir; keep the `TempDir` alive.
pub async fn temp_store() -> (TempDir, Store) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db = Database::new(&dir.path().join("harvester.db"))
        .await
        .expect("Failed to open database");
    (dir, Store::new(db))
}

/// Registers canonicalized `urls` and returns their ids in order.
pub async fn seed_links(store: &Store, urls: &[&str]) -> Vec<i64> {
    let mut ids = Vec::with_capacity(urls.len());
    for raw in urls {
        let item = Canonicalized::from_raw(raw).expect("seed url must be valid");
        let id = store
            .register_link(&NewLink {
                url: &item.canonical,
                original_url: &item.original,
                fingerprint: &item.fingerprint,
                source_task: Some("seed"),
            })
            .await
            .expect("register failed")
            .expect("seed url must be new");
        ids.push(id);
    }
    ids
}

/// What a [`ScriptedProcessor`] does for one URL.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Fail this many times, then succeed.
    FailTimes(usize),
    Panic,
    Sleep(Duration),
}

/// Processor whose behavior per URL is scripted; records call start times.
pub struct ScriptedProcessor {
    behaviors: HashMap<String, Behavior>,
    default: Behavior,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedProcessor {
    pub fn succeeding() -> Self {
        Self::with_default(Behavior::Succeed)
    }

    pub fn with_default(default: Behavior) -> Self {
        Self {
            behaviors: HashMap::new(),
            default,
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn on(mut self, url: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(url.to_string(), behavior);
        self
    }

    pub fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls().iter().filter(|(called, _)| called == url).count()
    }

    /// Start instants of calls whose URL contains `needle`.
    pub fn call_starts(&self, needle: &str) -> Vec<Instant> {
        self.calls()
            .into_iter()
            .filter(|(url, _)| url.contains(needle))
            .map(|(_, at)| at)
            .collect()
    }
}

#[async_trait]
impl ContentProcessor for ScriptedProcessor {
    async fn process(&self, url: &str) -> Result<ProcessedPayload, ProcessorError> {
        let previous_calls = {
            let mut calls = self.calls.lock().expect("calls lock");
            let previous = calls.iter().filter(|(called, _)| called == url).count();
            calls.push((url.to_string(), Instant::now()));
            previous
        };

        let behavior = self.behaviors.get(url).unwrap_or(&self.default).clone();
        match behavior {
            Behavior::Succeed => Ok(success_payload(url)),
            Behavior::Fail => Err(ProcessorError::Failed(format!("scripted failure: {url}"))),
            Behavior::FailTimes(times) if previous_calls < times => Err(ProcessorError::Failed(
                format!("scripted failure {} of {times}", previous_calls + 1),
            )),
            Behavior::FailTimes(_) => Ok(success_payload(url)),
            Behavior::Panic => panic!("scripted panic for {url}"),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(success_payload(url))
            }
        }
    }
}

pub fn success_payload(url: &str) -> ProcessedPayload {
    let metadata = json!({
        "tags": ["energy", "Energy", "solar"],
        "country": "my",
        "news_date": "2024-05-01T08:00:00Z",
        "source": "scripted",
    });
    ProcessedPayload {
        title: Some(format!("Title for {url}")),
        content: Some(format!("Body for {url}")),
        translated_content: None,
        metadata: metadata.as_object().cloned().unwrap_or_default(),
    }
}

/// Discovery returning fixed URLs (or a fixed error) and recording prompts.
pub struct StaticDiscovery {
    result: Result<Vec<String>, String>,
    prompts: Mutex<Vec<String>>,
}

impl StaticDiscovery {
    pub fn returning(urls: &[&str]) -> Self {
        Self {
            result: Ok(urls.iter().map(ToString::to_string).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl DiscoveryClient for StaticDiscovery {
    async fn search(&self, prompt: &str) -> Result<Vec<String>, DiscoveryError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        self.result.clone().map_err(DiscoveryError::Request)
    }
}

/// URLs from the end-to-end demo scenario: 2 new, 1 duplicate, 1 invalid.
pub const DEMO_URLS: [&str; 4] = [
    "http://a.com/1",
    "http://a.com/1?utm_source=x",
    "http://b.com/2",
    "not a url",
];
