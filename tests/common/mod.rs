//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use finsight::config::Config;
use finsight::extract::KindExtractor;
use finsight::fetch::{FetcherSet, RawContent, SourceFetcher};
use finsight::runtime::Runtime;
use finsight_core::error::FetchError;
use finsight_core::models::{SourceKind, SourceRef};
use finsight_core::store::memory::InMemoryStore;

/// Fetcher that replays a fixed list of results, repeating the last one.
pub struct ScriptedFetcher {
    kind: SourceKind,
    script: Mutex<VecDeque<Result<RawContent, FetchError>>>,
    last: Mutex<Option<Result<RawContent, FetchError>>>,
    calls: AtomicUsize,
    called_at: Mutex<Vec<Instant>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedFetcher {
    pub fn sequence(kind: SourceKind, script: Vec<Result<RawContent, FetchError>>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            called_at: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    pub fn always(kind: SourceKind, result: Result<RawContent, FetchError>) -> Arc<Self> {
        Self::sequence(kind, vec![result])
    }

    /// Every fetch waits for a permit on `gate` first.
    pub fn gated(
        kind: SourceKind,
        result: Result<RawContent, FetchError>,
        gate: Arc<Semaphore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(vec![result].into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            called_at: Mutex::new(Vec::new()),
            gate: Some(gate),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// When each fetch started, after any gate.
    pub fn called_at(&self) -> Vec<Instant> {
        self.called_at.lock().unwrap().clone()
    }

    /// Replaces the remaining script.
    pub fn set_script(&self, script: Vec<Result<RawContent, FetchError>>) {
        *self.script.lock().unwrap() = script.into();
    }
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self, _source: &SourceRef) -> Result<RawContent, FetchError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.called_at.lock().unwrap().push(Instant::now());
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(FetchError::Unreachable("script exhausted".into()))),
        }
    }
}

pub fn html(title: &str, body: &str) -> RawContent {
    RawContent {
        kind: SourceKind::Url,
        bytes: format!(
            "<html><head><title>{}</title></head><body><p>{}</p></body></html>",
            title, body
        )
        .into_bytes(),
        content_type: Some("text/html".to_string()),
        final_location: None,
    }
}

pub fn captions(kind: SourceKind, lines: &[&str]) -> RawContent {
    let cues: String = lines
        .iter()
        .enumerate()
        .map(|(i, l)| format!(r#"<text start="{}" dur="1.5">{}</text>"#, i, l))
        .collect();
    RawContent {
        kind,
        bytes: format!(r#"<?xml version="1.0" encoding="utf-8" ?><transcript>{}</transcript>"#, cues)
            .into_bytes(),
        content_type: Some("text/xml".to_string()),
        final_location: None,
    }
}

pub fn test_config() -> Config {
    let mut config = Config::minimal();
    config.dispatcher.workers = 2;
    config.dispatcher.queue_capacity = 16;
    config.scheduler.enabled = false;
    config
}

/// Full runtime over an in-memory store and the given fetchers.
pub fn runtime(config: &Config, fetchers: FetcherSet) -> (Runtime, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let runtime = Runtime::assemble(config, store.clone(), fetchers, Arc::new(KindExtractor));
    (runtime, store)
}
