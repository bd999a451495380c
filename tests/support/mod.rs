//! Shared test doubles for the resolver integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use persisted_documents::{
    DocumentEntry, FetchError, FetchResponse, HttpFetch, RemoteCache, RemoteCacheError,
    RemoteLookup, WaitUntil,
};
use reqwest::header::HeaderMap;
use tokio::sync::Semaphore;

/// Lets a test observe that a fetch has started and decide when it may
/// finish, so concurrent callers are provably in flight together.
pub struct Gate {
    started: Semaphore,
    release: Semaphore,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Semaphore::new(0),
            release: Semaphore::new(0),
        })
    }

    pub async fn wait_started(&self) {
        self.started
            .acquire()
            .await
            .expect("gate semaphore closed")
            .forget();
    }

    pub fn release(&self, permits: usize) {
        self.release.add_permits(permits);
    }

    async fn pass(&self) {
        self.started.add_permits(1);
        self.release
            .acquire()
            .await
            .expect("gate semaphore closed")
            .forget();
    }
}

struct Rule {
    url_prefix: String,
    response: Result<FetchResponse, FetchError>,
}

/// Scripted [`HttpFetch`] that routes by URL prefix and records every call.
pub struct MockFetch {
    rules: Vec<Rule>,
    urls: Mutex<Vec<String>>,
    gate: Option<Arc<Gate>>,
}

impl MockFetch {
    /// Answer every request with a 200 and the given body.
    pub fn ok(body: &str) -> Self {
        Self::new().route("", Ok(FetchResponse::new(200, body)))
    }

    /// Answer every request with a 404.
    pub fn not_found() -> Self {
        Self::new().route("", Ok(FetchResponse::new(404, "")))
    }

    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            urls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Add a rule; the first rule whose prefix matches the URL wins.
    pub fn route(mut self, url_prefix: &str, response: Result<FetchResponse, FetchError>) -> Self {
        self.rules.push(Rule {
            url_prefix: url_prefix.to_string(),
            response,
        });
        self
    }

    pub fn gated(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpFetch for MockFetch {
    async fn fetch(&self, url: &str, _headers: &HeaderMap) -> Result<FetchResponse, FetchError> {
        self.urls.lock().unwrap().push(url.to_string());
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        let rule = self
            .rules
            .iter()
            .find(|rule| url.starts_with(&rule.url_prefix))
            .unwrap_or_else(|| panic!("no route for {url}"));
        rule.response.clone()
    }
}

/// Scripted [`RemoteCache`] that serves one lookup result and records
/// every get and set.
pub struct MockRemote {
    lookup: RemoteLookup,
    fail_get: bool,
    gets: Mutex<Vec<String>>,
    sets: Mutex<Vec<(String, DocumentEntry, Option<Duration>)>>,
}

impl MockRemote {
    pub fn miss() -> Self {
        Self::with_lookup(RemoteLookup::Miss)
    }

    pub fn with_lookup(lookup: RemoteLookup) -> Self {
        Self {
            lookup,
            fail_get: false,
            gets: Mutex::new(Vec::new()),
            sets: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_get: true,
            ..Self::miss()
        }
    }

    pub fn gets(&self) -> Vec<String> {
        self.gets.lock().unwrap().clone()
    }

    pub fn sets(&self) -> Vec<(String, DocumentEntry, Option<Duration>)> {
        self.sets.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteCache for MockRemote {
    async fn get(&self, key: &str) -> Result<RemoteLookup, RemoteCacheError> {
        self.gets.lock().unwrap().push(key.to_string());
        if self.fail_get {
            return Err(RemoteCacheError::backend("connection refused"));
        }
        Ok(self.lookup.clone())
    }

    async fn set(
        &self,
        key: &str,
        entry: &DocumentEntry,
        ttl: Option<Duration>,
    ) -> Result<(), RemoteCacheError> {
        self.sets
            .lock()
            .unwrap()
            .push((key.to_string(), entry.clone(), ttl));
        Ok(())
    }

    fn is_writable(&self) -> bool {
        true
    }
}

/// Wait-until hook that runs registered writes inline, making
/// fire-and-forget effects observable as soon as `resolve` returns.
pub fn inline_hook() -> WaitUntil {
    Arc::new(|future| futures::executor::block_on(future))
}
