//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests. State lives
//! behind `Arc<Mutex<_>>` so clones share it and tests can assert on
//! recorded calls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AppError;
use crate::models::{ArticleStatus, NewsMetadata, ScrapedArticle, Stage, StatusCounts};
use crate::pool::ResourceManager;
use crate::strategy::PageSession;
use crate::traits::{ArticleStore, Fetcher, TextExtractor, TextScorer};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FetchScript {
    responses: HashMap<String, VecDeque<Result<String, AppError>>>,
    stalls: HashSet<String>,
    panics: HashSet<String>,
    delay: Option<Duration>,
}

/// Fetcher with per-URL scripted responses.
///
/// Responses for a URL are consumed in order; a final `Ok` body repeats.
/// Unknown URLs answer HTTP 404.
#[derive(Clone, Default)]
pub struct MockFetcher {
    script: Arc<Mutex<FetchScript>>,
    calls: Arc<AtomicUsize>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, url: &str, response: Result<String, AppError>) -> Self {
        self.script
            .lock()
            .unwrap()
            .responses
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Never completes for `url`.
    pub fn stall_on(self, url: &str) -> Self {
        self.script.lock().unwrap().stalls.insert(url.to_string());
        self
    }

    pub fn panic_on(self, url: &str) -> Self {
        self.script.lock().unwrap().panics.insert(url.to_string());
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (stall, panic, delay) = {
            let script = self.script.lock().unwrap();
            (
                script.stalls.contains(url),
                script.panics.contains(url),
                script.delay,
            )
        };
        if panic {
            panic!("mock fetcher exploded on {url}");
        }
        if stall {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let not_found = || AppError::HttpStatus {
            status: 404,
            url: url.to_string(),
        };
        let mut script = self.script.lock().unwrap();
        let Some(queue) = script.responses.get_mut(url) else {
            return Err(not_found());
        };
        match queue.front() {
            Some(Ok(body)) if queue.len() == 1 => Ok(body.clone()),
            _ => queue.pop_front().unwrap_or_else(|| Err(not_found())),
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Extractor that treats the fetched body as the article text.
#[derive(Clone)]
pub struct MockExtractor {
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockExtractor {
    pub fn passthrough() -> Self {
        Self {
            error: Arc::new(Mutex::new(None)),
        }
    }

    /// Fails the first call, then behaves like `passthrough`.
    pub fn failing_once(error: AppError) -> Self {
        Self {
            error: Arc::new(Mutex::new(Some(error))),
        }
    }
}

impl TextExtractor for MockExtractor {
    fn extract(&self, html: &str) -> Result<Option<String>, AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        let text = html.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}

// ---------------------------------------------------------------------------
// MockScorer
// ---------------------------------------------------------------------------

/// Scorer returning a fixed score and counting calls.
pub struct MockScorer {
    score: f64,
    calls: AtomicUsize,
}

impl MockScorer {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextScorer for MockScorer {
    fn score(&self, _text: &str) -> f64 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.score
    }
}

// ---------------------------------------------------------------------------
// MockResourceManager
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MockResource {
    pub id: u64,
    pub pid: u32,
}

#[derive(Default)]
struct ManagerState {
    next_id: u64,
    alive: HashSet<u64>,
    dead: HashSet<u64>,
    destroyed: Vec<u64>,
    killed: Vec<u32>,
    max_alive: usize,
    fail_next_create: bool,
    hang_on_destroy: bool,
    check_delay: Option<Duration>,
}

/// Resource manager that records the lifecycle of every resource.
#[derive(Clone, Default)]
pub struct MockResourceManager {
    state: Arc<Mutex<ManagerState>>,
}

impl MockResourceManager {
    const PID_BASE: u32 = 40_000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_create(&self) {
        self.state.lock().unwrap().fail_next_create = true;
    }

    /// Graceful destroy never completes.
    pub fn hang_on_destroy(&self) {
        self.state.lock().unwrap().hang_on_destroy = true;
    }

    /// Every health check takes `delay` before answering.
    pub fn delay_health_checks(&self, delay: Duration) {
        self.state.lock().unwrap().check_delay = Some(delay);
    }

    /// Make the resource fail its next health check.
    pub fn kill(&self, id: u64) {
        self.state.lock().unwrap().dead.insert(id);
    }

    pub fn pid_of(&self, id: u64) -> u32 {
        Self::PID_BASE + id as u32
    }

    pub fn alive(&self) -> usize {
        self.state.lock().unwrap().alive.len()
    }

    pub fn max_alive(&self) -> usize {
        self.state.lock().unwrap().max_alive
    }

    pub fn destroyed(&self) -> Vec<u64> {
        self.state.lock().unwrap().destroyed.clone()
    }

    pub fn killed(&self) -> Vec<u32> {
        self.state.lock().unwrap().killed.clone()
    }
}

impl ResourceManager for MockResourceManager {
    type Resource = MockResource;

    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn create(&self) -> Result<MockResource, AppError> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail_next_create) {
            return Err(AppError::PoolError("mock create failed".into()));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.alive.insert(id);
        state.max_alive = state.max_alive.max(state.alive.len());
        Ok(MockResource {
            id,
            pid: self.pid_of(id),
        })
    }

    async fn probe(&self, resource: &mut MockResource) -> bool {
        let delay = self.state.lock().unwrap().check_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        !self.state.lock().unwrap().dead.contains(&resource.id)
    }

    async fn destroy(&self, resource: MockResource) -> Result<(), AppError> {
        let hang = self.state.lock().unwrap().hang_on_destroy;
        if hang {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        state.alive.remove(&resource.id);
        state.destroyed.push(resource.id);
        Ok(())
    }

    fn process_id(&self, resource: &MockResource) -> Option<u32> {
        Some(resource.pid)
    }

    async fn kill_process(&self, pid: u32) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.killed.push(pid);
        let id = u64::from(pid - Self::PID_BASE);
        state.alive.remove(&id);
        state.dead.insert(id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockPageManager
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PageScript {
    pages: HashMap<String, Vec<String>>,
    elements: HashMap<(String, String), String>,
    nav_failures: HashSet<String>,
    reloads: usize,
    next_id: u64,
}

/// Pool manager producing scripted page sessions.
///
/// Each URL has a sequence of page sources: the first load shows the first
/// entry, each reload advances by one, and the last entry repeats.
#[derive(Clone, Default)]
pub struct MockPageManager {
    script: Arc<Mutex<PageScript>>,
}

impl MockPageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pages(&self, url: &str, sources: &[&str]) {
        self.script.lock().unwrap().pages.insert(
            url.to_string(),
            sources.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn set_element(&self, url: &str, selector: &str, html: &str) {
        self.script
            .lock()
            .unwrap()
            .elements
            .insert((url.to_string(), selector.to_string()), html.to_string());
    }

    pub fn fail_navigation(&self, url: &str) {
        self.script
            .lock()
            .unwrap()
            .nav_failures
            .insert(url.to_string());
    }

    pub fn reloads(&self) -> usize {
        self.script.lock().unwrap().reloads
    }
}

pub struct MockPageSession {
    pub id: u64,
    script: Arc<Mutex<PageScript>>,
    current: Option<String>,
    loads: usize,
}

impl PageSession for MockPageSession {
    async fn navigate(&mut self, url: &str) -> Result<(), AppError> {
        if self.script.lock().unwrap().nav_failures.contains(url) {
            return Err(AppError::BrowserError(format!("navigation to {url} failed")));
        }
        self.current = Some(url.to_string());
        self.loads = 0;
        Ok(())
    }

    async fn wait_for(&mut self, _selector: &str, timeout: Duration) -> Result<(), AppError> {
        match self.current {
            Some(_) => Ok(()),
            None => Err(AppError::Timeout(timeout.as_secs())),
        }
    }

    async fn page_source(&mut self) -> Result<String, AppError> {
        let script = self.script.lock().unwrap();
        let sources = self
            .current
            .as_ref()
            .and_then(|url| script.pages.get(url))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::BrowserError("no page loaded".into()))?;
        Ok(sources[self.loads.min(sources.len() - 1)].clone())
    }

    async fn reload(&mut self) -> Result<(), AppError> {
        self.loads += 1;
        self.script.lock().unwrap().reloads += 1;
        Ok(())
    }

    async fn element_html(&mut self, selector: &str) -> Result<Option<String>, AppError> {
        let Some(url) = self.current.clone() else {
            return Ok(None);
        };
        let script = self.script.lock().unwrap();
        Ok(script.elements.get(&(url, selector.to_string())).cloned())
    }
}

impl ResourceManager for MockPageManager {
    type Resource = MockPageSession;

    fn kind(&self) -> &'static str {
        "page"
    }

    async fn create(&self) -> Result<MockPageSession, AppError> {
        let mut script = self.script.lock().unwrap();
        script.next_id += 1;
        Ok(MockPageSession {
            id: script.next_id,
            script: Arc::clone(&self.script),
            current: None,
            loads: 0,
        })
    }

    async fn probe(&self, _resource: &mut MockPageSession) -> bool {
        true
    }

    async fn destroy(&self, _resource: MockPageSession) -> Result<(), AppError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// InMemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    metadata: Vec<NewsMetadata>,
    status: HashMap<String, ArticleStatus>,
    scraped: HashMap<String, ScrapedArticle>,
    fail_writes: bool,
}

/// In-memory `ArticleStore` with the same upsert semantics as the database.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert metadata rows as if the ingestion stage had run.
    pub fn seed(&self, rows: Vec<NewsMetadata>) {
        let mut state = self.state.lock().unwrap();
        for row in rows {
            Self::put_metadata(&mut state, row);
        }
    }

    /// Make every later write fail.
    pub fn fail_writes(&self) {
        self.state.lock().unwrap().fail_writes = true;
    }

    pub fn scraped(&self) -> HashMap<String, ScrapedArticle> {
        self.state.lock().unwrap().scraped.clone()
    }

    pub fn status(&self, news_id: &str) -> Option<ArticleStatus> {
        self.state.lock().unwrap().status.get(news_id).cloned()
    }

    fn put_metadata(state: &mut StoreState, row: NewsMetadata) {
        let id = row.news_id.clone();
        match state.metadata.iter_mut().find(|m| m.news_id == id) {
            Some(existing) => *existing = row,
            None => state.metadata.push(row),
        }
        state
            .status
            .entry(id.clone())
            .or_insert_with(|| ArticleStatus {
                news_id: id,
                ..Default::default()
            })
            .set(Stage::MetadataFetched);
    }

    fn check_writable(state: &StoreState) -> Result<(), AppError> {
        if state.fail_writes {
            Err(AppError::StorageError("write rejected".into()))
        } else {
            Ok(())
        }
    }
}

impl ArticleStore for InMemoryStore {
    async fn pending(&self, stage: Stage) -> Result<Vec<NewsMetadata>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .metadata
            .iter()
            .filter(|m| {
                state
                    .status
                    .get(&m.news_id)
                    .is_some_and(|s| s.is_pending(stage))
            })
            .cloned()
            .collect())
    }

    async fn upsert_metadata(&self, rows: &[NewsMetadata]) -> Result<u64, AppError> {
        let mut state = self.state.lock().unwrap();
        Self::check_writable(&state)?;
        for row in rows {
            Self::put_metadata(&mut state, row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn upsert_scraped(&self, rows: &[ScrapedArticle]) -> Result<u64, AppError> {
        let mut state = self.state.lock().unwrap();
        Self::check_writable(&state)?;
        for row in rows {
            state.scraped.insert(row.news_id.clone(), row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn mark_stage(&self, news_ids: &[String], stage: Stage) -> Result<u64, AppError> {
        let mut state = self.state.lock().unwrap();
        Self::check_writable(&state)?;
        let mut marked = 0;
        for id in news_ids {
            if let Some(status) = state.status.get_mut(id) {
                status.set(stage);
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn status_counts(&self) -> Result<StatusCounts, AppError> {
        let state = self.state.lock().unwrap();
        let count = |stage: Stage| state.status.values().filter(|s| s.is_set(stage)).count() as i64;
        Ok(StatusCounts {
            total: state.status.len() as i64,
            metadata_fetched: count(Stage::MetadataFetched),
            scraped: count(Stage::Scraped),
            cleaned: count(Stage::Cleaned),
            llm_processed: count(Stage::LlmProcessed),
        })
    }
}
