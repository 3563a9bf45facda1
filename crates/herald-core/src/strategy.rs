//! Reliable-tier fetching on top of pooled page sessions.
//!
//! A [`PageSession`] is one rendered browser tab. [`PooledPageFetcher`] checks
//! a session out of a [`ResourcePool`], renders the URL, handles a bot
//! challenge with a single refresh, and hands the session back.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use regex::RegexSet;

use crate::error::AppError;
use crate::pool::{ResourceManager, ResourcePool};
use crate::traits::Fetcher;

/// Elements that usually hold the article, in priority order.
pub const CONTENT_SELECTORS: &[&str] = &["article", ".article-content", ".post-content", "main", "body"];

/// Phrases shown by interstitial bot-check pages.
pub const CHALLENGE_PHRASES: &[&str] = &[
    "verifying you are human",
    "please verify you are a human",
    "captcha required",
];

/// A single rendered page that can be driven by the reliable fetcher.
pub trait PageSession: Send {
    fn navigate(&mut self, url: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Wait until an element matching `selector` exists.
    fn wait_for(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn page_source(&mut self) -> impl Future<Output = Result<String, AppError>> + Send;

    fn reload(&mut self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Outer HTML of the first element matching `selector`, if any.
    fn element_html(
        &mut self,
        selector: &str,
    ) -> impl Future<Output = Result<Option<String>, AppError>> + Send;
}

/// Case-insensitive matcher for bot-challenge pages.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    patterns: Arc<RegexSet>,
}

impl ChallengeDetector {
    pub fn new<I, S>(phrases: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = phrases
            .into_iter()
            .map(|p| format!("(?i){}", regex::escape(p.as_ref())));
        let set = RegexSet::new(patterns)
            .map_err(|e| AppError::ConfigError(format!("Invalid challenge pattern: {e}")))?;
        Ok(Self {
            patterns: Arc::new(set),
        })
    }

    pub fn with_default_phrases() -> Self {
        // Escaped literals always compile.
        Self::new(CHALLENGE_PHRASES).unwrap_or_else(|_| Self {
            patterns: Arc::new(RegexSet::empty()),
        })
    }

    pub fn is_challenge(&self, page_source: &str) -> bool {
        self.patterns.is_match(page_source)
    }
}

impl Default for ChallengeDetector {
    fn default() -> Self {
        Self::with_default_phrases()
    }
}

/// Timing for the reliable tier.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Bounded wait for a content element to appear.
    pub content_timeout: Duration,
    /// Pause before refreshing a challenge page.
    pub verification_sleep: Duration,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            content_timeout: Duration::from_secs(30),
            verification_sleep: Duration::from_secs(5),
        }
    }
}

/// Render `url` in `session` and return the article-bearing HTML.
pub async fn render_page<P: PageSession>(
    session: &mut P,
    url: &str,
    options: &RenderOptions,
    detector: &ChallengeDetector,
) -> Result<String, AppError> {
    let wait_selector = CONTENT_SELECTORS.join(", ");

    session.navigate(url).await?;
    session.wait_for(&wait_selector, options.content_timeout).await?;
    let source = session.page_source().await?;

    let source = if detector.is_challenge(&source) {
        tracing::info!(
            %url,
            sleep_secs = options.verification_sleep.as_secs(),
            "Bot challenge detected, refreshing once"
        );
        tokio::time::sleep(options.verification_sleep).await;
        session.reload().await?;
        session.wait_for(&wait_selector, options.content_timeout).await?;
        let source = session.page_source().await?;
        if detector.is_challenge(&source) {
            tracing::warn!(%url, "Bot challenge persisted after refresh");
            return Err(AppError::ChallengePersisted);
        }
        source
    } else {
        source
    };

    for selector in CONTENT_SELECTORS {
        match session.element_html(selector).await {
            Ok(Some(html)) if !html.trim().is_empty() => return Ok(html),
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(%url, selector, error = %e, "Content element unreadable");
                break;
            }
        }
    }
    Ok(source)
}

/// Reliable-tier fetcher backed by a pool of page sessions.
pub struct PooledPageFetcher<M: ResourceManager> {
    pool: Arc<ResourcePool<M>>,
    options: RenderOptions,
    detector: ChallengeDetector,
}

impl<M: ResourceManager> Clone for PooledPageFetcher<M> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            options: self.options.clone(),
            detector: self.detector.clone(),
        }
    }
}

impl<M: ResourceManager> PooledPageFetcher<M> {
    pub fn new(pool: Arc<ResourcePool<M>>, options: RenderOptions) -> Self {
        Self {
            pool,
            options,
            detector: ChallengeDetector::default(),
        }
    }

    pub fn with_detector(mut self, detector: ChallengeDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn pool(&self) -> &Arc<ResourcePool<M>> {
        &self.pool
    }
}

impl<M> Fetcher for PooledPageFetcher<M>
where
    M: ResourceManager,
    M::Resource: PageSession,
{
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let mut session = self.pool.acquire().await?;
        let outcome = render_page(&mut *session, url, &self.options, &self.detector).await;
        session.release().await;
        outcome
    }
}

/// Stand-in for the reliable tier when browser support is not built.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledFetcher;

impl Fetcher for DisabledFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        tracing::debug!(%url, "Reliable fetch unavailable");
        Err(AppError::BrowserError(
            "browser support not compiled in".into(),
        ))
    }
}
