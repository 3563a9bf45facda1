use std::sync::Arc;
use std::time::Instant;

use crate::error::AppError;
use crate::models::{FetchMethod, ScrapeResult, ScrapeStatus};
use crate::quality::{QualityPolicy, Verdict};
use crate::traits::{Fetcher, TextExtractor, TextScorer};
use crate::util::count_words;

/// Turns one URL into a [`ScrapeResult`]: fast fetch, reliable fetch on
/// failure, extraction, then the quality and spam gate.
///
/// Generic over its collaborators so tests can run it without a network or
/// a browser.
pub struct ArticleScraper<F, R, X, S>
where
    F: Fetcher,
    R: Fetcher,
    X: TextExtractor,
    S: TextScorer + ?Sized,
{
    fast: F,
    reliable: R,
    extractor: X,
    scorer: Arc<S>,
    policy: QualityPolicy,
}

impl<F, R, X, S> ArticleScraper<F, R, X, S>
where
    F: Fetcher,
    R: Fetcher,
    X: TextExtractor,
    S: TextScorer + ?Sized,
{
    pub fn new(fast: F, reliable: R, extractor: X, scorer: Arc<S>, policy: QualityPolicy) -> Self {
        Self {
            fast,
            reliable,
            extractor,
            scorer,
            policy,
        }
    }

    pub fn policy(&self) -> &QualityPolicy {
        &self.policy
    }

    /// Scrape `url`. Never fails: every error becomes a failed result.
    pub async fn scrape(&self, url: &str) -> ScrapeResult {
        match self.try_scrape(url).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(%url, error = %e, "Scrape aborted");
                ScrapeResult::failed(url, e.status(), None)
            }
        }
    }

    /// Scrape `url`, returning `Err` only when a resource pool cannot serve
    /// the request. Fetch and extraction failures become failed results.
    pub async fn try_scrape(&self, url: &str) -> Result<ScrapeResult, AppError> {
        let mut last_failure: Option<(AppError, f64)> = None;

        for method in FetchMethod::ORDER {
            let started = Instant::now();
            let outcome = self.attempt(method, url).await;
            let elapsed = started.elapsed().as_secs_f64();

            match outcome {
                Ok(text) => return Ok(self.judge(url, text, method, elapsed)),
                Err(e @ AppError::PoolError(_)) => return Err(e),
                Err(e) if e.is_terminal() => {
                    tracing::warn!(%url, %method, error = %e, "URL rejected");
                    return Ok(ScrapeResult::failed(url, e.status(), Some(elapsed)));
                }
                Err(e) => {
                    tracing::warn!(%url, %method, error = %e, "Fetch attempt failed");
                    last_failure = Some((e, elapsed));
                }
            }
        }

        let (status, elapsed) = match last_failure {
            Some((e, elapsed)) => (e.status(), Some(elapsed)),
            None => (ScrapeStatus::FetchFailed, None),
        };
        tracing::info!(%url, %status, "All fetch methods failed");
        Ok(ScrapeResult::failed(url, status, elapsed))
    }

    async fn attempt(&self, method: FetchMethod, url: &str) -> Result<String, AppError> {
        let html = match method {
            FetchMethod::Fast => self.fast.fetch(url).await?,
            FetchMethod::Reliable => self.reliable.fetch(url).await?,
        };
        if html.trim().is_empty() {
            return Err(AppError::EmptyResponse);
        }
        tracing::debug!(%url, %method, bytes = html.len(), "Fetched page");

        match self.extractor.extract(&html)? {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(AppError::EmptyArticle),
        }
    }

    fn judge(&self, url: &str, text: String, method: FetchMethod, elapsed: f64) -> ScrapeResult {
        let word_count = count_words(&text);
        match self.policy.evaluate(&text, word_count, &*self.scorer) {
            Verdict::TooShort => {
                tracing::info!(%url, %method, word_count, "Rejected: text too short");
                ScrapeResult::rejected_short(url, text, word_count, method, elapsed)
            }
            Verdict::Spam { score } => {
                tracing::info!(%url, %method, word_count, spam_score = score, "Rejected: high spam score");
                ScrapeResult::rejected_spam(url, text, word_count, method, elapsed, score)
            }
            Verdict::Accept { score } => {
                tracing::info!(%url, %method, word_count, elapsed_secs = elapsed, "Accepted");
                ScrapeResult::accepted(url, text, word_count, method, elapsed, score)
            }
        }
    }
}
