use std::future::Future;

use crate::error::AppError;
use crate::models::{NewsMetadata, ScrapedArticle, Stage, StatusCounts};

/// Fetches the raw HTML of a page.
///
/// Implemented once per fetch tier: a plain HTTP client and a headless browser.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Pulls the article body out of a page as plain text.
pub trait TextExtractor: Send + Sync + Clone {
    /// Returns `Ok(None)` when the page has no recognisable article text.
    fn extract(&self, html: &str) -> Result<Option<String>, AppError>;
}

/// Scores text for spam in the range [0, 1].
pub trait TextScorer: Send + Sync {
    fn score(&self, text: &str) -> f64;
}

/// Persistence for the article pipeline tables.
pub trait ArticleStore: Send + Sync + Clone {
    /// Metadata rows whose status is pending for `stage`.
    fn pending(
        &self,
        stage: Stage,
    ) -> impl Future<Output = Result<Vec<NewsMetadata>, AppError>> + Send;

    /// Insert or update metadata rows and set their `metadata_fetched` flag.
    /// Returns the number of rows written.
    fn upsert_metadata(
        &self,
        rows: &[NewsMetadata],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Insert or update scraped rows keyed by `news_id`.
    fn upsert_scraped(
        &self,
        rows: &[ScrapedArticle],
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Set the completion flag for `stage` on the given ids.
    fn mark_stage(
        &self,
        news_ids: &[String],
        stage: Stage,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    fn status_counts(&self) -> impl Future<Output = Result<StatusCounts, AppError>> + Send;
}
