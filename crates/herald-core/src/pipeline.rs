use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::Serialize;

use crate::batch::ScrapeBatch;
use crate::error::AppError;
use crate::models::{ScrapeResult, ScrapeStatus, ScrapedArticle, Stage};
use crate::traits::ArticleStore;

/// What one stage run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageReport {
    pub articles_scraped: usize,
    pub successful_scrapes: usize,
    pub success_rate: f64,
}

/// Scrapes every article whose metadata is fetched but not yet scraped.
///
/// Each distinct URL is scraped once. Articles sharing a URL share its
/// result. Scrape failures are written like any other result. Store and pool
/// failures abort the run before anything is written.
pub struct ScrapeStage<B, St>
where
    B: ScrapeBatch,
    St: ArticleStore,
{
    batch: B,
    store: St,
}

impl<B, St> ScrapeStage<B, St>
where
    B: ScrapeBatch,
    St: ArticleStore,
{
    pub fn new(batch: B, store: St) -> Self {
        Self { batch, store }
    }

    pub fn batch(&self) -> &B {
        &self.batch
    }

    pub async fn execute(&self) -> Result<StageReport, AppError> {
        let pending = self.store.pending(Stage::Scraped).await?;
        if pending.is_empty() {
            tracing::info!("No articles pending scrape");
            return Ok(StageReport::default());
        }

        let mut seen = HashSet::new();
        let urls: Vec<String> = pending
            .iter()
            .filter(|m| seen.insert(m.news_url.as_str()))
            .map(|m| m.news_url.clone())
            .collect();
        tracing::info!(
            articles = pending.len(),
            unique_urls = urls.len(),
            "Scraping pending articles"
        );

        let outcome = self.batch.scrape_batch(&urls).await.map_err(|e| {
            tracing::error!(error = %e, "Scrape batch aborted");
            e
        })?;
        let by_url: HashMap<&str, &ScrapeResult> = outcome
            .results
            .iter()
            .map(|r| (r.url(), r))
            .collect();

        // Cancelled URLs stay pending for the next run.
        let scraped_at = Utc::now();
        let rows: Vec<ScrapedArticle> = pending
            .iter()
            .filter_map(|meta| {
                let result = by_url.get(meta.news_url.as_str())?;
                (result.status() != &ScrapeStatus::Cancelled)
                    .then(|| ScrapedArticle::from_result(meta, result, scraped_at))
            })
            .collect();
        if rows.is_empty() {
            tracing::warn!("Stage produced no results to store");
            return Ok(StageReport::default());
        }

        let written = self.store.upsert_scraped(&rows).await.map_err(|e| {
            tracing::error!(error = %e, rows = rows.len(), "Failed to store scraped articles");
            e
        })?;

        let ids: Vec<String> = rows.iter().map(|r| r.news_id.clone()).collect();
        let marked = self
            .store
            .mark_stage(&ids, Stage::Scraped)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to update scrape status");
                e
            })?;

        let successful_scrapes = rows
            .iter()
            .filter(|r| r.status == ScrapeStatus::Accepted.as_str())
            .count();
        let report = StageReport {
            articles_scraped: rows.len(),
            successful_scrapes,
            success_rate: successful_scrapes as f64 / rows.len() as f64,
        };
        tracing::info!(
            articles = report.articles_scraped,
            successful = report.successful_scrapes,
            success_rate = report.success_rate,
            written,
            marked,
            "Scrape stage complete"
        );
        Ok(report)
    }
}
