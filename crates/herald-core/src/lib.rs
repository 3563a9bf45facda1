pub mod batch;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod quality;
pub mod scraper;
pub mod spam;
pub mod strategy;
pub mod traits;
pub mod util;

#[cfg(test)]
pub mod testutil;

pub use batch::{BatchConfig, BatchOutcome, BatchSummary, ScrapeBatch, ScrapeBatchRunner};
pub use config::ScraperConfig;
pub use error::AppError;
pub use models::{FetchMethod, NewsMetadata, ScrapeResult, ScrapeStatus, ScrapedArticle, Stage};
pub use pipeline::{ScrapeStage, StageReport};
pub use pool::{PoolConfig, ResourceManager, ResourcePool};
pub use quality::QualityPolicy;
pub use scraper::ArticleScraper;
pub use spam::SpamScorer;
pub use strategy::{DisabledFetcher, PageSession, PooledPageFetcher};
pub use traits::{ArticleStore, Fetcher, TextExtractor, TextScorer};
