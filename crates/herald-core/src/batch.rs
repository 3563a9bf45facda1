use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::{ScrapeResult, ScrapeStatus};
use crate::pool::Recyclable;
use crate::scraper::ArticleScraper;
use crate::traits::{Fetcher, TextExtractor, TextScorer};

const DEFAULT_WORKERS: usize = 4;

/// Batch execution settings.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Worker count. `None` uses the smallest registered pool capacity.
    pub workers: Option<usize>,
    /// Overall budget for one URL, both tiers included.
    pub url_timeout: Duration,
    pub chunk_size: usize,
    /// Recycle pools after this many chunks. 0 disables recycling.
    pub refresh_every_chunks: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: None,
            url_timeout: Duration::from_secs(90),
            chunk_size: 100,
            refresh_every_chunks: 0,
        }
    }
}

/// Events emitted while a batch runs.
#[derive(Debug, Clone)]
pub enum BatchEvent<'a> {
    Started {
        total: usize,
        unique_urls: usize,
        workers: usize,
    },
    ChunkStarted {
        index: usize,
        size: usize,
    },
    UrlFinished {
        url: &'a str,
        status: &'a ScrapeStatus,
        attempted: usize,
        succeeded: usize,
        total: usize,
    },
    PoolsRecycled {
        after_chunk: usize,
    },
    Cancelled {
        skipped: usize,
    },
    Finished {
        summary: &'a BatchSummary,
    },
}

/// Receives batch progress. Purely observational.
pub trait BatchReporter: Send + Sync {
    fn report(&self, event: BatchEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingBatchReporter;

impl BatchReporter for TracingBatchReporter {
    fn report(&self, event: BatchEvent<'_>) {
        match event {
            BatchEvent::Started {
                total,
                unique_urls,
                workers,
            } => {
                tracing::info!(total, unique_urls, workers, "Batch started");
            }
            BatchEvent::ChunkStarted { index, size } => {
                tracing::info!(chunk = index, size, "Processing chunk");
            }
            BatchEvent::UrlFinished {
                url,
                status,
                attempted,
                succeeded,
                total,
            } => {
                tracing::info!(%url, %status, attempted, succeeded, total, "Progress");
            }
            BatchEvent::PoolsRecycled { after_chunk } => {
                tracing::info!(after_chunk, "Recycled resource pools");
            }
            BatchEvent::Cancelled { skipped } => {
                tracing::warn!(skipped, "Batch cancelled");
            }
            BatchEvent::Finished { summary } => {
                tracing::info!(
                    total = summary.total,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    unique_urls = summary.unique_urls,
                    elapsed_secs = summary.elapsed.as_secs_f64(),
                    "Batch finished"
                );
            }
        }
    }
}

/// Aggregate counts for one batch. Every input position counts once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub unique_urls: usize,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }
}

/// Results in input order plus the summary.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: Vec<ScrapeResult>,
    pub summary: BatchSummary,
}

/// Anything that can scrape a batch of URLs into positional results.
///
/// Per-URL failures live in the outcome. An `Err` means the batch could
/// not run at all, e.g. a resource pool could not supply a resource.
pub trait ScrapeBatch: Send + Sync {
    fn scrape_batch(
        &self,
        urls: &[String],
    ) -> impl Future<Output = Result<BatchOutcome, AppError>> + Send;
}

/// Fans URLs out across a fixed set of workers.
///
/// `results[i]` always corresponds to `urls[i]`.
pub struct ScrapeBatchRunner<F, R, X, S>
where
    F: Fetcher,
    R: Fetcher,
    X: TextExtractor,
    S: TextScorer + ?Sized,
{
    scraper: Arc<ArticleScraper<F, R, X, S>>,
    config: BatchConfig,
    pools: Vec<Arc<dyn Recyclable>>,
    cancel: CancellationToken,
}

impl<F, R, X, S> ScrapeBatchRunner<F, R, X, S>
where
    F: Fetcher + 'static,
    R: Fetcher + 'static,
    X: TextExtractor + 'static,
    S: TextScorer + ?Sized + 'static,
{
    pub fn new(scraper: ArticleScraper<F, R, X, S>, config: BatchConfig) -> Self {
        Self {
            scraper: Arc::new(scraper),
            config,
            pools: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a pool for periodic recycling and worker sizing.
    pub fn with_pool(mut self, pool: Arc<dyn Recyclable>) -> Self {
        self.pools.push(pool);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn workers(&self) -> usize {
        let from_pools = self.pools.iter().map(|p| p.capacity()).min();
        self.config
            .workers
            .or(from_pools)
            .unwrap_or(DEFAULT_WORKERS)
            .max(1)
    }

    /// Scrape every URL and return results in input order.
    ///
    /// The first pool error stops dispatch and is returned once the
    /// in-flight workers have drained.
    pub async fn run<BR: BatchReporter>(
        &self,
        urls: &[String],
        reporter: &BR,
    ) -> Result<BatchOutcome, AppError> {
        let started = Instant::now();
        let total = urls.len();
        let unique_urls = urls.iter().collect::<HashSet<_>>().len();
        let workers = self.workers().min(total.max(1));
        let chunk_size = self.config.chunk_size.max(1);
        let shared: Arc<[String]> = urls.into();

        reporter.report(BatchEvent::Started {
            total,
            unique_urls,
            workers,
        });

        let mut slots: Vec<Option<ScrapeResult>> = (0..total).map(|_| None).collect();
        let mut progress = Progress { attempted: 0, succeeded: 0, total };

        for (index, start) in (0..total).step_by(chunk_size).enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            let end = (start + chunk_size).min(total);
            reporter.report(BatchEvent::ChunkStarted {
                index,
                size: end - start,
            });
            self.run_chunk(&shared, start, end, workers, &mut slots, &mut progress, reporter)
                .await?;

            let every = self.config.refresh_every_chunks;
            if every > 0 && (index + 1) % every == 0 && end < total {
                for pool in &self.pools {
                    pool.recycle().await;
                }
                reporter.report(BatchEvent::PoolsRecycled { after_chunk: index });
            }
        }

        let skipped = slots.iter().filter(|s| s.is_none()).count();
        if skipped > 0 {
            reporter.report(BatchEvent::Cancelled { skipped });
        }
        let results: Vec<ScrapeResult> = slots
            .into_iter()
            .zip(urls)
            .map(|(slot, url)| {
                slot.unwrap_or_else(|| ScrapeResult::failed(url.as_str(), ScrapeStatus::Cancelled, None))
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let summary = BatchSummary {
            total,
            succeeded,
            failed: total - succeeded,
            unique_urls,
            elapsed: started.elapsed(),
        };
        reporter.report(BatchEvent::Finished { summary: &summary });

        Ok(BatchOutcome { results, summary })
    }

    /// Close every registered pool.
    pub async fn shutdown_pools(&self) {
        for pool in &self.pools {
            pool.shutdown().await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_chunk<BR: BatchReporter>(
        &self,
        urls: &Arc<[String]>,
        start: usize,
        end: usize,
        workers: usize,
        slots: &mut [Option<ScrapeResult>],
        progress: &mut Progress,
        reporter: &BR,
    ) -> Result<(), AppError> {
        let cursor = Arc::new(AtomicUsize::new(start));
        let halt = self.cancel.child_token();
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Result<ScrapeResult, AppError>)>();

        let handles: Vec<_> = (0..workers.min(end - start))
            .map(|_| {
                let scraper = Arc::clone(&self.scraper);
                let urls = Arc::clone(urls);
                let cursor = Arc::clone(&cursor);
                let tx = tx.clone();
                let halt = halt.clone();
                let timeout = self.config.url_timeout;
                tokio::spawn(async move {
                    loop {
                        if halt.is_cancelled() {
                            break;
                        }
                        let index = cursor.fetch_add(1, Ordering::SeqCst);
                        if index >= end {
                            break;
                        }
                        let result = scrape_guarded(&scraper, &urls[index], timeout).await;
                        if tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        drop(tx);

        let mut aborted = None;
        while let Some((index, outcome)) = rx.recv().await {
            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    if aborted.is_none() {
                        tracing::error!(url = %urls[index], error = %e, "Aborting batch");
                        halt.cancel();
                        aborted = Some(e);
                    }
                    continue;
                }
            };
            progress.attempted += 1;
            if result.is_success() {
                progress.succeeded += 1;
            }
            reporter.report(BatchEvent::UrlFinished {
                url: result.url(),
                status: result.status(),
                attempted: progress.attempted,
                succeeded: progress.succeeded,
                total: progress.total,
            });
            slots[index] = Some(result);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Batch worker exited abnormally");
            }
        }

        match aborted {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<F, R, X, S> ScrapeBatch for ScrapeBatchRunner<F, R, X, S>
where
    F: Fetcher + 'static,
    R: Fetcher + 'static,
    X: TextExtractor + 'static,
    S: TextScorer + ?Sized + 'static,
{
    async fn scrape_batch(&self, urls: &[String]) -> Result<BatchOutcome, AppError> {
        self.run(urls, &TracingBatchReporter).await
    }
}

struct Progress {
    attempted: usize,
    succeeded: usize,
    total: usize,
}

/// Scrape one URL under the overall timeout, converting panics and expiry
/// into failed results. Pool errors pass through. A timed-out attempt drops
/// its pool guards, which discards the resources they held.
async fn scrape_guarded<F, R, X, S>(
    scraper: &ArticleScraper<F, R, X, S>,
    url: &str,
    timeout: Duration,
) -> Result<ScrapeResult, AppError>
where
    F: Fetcher,
    R: Fetcher,
    X: TextExtractor,
    S: TextScorer + ?Sized,
{
    let guarded = AssertUnwindSafe(scraper.try_scrape(url)).catch_unwind();
    match tokio::time::timeout(timeout, guarded).await {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(%url, %message, "Scrape panicked");
            Ok(ScrapeResult::failed(
                url,
                ScrapeStatus::Error(format!("panic: {message}")),
                None,
            ))
        }
        Err(_) => {
            tracing::warn!(%url, timeout_secs = timeout.as_secs(), "Scrape timed out");
            Ok(ScrapeResult::failed(
                url,
                ScrapeStatus::Timeout,
                Some(timeout.as_secs_f64()),
            ))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
