use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use herald_client::{ArticleExtractor, HttpFetcher};
use herald_core::models::NewsMetadata;
use herald_core::pool::Recyclable;
use herald_core::quality::Verdict;
use herald_core::traits::ArticleStore;
use herald_core::util::count_words;
use herald_core::{
    ArticleScraper, ScrapeBatch, ScrapeBatchRunner, ScrapeStage, ScraperConfig, SpamScorer,
};
use herald_db::{Database, DatabaseConfig};

#[cfg(feature = "browser")]
type ReliableFetcher = herald_client::BrowserFetcher;
#[cfg(not(feature = "browser"))]
type ReliableFetcher = herald_core::DisabledFetcher;

type Runner = ScrapeBatchRunner<HttpFetcher, ReliableFetcher, ArticleExtractor, SpamScorer>;

#[derive(Parser)]
#[command(name = "herald", version, about = "Crypto-news article scraper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape URLs and print one JSON result per line
    Scrape {
        /// URLs to scrape
        urls: Vec<String>,

        /// File with one URL per line (`#` starts a comment)
        #[arg(short, long)]
        file: Option<PathBuf>,

        #[command(flatten)]
        opts: ScrapeOpts,
    },

    /// Scrape every article pending in the database and store the results
    Run {
        #[command(flatten)]
        opts: ScrapeOpts,
    },

    /// Import article metadata from a CSV file
    Import {
        /// CSV with columns news_id, news_url, title, source_name, published_at
        file: PathBuf,
    },

    /// Show per-stage article counts
    Status,

    /// Score a text for spam and show the quality verdict
    Score {
        /// Text to score
        text: Option<String>,

        /// Read the text from a file instead
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
    },
}

#[derive(Args, Clone)]
struct ScrapeOpts {
    /// Concurrent workers (defaults to the smallest pool capacity)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Overall budget per URL, in seconds
    #[arg(long)]
    url_timeout: Option<u64>,

    /// Permit private and loopback addresses
    #[arg(long, default_value_t = false)]
    allow_private: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("herald=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ScraperConfig::from_env().context("Invalid HERALD_* configuration")?;

    match cli.command {
        Commands::Scrape { urls, file, opts } => {
            let urls = collect_urls(urls, file.as_deref())?;
            cmd_scrape(&urls, config, &opts).await?;
        }
        Commands::Run { opts } => {
            let db = connect_db().await?;
            cmd_run(&db, config, &opts).await?;
        }
        Commands::Import { file } => {
            let db = connect_db().await?;
            cmd_import(&db, &file).await?;
        }
        Commands::Status => {
            let db = connect_db().await?;
            cmd_status(&db).await?;
        }
        Commands::Score { text, file } => {
            let text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => bail!("Provide a text argument or --file"),
            };
            cmd_score(&text, &config)?;
        }
    }

    Ok(())
}

async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

/// Cancel the token on the first Ctrl-C; in-flight URLs still finish.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, skipping remaining URLs");
            trigger.cancel();
        }
    });
    token
}

/// Wire fetchers, extractor and scorer into a batch runner.
///
/// One session per pool is created up front so a broken environment fails
/// the command instead of every URL.
async fn build_runner(mut config: ScraperConfig, opts: &ScrapeOpts) -> Result<Runner> {
    if let Some(workers) = opts.workers {
        config.batch.workers = Some(workers.max(1));
    }
    if let Some(secs) = opts.url_timeout {
        config.batch.url_timeout = Duration::from_secs(secs.max(1));
    }

    let mut fast = HttpFetcher::new(config.http.clone(), &config.http_pool);
    if opts.allow_private {
        fast = fast.allow_private_urls();
    }
    fast.pool()
        .acquire()
        .await
        .context("Failed to create an HTTP session")?
        .release()
        .await;

    let (reliable, browser_pool) = reliable_fetcher(&config).await?;

    let extractor = ArticleExtractor::new()?;
    let scorer = Arc::new(SpamScorer::with_config(config.spam.clone()));
    let scraper = ArticleScraper::new(fast.clone(), reliable, extractor, scorer, config.quality);

    let http_pool: Arc<dyn Recyclable> = fast.pool().clone();
    let mut runner = ScrapeBatchRunner::new(scraper, config.batch)
        .with_pool(http_pool)
        .with_cancellation(cancel_on_ctrl_c());
    if let Some(pool) = browser_pool {
        runner = runner.with_pool(pool);
    }
    Ok(runner)
}

#[cfg(feature = "browser")]
async fn reliable_fetcher(
    config: &ScraperConfig,
) -> Result<(ReliableFetcher, Option<Arc<dyn Recyclable>>)> {
    use herald_client::BrowserManager;
    use herald_core::ResourcePool;

    let manager = BrowserManager::new().with_navigation_timeout(config.render.content_timeout);
    let pool = Arc::new(ResourcePool::new(manager, &config.browser_pool));
    pool.acquire()
        .await
        .context("Failed to launch a browser (set CHROME_BIN if Chrome is not on a standard path)")?
        .release()
        .await;

    let fetcher = ReliableFetcher::new(pool.clone(), config.render.clone());
    let recyclable: Arc<dyn Recyclable> = pool;
    Ok((fetcher, Some(recyclable)))
}

#[cfg(not(feature = "browser"))]
async fn reliable_fetcher(
    _config: &ScraperConfig,
) -> Result<(ReliableFetcher, Option<Arc<dyn Recyclable>>)> {
    tracing::info!("Built without the `browser` feature, only the fast tier is available");
    Ok((herald_core::DisabledFetcher, None))
}

async fn cmd_scrape(urls: &[String], config: ScraperConfig, opts: &ScrapeOpts) -> Result<()> {
    if urls.is_empty() {
        bail!("No URLs given. Pass them as arguments or with --file");
    }

    let runner = build_runner(config, opts).await?;
    let outcome = runner.scrape_batch(urls).await;
    runner.shutdown_pools().await;
    let outcome = outcome.context("Scrape batch aborted")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for result in &outcome.results {
        writeln!(out, "{}", serde_json::to_string(result)?)?;
    }
    out.flush()?;

    Ok(())
}

async fn cmd_run(db: &Database, config: ScraperConfig, opts: &ScrapeOpts) -> Result<()> {
    let runner = build_runner(config, opts).await?;
    let stage = ScrapeStage::new(runner, db.articles());

    let report = stage.execute().await;
    stage.batch().shutdown_pools().await;
    let report = report.context("Scrape stage failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_import(db: &Database, path: &Path) -> Result<()> {
    let rows = read_metadata_csv(path)?;
    let written = db.articles().upsert_metadata(&rows).await?;
    tracing::info!(rows = rows.len(), written, "Imported metadata");
    println!("Imported {} articles from {}", rows.len(), path.display());
    Ok(())
}

async fn cmd_status(db: &Database) -> Result<()> {
    let counts = db.articles().status_counts().await?;
    println!("Articles:          {}", counts.total);
    println!("  metadata:        {}", counts.metadata_fetched);
    println!("  scraped:         {}", counts.scraped);
    println!("  cleaned:         {}", counts.cleaned);
    println!("  llm processed:   {}", counts.llm_processed);
    Ok(())
}

fn cmd_score(text: &str, config: &ScraperConfig) -> Result<()> {
    let scorer = SpamScorer::with_config(config.spam.clone());
    let signals = scorer.signals(text);
    let words = count_words(text);

    let verdict = match config.quality.evaluate(text, words, &scorer) {
        Verdict::TooShort => "text too short",
        Verdict::Spam { .. } => "high spam score",
        Verdict::Accept { .. } => "accepted",
    };

    let report = serde_json::json!({
        "words": words,
        "score": signals.score(),
        "emoji": signals.emoji,
        "promo": signals.promo,
        "exclamation": signals.exclamation,
        "verdict": verdict,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Positional URLs followed by those in `file`, in order.
fn collect_urls(mut urls: Vec<String>, file: Option<&Path>) -> Result<Vec<String>> {
    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read URL file: {}", path.display()))?;
        urls.extend(parse_url_list(&content));
    }
    Ok(urls)
}

fn parse_url_list(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}

fn read_metadata_csv(path: &Path) -> Result<Vec<NewsMetadata>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

    reader
        .deserialize()
        .enumerate()
        .map(|(i, row)| row.with_context(|| format!("Invalid CSV record {}", i + 1)))
        .collect()
}
