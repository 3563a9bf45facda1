use std::str::FromStr;
use std::time::Duration;

use crate::batch::BatchConfig;
use crate::error::AppError;
use crate::pool::PoolConfig;
use crate::quality::QualityPolicy;
use crate::spam::{ExclamationMode, SpamConfig};
use crate::strategy::RenderOptions;

/// Connect/read timeouts for the fast tier.
#[derive(Debug, Clone)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            read: Duration::from_secs(30),
        }
    }
}

/// Everything the scraping core can be tuned with.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub quality: QualityPolicy,
    pub spam: SpamConfig,
    pub http: HttpTimeouts,
    pub render: RenderOptions,
    pub http_pool: PoolConfig,
    pub browser_pool: PoolConfig,
    pub batch: BatchConfig,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            quality: QualityPolicy::default(),
            spam: SpamConfig::default(),
            http: HttpTimeouts::default(),
            render: RenderOptions::default(),
            http_pool: PoolConfig::default(),
            browser_pool: PoolConfig::browser(),
            batch: BatchConfig::default(),
        }
    }
}

impl ScraperConfig {
    /// Read configuration from `HERALD_*` environment variables, falling back
    /// to defaults for anything unset.
    ///
    /// - `HERALD_MIN_WORDS`, `HERALD_SPAM_CHECK_MAX_WORDS`, `HERALD_MAX_SPAM_SCORE`
    /// - `HERALD_EXCLAMATION_CAP` (switches to absolute exclamation scoring)
    /// - `HERALD_CONNECT_TIMEOUT_SECS`, `HERALD_READ_TIMEOUT_SECS`
    /// - `HERALD_PAGE_LOAD_TIMEOUT_SECS`, `HERALD_VERIFICATION_SLEEP_SECS`
    /// - `HERALD_MAX_BROWSERS`, `HERALD_BROWSER_MEMORY_MB`, `HERALD_MAX_HTTP_SESSIONS`
    /// - `HERALD_WORKERS`, `HERALD_URL_TIMEOUT_SECS`, `HERALD_CHUNK_SIZE`,
    ///   `HERALD_REFRESH_EVERY_CHUNKS`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let mut config = Self::default();

        if let Some(v) = env.parse::<u32>("HERALD_MIN_WORDS")? {
            config.quality.min_words = v;
        }
        if let Some(v) = env.parse::<u32>("HERALD_SPAM_CHECK_MAX_WORDS")? {
            config.quality.spam_check_max_words = v;
        }
        if let Some(v) = env.parse::<f64>("HERALD_MAX_SPAM_SCORE")? {
            if !(0.0..=1.0).contains(&v) {
                return Err(AppError::ConfigError(format!(
                    "HERALD_MAX_SPAM_SCORE must be between 0 and 1, got {v}"
                )));
            }
            config.quality.max_spam_score = v;
        }
        if let Some(cap) = env.positive::<u32>("HERALD_EXCLAMATION_CAP")? {
            config.spam.exclamation = ExclamationMode::Absolute { cap };
        }

        if let Some(secs) = env.positive::<u64>("HERALD_CONNECT_TIMEOUT_SECS")? {
            config.http.connect = Duration::from_secs(secs);
        }
        if let Some(secs) = env.positive::<u64>("HERALD_READ_TIMEOUT_SECS")? {
            config.http.read = Duration::from_secs(secs);
        }
        if let Some(secs) = env.positive::<u64>("HERALD_PAGE_LOAD_TIMEOUT_SECS")? {
            config.render.content_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse::<u64>("HERALD_VERIFICATION_SLEEP_SECS")? {
            config.render.verification_sleep = Duration::from_secs(secs);
        }

        if let Some(n) = env.positive::<usize>("HERALD_MAX_BROWSERS")? {
            config.browser_pool.max_size = n;
        }
        if let Some(mb) = env.positive::<u64>("HERALD_BROWSER_MEMORY_MB")? {
            config.browser_pool.memory_per_resource_mb = Some(mb);
        }
        if let Some(n) = env.positive::<usize>("HERALD_MAX_HTTP_SESSIONS")? {
            config.http_pool.max_size = n;
        }

        if let Some(n) = env.positive::<usize>("HERALD_WORKERS")? {
            config.batch.workers = Some(n);
        }
        if let Some(secs) = env.positive::<u64>("HERALD_URL_TIMEOUT_SECS")? {
            config.batch.url_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env.positive::<usize>("HERALD_CHUNK_SIZE")? {
            config.batch.chunk_size = n;
        }
        if let Some(n) = env.parse::<usize>("HERALD_REFRESH_EVERY_CHUNKS")? {
            config.batch.refresh_every_chunks = n;
        }

        Ok(config)
    }
}

struct Env<L>(L);

impl<L: Fn(&str) -> Option<String>> Env<L> {
    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, AppError> {
        match (self.0)(key) {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                AppError::ConfigError(format!("Invalid {key} '{raw}'"))
            }),
        }
    }

    fn positive<T: FromStr + PartialOrd + Default>(&self, key: &str) -> Result<Option<T>, AppError> {
        match self.parse::<T>(key)? {
            Some(v) if v <= T::default() => Err(AppError::ConfigError(format!(
                "{key} must be greater than zero"
            ))),
            other => Ok(other),
        }
    }
}
