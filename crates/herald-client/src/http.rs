use std::net::IpAddr;
use std::sync::Arc;

use herald_core::config::HttpTimeouts;
use herald_core::error::AppError;
use herald_core::pool::{PoolConfig, ResourceManager, ResourcePool};
use herald_core::traits::Fetcher;
use rand::seq::IndexedRandom;
use reqwest::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};
use url::Url;

/// Sessions are retired after this many requests.
const MAX_REQUESTS_PER_SESSION: u32 = 200;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

const ACCEPT_LANGUAGES: &[&str] = &["en-US,en;q=0.9", "en-GB,en;q=0.8", "en-US,en;q=0.8,de;q=0.5"];

/// One cookie-persisting HTTP client.
pub struct HttpSession {
    client: Client,
    timeouts: HttpTimeouts,
    requests: u32,
}

impl HttpSession {
    /// GET `url` with browser-like headers.
    pub async fn get(&mut self, url: &str) -> Result<String, AppError> {
        self.requests += 1;
        let headers = browser_headers();

        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| classify(e, &self.timeouts))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify(e, &self.timeouts))?;
        if body.trim().is_empty() {
            return Err(AppError::EmptyResponse);
        }
        Ok(body)
    }
}

fn classify(e: reqwest::Error, timeouts: &HttpTimeouts) -> AppError {
    classify_failure(e.is_connect(), e.is_timeout(), e.to_string(), timeouts)
}

/// Connect failures are checked first so a connect timeout reports the
/// connect budget rather than the read budget.
fn classify_failure(
    connect: bool,
    timed_out: bool,
    message: String,
    timeouts: &HttpTimeouts,
) -> AppError {
    match (connect, timed_out) {
        (true, true) => AppError::Timeout(timeouts.connect.as_secs()),
        (true, false) => AppError::NetworkError(format!("Connection failed: {message}")),
        (false, true) => AppError::Timeout(timeouts.read.as_secs()),
        (false, false) => AppError::HttpError(message),
    }
}

/// Header set for one request, with a randomly chosen user agent.
fn browser_headers() -> HeaderMap {
    let mut rng = rand::rng();
    let user_agent = USER_AGENTS.choose(&mut rng).copied().unwrap_or(USER_AGENTS[0]);
    let language = ACCEPT_LANGUAGES
        .choose(&mut rng)
        .copied()
        .unwrap_or(ACCEPT_LANGUAGES[0]);

    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(user_agent));
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static(language));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(header::DNT, HeaderValue::from_static("1"));
    headers
}

/// Builds [`HttpSession`]s for the pool.
#[derive(Debug, Clone, Default)]
pub struct HttpSessionManager {
    timeouts: HttpTimeouts,
}

impl HttpSessionManager {
    pub fn new(timeouts: HttpTimeouts) -> Self {
        Self { timeouts }
    }
}

impl ResourceManager for HttpSessionManager {
    type Resource = HttpSession;

    fn kind(&self) -> &'static str {
        "http"
    }

    async fn create(&self) -> Result<HttpSession, AppError> {
        let client = Client::builder()
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .connect_timeout(self.timeouts.connect)
            .read_timeout(self.timeouts.read)
            .build()
            .map_err(|e| AppError::PoolError(format!("Failed to build HTTP client: {e}")))?;
        Ok(HttpSession {
            client,
            timeouts: self.timeouts.clone(),
            requests: 0,
        })
    }

    async fn probe(&self, session: &mut HttpSession) -> bool {
        session.requests < MAX_REQUESTS_PER_SESSION
    }

    async fn destroy(&self, session: HttpSession) -> Result<(), AppError> {
        tracing::debug!(requests = session.requests, "Closing HTTP session");
        Ok(())
    }
}

/// Fast-tier fetcher: a plain GET through a pooled HTTP session.
///
/// URL validation is on by default and rejects non-HTTP schemes and hosts
/// that resolve to private or reserved addresses.
#[derive(Clone)]
pub struct HttpFetcher {
    pool: Arc<ResourcePool<HttpSessionManager>>,
    validate_urls: bool,
}

impl HttpFetcher {
    pub fn new(timeouts: HttpTimeouts, pool_config: &PoolConfig) -> Self {
        let pool = ResourcePool::new(HttpSessionManager::new(timeouts), pool_config);
        Self::with_pool(Arc::new(pool))
    }

    pub fn with_pool(pool: Arc<ResourcePool<HttpSessionManager>>) -> Self {
        Self {
            pool,
            validate_urls: true,
        }
    }

    /// Allow requests to private and loopback addresses.
    pub fn allow_private_urls(mut self) -> Self {
        self.validate_urls = false;
        self
    }

    pub fn pool(&self) -> &Arc<ResourcePool<HttpSessionManager>> {
        &self.pool
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        if self.validate_urls {
            validate_url(url).await?;
        }
        let mut session = self.pool.acquire().await?;
        let outcome = session.get(url).await;
        session.release().await;
        outcome
    }
}

/// Reject non-HTTP schemes and hosts resolving to private or reserved IPs.
///
/// Rejections are [`AppError::InvalidUrl`], which stops the scraper from
/// handing the URL to the browser tier.
async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::InvalidUrl(format!("{url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::InvalidUrl(format!(
            "URL scheme '{}' is not allowed",
            parsed.scheme()
        )));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::InvalidUrl(format!("{url} has no host")))?;

    let addrs: Vec<IpAddr> = match host.trim_matches(['[', ']']).parse::<IpAddr>() {
        Ok(ip) => vec![ip],
        Err(_) => {
            let port = parsed.port_or_known_default().unwrap_or(80);
            tokio::net::lookup_host((host, port))
                .await
                .map_err(|e| AppError::NetworkError(format!("DNS lookup failed for {host}: {e}")))?
                .map(|a| a.ip())
                .collect()
        }
    };

    match addrs.iter().find(|ip| is_reserved(**ip)) {
        Some(ip) => Err(AppError::InvalidUrl(format!(
            "Blocked request to {host}: resolves to reserved address {ip}"
        ))),
        None => Ok(()),
    }
}

fn is_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || (a == 100 && (b & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xFFC0) == 0xFE80
                || (first & 0xFE00) == 0xFC00
                || v6.to_ipv4_mapped().is_some_and(|v4| is_reserved(IpAddr::V4(v4)))
        }
    }
}
