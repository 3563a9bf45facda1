use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Which fetch tier produced a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMethod {
    /// Plain HTTP GET, no JavaScript.
    Fast,
    /// Full browser rendering.
    Reliable,
}

impl FetchMethod {
    /// Tiers in the order they are attempted.
    pub const ORDER: [FetchMethod; 2] = [FetchMethod::Fast, FetchMethod::Reliable];

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMethod::Fast => "fast",
            FetchMethod::Reliable => "reliable",
        }
    }
}

impl fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(FetchMethod::Fast),
            "reliable" => Ok(FetchMethod::Reliable),
            _ => Err(format!("Unknown fetch method: {s}")),
        }
    }
}

/// Terminal outcome of scraping one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScrapeStatus {
    Accepted,
    TooShort,
    HighSpam,
    FetchFailed,
    EmptyResponse,
    EmptyArticle,
    RetriesFailed,
    Timeout,
    Cancelled,
    /// Any other error, carrying its message.
    Error(String),
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ScrapeStatus::Accepted => "accepted",
            ScrapeStatus::TooShort => "text too short",
            ScrapeStatus::HighSpam => "high spam score",
            ScrapeStatus::FetchFailed => "fetch-failed",
            ScrapeStatus::EmptyResponse => "empty-response",
            ScrapeStatus::EmptyArticle => "empty-article",
            ScrapeStatus::RetriesFailed => "retries-failed",
            ScrapeStatus::Timeout => "timeout",
            ScrapeStatus::Cancelled => "cancelled",
            ScrapeStatus::Error(msg) => msg,
        }
    }

    /// True when extraction produced text that was judged by the quality gate.
    pub fn has_text(&self) -> bool {
        matches!(
            self,
            ScrapeStatus::Accepted | ScrapeStatus::TooShort | ScrapeStatus::HighSpam
        )
    }
}

impl fmt::Display for ScrapeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ScrapeStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "accepted" => ScrapeStatus::Accepted,
            "text too short" => ScrapeStatus::TooShort,
            "high spam score" => ScrapeStatus::HighSpam,
            "fetch-failed" => ScrapeStatus::FetchFailed,
            "empty-response" => ScrapeStatus::EmptyResponse,
            "empty-article" => ScrapeStatus::EmptyArticle,
            "retries-failed" => ScrapeStatus::RetriesFailed,
            "timeout" => ScrapeStatus::Timeout,
            "cancelled" => ScrapeStatus::Cancelled,
            _ => ScrapeStatus::Error(s),
        }
    }
}

impl From<ScrapeStatus> for String {
    fn from(status: ScrapeStatus) -> Self {
        match status {
            ScrapeStatus::Error(msg) => msg,
            other => other.as_str().to_string(),
        }
    }
}

/// Outcome of scraping a single URL.
///
/// Built only through the constructors below, which keep `full_text` and
/// `rejected_text` mutually exclusive and tie the populated fields to `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapeResult {
    url: String,
    full_text: Option<String>,
    word_count: Option<u32>,
    fetch_method: Option<FetchMethod>,
    elapsed_seconds: Option<f64>,
    status: ScrapeStatus,
    rejected_text: Option<String>,
    spam_score: Option<f64>,
}

impl ScrapeResult {
    pub fn accepted(
        url: impl Into<String>,
        text: String,
        word_count: u32,
        method: FetchMethod,
        elapsed_seconds: f64,
        spam_score: f64,
    ) -> Self {
        Self {
            url: url.into(),
            full_text: Some(text),
            word_count: Some(word_count),
            fetch_method: Some(method),
            elapsed_seconds: Some(elapsed_seconds),
            status: ScrapeStatus::Accepted,
            rejected_text: None,
            spam_score: Some(spam_score),
        }
    }

    /// Text below the minimum length. Spam scoring never ran.
    pub fn rejected_short(
        url: impl Into<String>,
        text: String,
        word_count: u32,
        method: FetchMethod,
        elapsed_seconds: f64,
    ) -> Self {
        Self {
            url: url.into(),
            full_text: None,
            word_count: Some(word_count),
            fetch_method: Some(method),
            elapsed_seconds: Some(elapsed_seconds),
            status: ScrapeStatus::TooShort,
            rejected_text: Some(text),
            spam_score: None,
        }
    }

    pub fn rejected_spam(
        url: impl Into<String>,
        text: String,
        word_count: u32,
        method: FetchMethod,
        elapsed_seconds: f64,
        spam_score: f64,
    ) -> Self {
        Self {
            url: url.into(),
            full_text: None,
            word_count: Some(word_count),
            fetch_method: Some(method),
            elapsed_seconds: Some(elapsed_seconds),
            status: ScrapeStatus::HighSpam,
            rejected_text: Some(text),
            spam_score: Some(spam_score),
        }
    }

    /// No text was extracted by any tier.
    pub fn failed(
        url: impl Into<String>,
        status: ScrapeStatus,
        elapsed_seconds: Option<f64>,
    ) -> Self {
        Self {
            url: url.into(),
            full_text: None,
            word_count: None,
            fetch_method: None,
            elapsed_seconds,
            status,
            rejected_text: None,
            spam_score: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn full_text(&self) -> Option<&str> {
        self.full_text.as_deref()
    }

    pub fn word_count(&self) -> Option<u32> {
        self.word_count
    }

    pub fn fetch_method(&self) -> Option<FetchMethod> {
        self.fetch_method
    }

    pub fn elapsed_seconds(&self) -> Option<f64> {
        self.elapsed_seconds
    }

    pub fn status(&self) -> &ScrapeStatus {
        &self.status
    }

    pub fn rejected_text(&self) -> Option<&str> {
        self.rejected_text.as_deref()
    }

    pub fn spam_score(&self) -> Option<f64> {
        self.spam_score
    }

    pub fn is_success(&self) -> bool {
        self.status == ScrapeStatus::Accepted
    }
}

/// News metadata row, as written by the ingestion stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsMetadata {
    pub news_id: String,
    pub news_url: String,
    pub title: Option<String>,
    pub source_name: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Row of the scraped-articles table, keyed by `news_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapedArticle {
    pub news_id: String,
    pub news_url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub full_text: Option<String>,
    pub word_count: Option<u32>,
    pub fetch_method: Option<FetchMethod>,
    pub elapsed_seconds: Option<f64>,
    pub status: String,
    pub rejected_text: Option<String>,
    pub spam_score: Option<f64>,
    /// SHA-256 of `full_text`, when accepted.
    pub content_hash: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

impl ScrapedArticle {
    /// Join a metadata row with the scrape result for its URL.
    pub fn from_result(
        metadata: &NewsMetadata,
        result: &ScrapeResult,
        scraped_at: DateTime<Utc>,
    ) -> Self {
        Self {
            news_id: metadata.news_id.clone(),
            news_url: metadata.news_url.clone(),
            published_at: metadata.published_at,
            full_text: result.full_text().map(str::to_string),
            word_count: result.word_count(),
            fetch_method: result.fetch_method(),
            elapsed_seconds: result.elapsed_seconds(),
            status: result.status().to_string(),
            rejected_text: result.rejected_text().map(str::to_string),
            spam_score: result.spam_score(),
            content_hash: result.full_text().map(compute_hash),
            scraped_at,
        }
    }
}

/// Pipeline stage completion flags in the status table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    MetadataFetched,
    Scraped,
    Cleaned,
    LlmProcessed,
}

impl Stage {
    /// Column name of the flag in the status table.
    pub fn column(&self) -> &'static str {
        match self {
            Stage::MetadataFetched => "metadata_fetched",
            Stage::Scraped => "scraped",
            Stage::Cleaned => "cleaned",
            Stage::LlmProcessed => "llm_processed",
        }
    }

    /// The stage that must be complete before this one can run.
    pub fn prerequisite(&self) -> Option<Stage> {
        match self {
            Stage::MetadataFetched => None,
            Stage::Scraped => Some(Stage::MetadataFetched),
            Stage::Cleaned => Some(Stage::Scraped),
            Stage::LlmProcessed => Some(Stage::Cleaned),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Row of the status table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleStatus {
    pub news_id: String,
    pub metadata_fetched: bool,
    pub scraped: bool,
    pub cleaned: bool,
    pub llm_processed: bool,
}

impl ArticleStatus {
    pub fn is_set(&self, stage: Stage) -> bool {
        match stage {
            Stage::MetadataFetched => self.metadata_fetched,
            Stage::Scraped => self.scraped,
            Stage::Cleaned => self.cleaned,
            Stage::LlmProcessed => self.llm_processed,
        }
    }

    pub fn set(&mut self, stage: Stage) {
        match stage {
            Stage::MetadataFetched => self.metadata_fetched = true,
            Stage::Scraped => self.scraped = true,
            Stage::Cleaned => self.cleaned = true,
            Stage::LlmProcessed => self.llm_processed = true,
        }
    }

    /// Pending for `stage`: prerequisite done, stage itself not yet.
    pub fn is_pending(&self, stage: Stage) -> bool {
        let ready = stage.prerequisite().is_none_or(|prev| self.is_set(prev));
        ready && !self.is_set(stage)
    }
}

/// Per-stage counts of completed articles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: i64,
    pub metadata_fetched: i64,
    pub scraped: i64,
    pub cleaned: i64,
    pub llm_processed: i64,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
