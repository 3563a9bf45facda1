use thiserror::Error;

/// Application-wide error types for Herald.
#[derive(Error, Debug)]
pub enum AppError {
    /// The server answered with a non-success status code.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// HTTP request failed before a status was received.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The URL failed validation and must not be fetched by any tier.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Browser navigation or CDP call failed.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// The fetch succeeded but the body was empty.
    #[error("Empty response body")]
    EmptyResponse,

    /// The page was fetched but no article text could be extracted.
    #[error("No article text extracted")]
    EmptyArticle,

    /// A bot-challenge page was still shown after the refresh retry.
    #[error("Bot challenge persisted after refresh")]
    ChallengePersisted,

    /// Request or wait timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The batch was cancelled before this URL was dispatched.
    #[error("Cancelled before processing")]
    Cancelled,

    /// HTML-to-text extraction failed.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// A pooled resource could not be created or the pool is closed.
    #[error("Pool error: {0}")]
    PoolError(String),

    /// Persistence layer failure.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and the URL is worth re-queuing.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::ChallengePersisted
            | AppError::Cancelled
            | AppError::PoolError(_) => true,
            AppError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            AppError::HttpError(msg) | AppError::BrowserError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if no other fetch tier should be tried for this URL.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppError::InvalidUrl(_))
    }

    /// The status tag recorded on a failed [`ScrapeResult`](crate::models::ScrapeResult).
    pub fn status(&self) -> crate::models::ScrapeStatus {
        use crate::models::ScrapeStatus;

        match self {
            AppError::HttpStatus { .. }
            | AppError::HttpError(_)
            | AppError::NetworkError(_)
            | AppError::BrowserError(_)
            | AppError::InvalidUrl(_) => ScrapeStatus::FetchFailed,
            AppError::EmptyResponse => ScrapeStatus::EmptyResponse,
            AppError::EmptyArticle => ScrapeStatus::EmptyArticle,
            AppError::ChallengePersisted => ScrapeStatus::RetriesFailed,
            AppError::Timeout(_) => ScrapeStatus::Timeout,
            AppError::Cancelled => ScrapeStatus::Cancelled,
            other => ScrapeStatus::Error(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScrapeStatus;

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::NetworkError("reset".into()).is_retryable());
        assert!(AppError::Timeout(30).is_retryable());
        assert!(AppError::ChallengePersisted.is_retryable());
        assert!(
            AppError::HttpStatus {
                status: 503,
                url: "https://example.com".into()
            }
            .is_retryable()
        );
        assert!(
            !AppError::HttpStatus {
                status: 404,
                url: "https://example.com".into()
            }
            .is_retryable()
        );
        assert!(!AppError::EmptyArticle.is_retryable());
        assert!(!AppError::InvalidUrl("http://10.0.0.1/".into()).is_retryable());
    }

    #[test]
    fn test_only_invalid_urls_are_terminal() {
        assert!(AppError::InvalidUrl("file:///etc/passwd".into()).is_terminal());
        assert!(!AppError::HttpError("connect refused".into()).is_terminal());
        assert!(!AppError::EmptyArticle.is_terminal());
        assert_eq!(
            AppError::InvalidUrl("http://127.0.0.1/".into()).status(),
            ScrapeStatus::FetchFailed
        );
    }

    #[test]
    fn test_status_mapping() {
        let not_found = AppError::HttpStatus {
            status: 404,
            url: "https://example.com".into(),
        };
        assert_eq!(not_found.status(), ScrapeStatus::FetchFailed);
        assert_eq!(
            AppError::BrowserError("navigation".into()).status(),
            ScrapeStatus::FetchFailed
        );
        assert_eq!(AppError::EmptyResponse.status(), ScrapeStatus::EmptyResponse);
        assert_eq!(AppError::EmptyArticle.status(), ScrapeStatus::EmptyArticle);
        assert_eq!(
            AppError::ChallengePersisted.status(),
            ScrapeStatus::RetriesFailed
        );
        assert_eq!(AppError::Timeout(15).status(), ScrapeStatus::Timeout);
    }

    #[test]
    fn test_unclassified_errors_keep_their_message() {
        let status = AppError::Generic("decoder exploded".into()).status();
        assert_eq!(status, ScrapeStatus::Error("decoder exploded".into()));
        assert_eq!(status.to_string(), "decoder exploded");
    }
}
