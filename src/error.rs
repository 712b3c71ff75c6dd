use std::time::Duration;
use thiserror::Error;
use tokio::sync::AcquireError;

#[derive(Debug, Clone, Error)]
pub enum CrawlError {
    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Page error: {0}")]
    PageError(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Semaphore acquire error: {0}")]
    SemaphoreError(String),

    #[error("Crawl cancelled")]
    Cancelled,
}

impl CrawlError {
    /// Whether a fetch that failed with this error may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrawlError::PageError(_)
                | CrawlError::NavigationFailed(_)
                | CrawlError::Timeout(_)
                | CrawlError::NetworkError(_)
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CrawlError::InvalidUrl(_) => ErrorSeverity::Low,
            CrawlError::Cancelled => ErrorSeverity::Low,
            CrawlError::EvaluationFailed(_) => ErrorSeverity::Low,
            CrawlError::ConfigurationError(_) => ErrorSeverity::High,
            CrawlError::BrowserLaunchFailed(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Medium,
        }
    }

    /// Fatal errors abort the whole crawl instead of a single page.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CrawlError::BrowserLaunchFailed(_) | CrawlError::ConfigurationError(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<AcquireError> for CrawlError {
    fn from(err: AcquireError) -> Self {
        CrawlError::SemaphoreError(err.to_string())
    }
}

impl From<std::io::Error> for CrawlError {
    fn from(err: std::io::Error) -> Self {
        CrawlError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for CrawlError {
    fn from(err: serde_json::Error) -> Self {
        CrawlError::SerializationError(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for CrawlError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        use chromiumoxide::error::CdpError;
        match err {
            CdpError::Timeout => CrawlError::NetworkError("CDP request timed out".to_string()),
            CdpError::Ws(e) => CrawlError::NetworkError(e.to_string()),
            CdpError::Io(e) => CrawlError::IoError(e.to_string()),
            other => CrawlError::PageError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CrawlError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(CrawlError::NavigationFailed("net::ERR_ABORTED".into()).is_retryable());
        assert!(!CrawlError::InvalidUrl("nope".into()).is_retryable());
        assert!(!CrawlError::EvaluationFailed("bad json".into()).is_retryable());
        assert!(!CrawlError::Cancelled.is_retryable());
    }

    #[test]
    fn test_fatal_and_severity() {
        let launch = CrawlError::BrowserLaunchFailed("no chrome".into());
        assert!(launch.is_fatal());
        assert_eq!(launch.severity(), ErrorSeverity::Critical);
        assert!(!CrawlError::PageError("closed".into()).is_fatal());
        assert_eq!(CrawlError::PageError("closed".into()).severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            CrawlError::Timeout(Duration::from_secs(30)).to_string(),
            "Timeout after 30s"
        );
        assert_eq!(CrawlError::Cancelled.to_string(), "Crawl cancelled");
    }
}
