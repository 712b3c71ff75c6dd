//! Configuration management with serde serialization/deserialization
//!
//! This module provides all configuration structures for the crawler, including
//! browser pool sizing, batch scheduling, extraction selectors and the
//! content-ready policy.

use crate::CrawlError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for the documentation crawler
///
/// Values are fixed for the lifetime of a process; a crawl request only carries
/// the seed URL.
///
/// # Examples
///
/// ```rust
/// use doc_crawler::Config;
///
/// // Use default configuration
/// let config = Config::default();
///
/// // Create custom configuration
/// let config = Config {
///     browser_pool_size: 2,
///     batch_size: 8,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of Chrome browser instances launched per crawl (default: 3)
    ///
    /// Handles are assigned round-robin; when `batch_size` is larger than the
    /// pool, several pages share one browser concurrently.
    pub browser_pool_size: usize,

    /// Maximum number of URLs dequeued and fetched as one batch (default: 5)
    pub batch_size: usize,

    /// Upper bound on fetches running at once inside a batch (default: 5)
    pub max_concurrent_fetches: usize,

    /// Navigation timeout for a single page (default: 30 seconds)
    pub navigation_timeout: Duration,

    /// Pause between two batches (default: 1 second)
    pub rate_limit: Duration,

    /// Retry policy for recoverable page failures (default: no retries)
    pub retry: RetryConfig,

    /// Resident memory above which a reclamation hint is issued (default: 1024 MB)
    pub memory_threshold_mb: u64,

    /// Heuristic "content ready" gate applied after navigation
    pub content_ready: ContentReadyPolicy,

    /// Selectors and filter used to harvest documentation links
    pub selectors: ExtractionSelectors,

    /// Resource types aborted by the request filter
    ///
    /// Names follow the DevTools `Network.ResourceType` values, compared
    /// case-insensitively.
    pub blocked_resource_types: Vec<String>,

    /// Network is considered idle after this long without new resource entries
    /// (default: 500ms)
    pub network_idle: Duration,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Custom User-Agent string for requests (default: Chrome default)
    pub user_agent: Option<String>,

    /// Capacity of the event channel handed to observers (default: 256)
    pub event_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser_pool_size: 3,
            batch_size: 5,
            max_concurrent_fetches: 5,
            navigation_timeout: Duration::from_secs(30),
            rate_limit: Duration::from_millis(1000),
            retry: RetryConfig::default(),
            memory_threshold_mb: 1024,
            content_ready: ContentReadyPolicy::default(),
            selectors: ExtractionSelectors::default(),
            blocked_resource_types: vec![
                "image".to_string(),
                "stylesheet".to_string(),
                "font".to_string(),
                "media".to_string(),
            ],
            network_idle: Duration::from_millis(500),
            chrome_path: None,
            user_agent: None,
            event_buffer: 256,
        }
    }
}

impl Config {
    /// Reject configurations that would stall or never schedule work.
    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.browser_pool_size == 0 {
            return Err(CrawlError::ConfigurationError(
                "Browser pool size must be greater than 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(CrawlError::ConfigurationError(
                "Batch size must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(CrawlError::ConfigurationError(
                "Max concurrent fetches must be greater than 0".to_string(),
            ));
        }
        if self.navigation_timeout.is_zero() {
            return Err(CrawlError::ConfigurationError(
                "Navigation timeout must be greater than 0".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(CrawlError::ConfigurationError(
                "Event buffer must be greater than 0".to_string(),
            ));
        }
        if self.selectors.link_selectors.is_empty() {
            return Err(CrawlError::ConfigurationError(
                "At least one link selector is required".to_string(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(CrawlError::ConfigurationError(
                "Retry multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the request filter should abort a resource of this type.
    pub fn blocks_resource_type(&self, resource_type: &str) -> bool {
        self.blocked_resource_types
            .iter()
            .any(|blocked| blocked.eq_ignore_ascii_case(resource_type))
    }

    /// Load a JSON configuration file.
    pub fn from_json_file(path: &std::path::Path) -> Result<Self, CrawlError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

/// Heuristic wait for "the page looks loaded"
///
/// The first selector to appear wins; if none appears before `ceiling`
/// elapses, extraction proceeds anyway. Reaching the ceiling is not an error.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContentReadyPolicy {
    /// Readiness marker selectors raced against each other
    pub selectors: Vec<String>,

    /// Maximum time spent waiting for any marker (default: 3 seconds)
    pub ceiling: Duration,

    /// Delay between two DOM checks of the same selector (default: 100ms)
    pub poll_interval: Duration,
}

impl Default for ContentReadyPolicy {
    fn default() -> Self {
        Self {
            selectors: vec![
                "nav.documentation-nav".to_string(),
                ".documentation-hero".to_string(),
            ],
            ceiling: Duration::from_secs(3),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Fixed selectors for documentation link harvesting
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractionSelectors {
    /// Anchor selectors queried in order; their `href`s form the candidate set
    pub link_selectors: Vec<String>,

    /// Only links containing this substring are kept
    pub link_filter: String,
}

impl Default for ExtractionSelectors {
    fn default() -> Self {
        Self {
            link_selectors: vec![
                "nav.documentation-nav a".to_string(),
                ".documentation-hero a".to_string(),
                "a[href^=\"/documentation/\"]".to_string(),
            ],
            link_filter: "/documentation/".to_string(),
        }
    }
}

/// Bounded retry with exponential backoff
///
/// `max_retries = 0` disables retries: a failed page is marked visited and
/// never fetched again.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (0-based), capped at `max_delay`.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let delay = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

/// Generate Chrome arguments with unique instance ID for browser pool isolation
///
/// Each instance gets its own user data directory and debugging port so that
/// several browsers can run side by side.
///
/// # Examples
///
/// ```rust
/// use doc_crawler::{Config, get_chrome_args_with_instance_id};
///
/// let config = Config::default();
/// let args = get_chrome_args_with_instance_id(&config, 0);
/// assert!(args.iter().any(|a| a == "--headless"));
/// ```
pub fn get_chrome_args_with_instance_id(config: &Config, instance_id: usize) -> Vec<String> {

    let mut args = vec![
        "--headless".to_string(),
        // Containers usually lack the privileges the sandbox needs.
        "--no-sandbox".to_string(),
        "--disable-setuid-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-accelerated-2d-canvas".to_string(),
        "--disable-gpu".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-features=TranslateUI".to_string(),
        format!("--user-data-dir={}", user_data_dir(instance_id).display()),
    ];

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

/// Profile directory of one pool instance, unique per process.
pub fn user_data_dir(instance_id: usize) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "doc-crawler-{}-{}",
        std::process::id(),
        instance_id
    ))
}

pub fn create_browser_config_with_instance_id(
    config: &Config,
    instance_id: usize,
) -> Result<chromiumoxide::browser::BrowserConfig, CrawlError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .args(get_chrome_args_with_instance_id(config, instance_id))
        .request_timeout(config.navigation_timeout);

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(CrawlError::ConfigurationError)
}
