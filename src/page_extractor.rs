//! Page extraction: navigation, resource blocking, readiness gate and harvesting
//!
//! [`PageFetcher::fetch`] never fails: every navigation, timeout or
//! evaluation error is folded into [`FetchOutcome::Failure`], so one bad page
//! cannot abort a crawl.

use crate::{BrowserInstance, Config, CrawlError};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams,
};
use chromiumoxide::cdp::browser_protocol::network::ErrorReason;
use chromiumoxide::Page;
use futures::future::select_all;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything harvested from one successfully loaded page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageData {
    pub url: String,
    pub title: String,
    /// Documentation links in discovery order, without duplicates
    pub links: Vec<String>,
    /// `<meta>` name/property → content, last tag wins
    pub metadata: BTreeMap<String, String>,
}

/// Result of fetching one URL. Always carries the URL it was issued for.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(PageData),
    Failure {
        url: String,
        error: String,
        retryable: bool,
    },
}

impl FetchOutcome {
    pub fn failure(url: &str, error: &CrawlError) -> Self {
        FetchOutcome::Failure {
            url: url.to_string(),
            error: error.to_string(),
            retryable: error.is_retryable(),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            FetchOutcome::Success(page) => &page.url,
            FetchOutcome::Failure { url, .. } => url,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchOutcome::Failure { retryable: true, .. })
    }
}

/// Fetches and extracts one page using a borrowed rendering handle
///
/// Implementations must not keep the handle after `fetch` returns and must
/// never panic or propagate errors past this boundary. Callers never drop an
/// in-flight fetch: cancellation arrives through `cancel`, and the fetch
/// releases whatever it opened before returning a `Cancelled` failure.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    type Handle: Send + Sync + 'static;

    async fn fetch(
        &self,
        url: &str,
        handle: &Self::Handle,
        cancel: &CancellationToken,
    ) -> FetchOutcome;
}

/// Merge per-selector `href` lists into one ordered, duplicate-free list of
/// links containing `filter`.
pub fn harvest_links<I, G>(groups: I, filter: &str) -> Vec<String>
where
    I: IntoIterator<Item = G>,
    G: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for href in groups.into_iter().flatten() {
        if href.is_empty() || !href.contains(filter) {
            continue;
        }
        if seen.insert(href.clone()) {
            links.push(href);
        }
    }
    links
}

/// Fold `(name-or-property, content)` pairs from `<meta>` tags into a map.
/// Later tags overwrite earlier ones; a missing `content` becomes empty.
pub fn collect_metadata<I>(tags: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, Option<String>)>,
{
    let mut metadata = BTreeMap::new();
    for (key, content) in tags {
        if key.is_empty() {
            continue;
        }
        metadata.insert(key, content.unwrap_or_default());
    }
    metadata
}

/// Race readiness checks against `ceiling`.
///
/// Returns the index of the first check to finish, or `None` when the ceiling
/// elapses first or there are no checks.
pub async fn first_ready<I, F>(checks: I, ceiling: Duration) -> Option<usize>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = ()>,
{
    let checks: Vec<_> = checks.into_iter().map(Box::pin).collect();
    if checks.is_empty() {
        return None;
    }
    match timeout(ceiling, select_all(checks)).await {
        Ok((_, index, _)) => Some(index),
        Err(_) => None,
    }
}

fn link_harvest_script(selectors: &[String]) -> Result<String, CrawlError> {
    let selectors = serde_json::to_string(selectors)?;
    Ok(format!(
        r#"(() => {{
            const selectors = {selectors};
            return selectors.map(selector =>
                Array.from(document.querySelectorAll(selector))
                    .map(a => a.href)
                    .filter(href => typeof href === 'string' && href.length > 0));
        }})()"#
    ))
}

const METADATA_SCRIPT: &str = r#"(() => Array.from(document.querySelectorAll('meta'))
    .map(meta => [meta.getAttribute('name') || meta.getAttribute('property'), meta.getAttribute('content')])
    .filter(pair => pair[0]))()"#;

const LOAD_STATE_SCRIPT: &str = r#"(() => ({
    readyState: document.readyState,
    resources: performance.getEntriesByType('resource').length
}))()"#;

#[derive(Debug, Deserialize)]
struct LoadState {
    #[serde(rename = "readyState")]
    ready_state: String,
    resources: usize,
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Chrome-backed extractor
pub struct ChromeExtractor {
    config: Arc<Config>,
}

impl ChromeExtractor {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Abort requests for blocked resource types, continue everything else.
    async fn install_request_filter(&self, page: &Page) -> Result<AbortOnDrop, CrawlError> {
        let mut paused = page.event_listener::<EventRequestPaused>().await?;
        let intercept_page = page.clone();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let resource_type = format!("{:?}", event.resource_type);
                let result = if config.blocks_resource_type(&resource_type) {
                    intercept_page
                        .execute(FailRequestParams::new(
                            event.request_id.clone(),
                            ErrorReason::BlockedByClient,
                        ))
                        .await
                        .map(|_| ())
                } else {
                    intercept_page
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                };
                if let Err(e) = result {
                    debug!("Request interception failed for {}: {}", event.request.url, e);
                }
            }
        });

        page.execute(EnableParams::default()).await?;
        Ok(AbortOnDrop(task))
    }

    /// Wait until the document is parsed and the resource count has stayed
    /// flat for the configured quiet window.
    ///
    /// Only completed `performance` resource entries are counted, so this is
    /// looser than "no open connections": a long-running XHR that has not
    /// finished adds no entry and the page looks idle. The resource-timing
    /// buffer also stops growing at its limit (250 entries by default),
    /// after which the count is flat regardless of traffic.
    async fn wait_for_network_idle(&self, page: &Page) -> Result<(), CrawlError> {
        let poll_interval = Duration::from_millis(100);
        let mut last_resources = None;
        let mut quiet_since = Instant::now();

        loop {
            let state: LoadState = page
                .evaluate(LOAD_STATE_SCRIPT)
                .await
                .map_err(|e| CrawlError::EvaluationFailed(e.to_string()))?
                .into_value()
                .map_err(|e| CrawlError::EvaluationFailed(e.to_string()))?;

            if last_resources != Some(state.resources) {
                last_resources = Some(state.resources);
                quiet_since = Instant::now();
            }

            let parsed = state.ready_state == "interactive" || state.ready_state == "complete";
            if parsed && quiet_since.elapsed() >= self.config.network_idle {
                return Ok(());
            }
            sleep(poll_interval).await;
        }
    }

    async fn navigate(&self, page: &Page, url: &str) -> Result<(), CrawlError> {
        let navigation = async {
            page.goto(url)
                .await
                .map_err(|e| CrawlError::NavigationFailed(e.to_string()))?;
            self.wait_for_network_idle(page).await
        };

        match timeout(self.config.navigation_timeout, navigation).await {
            Ok(result) => result,
            Err(_) => Err(CrawlError::Timeout(self.config.navigation_timeout)),
        }
    }

    async fn wait_for_content(&self, page: &Page, url: &str) {
        let policy = &self.config.content_ready;
        let checks = policy.selectors.iter().map(|selector| async move {
            while page.find_element(selector.as_str()).await.is_err() {
                sleep(policy.poll_interval).await;
            }
        });

        match first_ready(checks, policy.ceiling).await {
            Some(index) => debug!("{} ready on '{}'", url, policy.selectors[index]),
            None => debug!("{} reached the {:?} content ceiling", url, policy.ceiling),
        }
    }

    async fn extract(&self, page: &Page, url: &str) -> Result<PageData, CrawlError> {
        let _filter = self.install_request_filter(page).await?;

        self.navigate(page, url).await?;
        self.wait_for_content(page, url).await;

        let script = link_harvest_script(&self.config.selectors.link_selectors)?;
        let groups: Vec<Vec<String>> = page
            .evaluate(script)
            .await
            .map_err(|e| CrawlError::EvaluationFailed(e.to_string()))?
            .into_value()
            .map_err(|e| CrawlError::EvaluationFailed(e.to_string()))?;
        let links = harvest_links(groups, &self.config.selectors.link_filter);

        let title = page
            .get_title()
            .await
            .map_err(|e| CrawlError::EvaluationFailed(e.to_string()))?
            .unwrap_or_default();

        let tags: Vec<(String, Option<String>)> = page
            .evaluate(METADATA_SCRIPT)
            .await
            .map_err(|e| CrawlError::EvaluationFailed(e.to_string()))?
            .into_value()
            .map_err(|e| CrawlError::EvaluationFailed(e.to_string()))?;

        Ok(PageData {
            url: url.to_string(),
            title,
            links,
            metadata: collect_metadata(tags),
        })
    }
}

#[async_trait]
impl PageFetcher for ChromeExtractor {
    type Handle = BrowserInstance;

    async fn fetch(
        &self,
        url: &str,
        handle: &BrowserInstance,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let page = match handle.open_page().await {
            Ok(page) => page,
            Err(e) => {
                warn!("Failed to open page for {} on browser {}: {}", url, handle.id, e);
                return FetchOutcome::failure(url, &e);
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CrawlError::Cancelled),
            result = self.extract(&page, url) => result,
        };

        handle.close_page(page).await;

        match result {
            Ok(data) => {
                debug!("Extracted {} links from {}", data.links.len(), url);
                FetchOutcome::Success(data)
            }
            Err(e) => {
                warn!("Error fetching {}: {}", url, e);
                FetchOutcome::failure(url, &e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_harvest_dedups_across_selectors() {
        let nav = strings(&[
            "https://site/documentation/swift",
            "https://site/documentation/uikit",
        ]);
        let hero = strings(&["https://site/documentation/swift"]);
        let prefixed = strings(&[
            "https://site/documentation/uikit",
            "https://site/documentation/appkit",
        ]);

        let links = harvest_links(vec![nav, hero, prefixed], "/documentation/");
        assert_eq!(
            links,
            strings(&[
                "https://site/documentation/swift",
                "https://site/documentation/uikit",
                "https://site/documentation/appkit",
            ])
        );
    }

    #[test]
    fn test_harvest_filters_non_documentation_links() {
        let groups = vec![strings(&[
            "https://site/news",
            "",
            "https://site/documentation/foundation",
            "https://other/DOCUMENTATION/x",
        ])];
        let links = harvest_links(groups, "/documentation/");
        assert_eq!(links, strings(&["https://site/documentation/foundation"]));
    }

    #[test]
    fn test_harvest_keeps_query_sensitive_urls_distinct() {
        let groups = vec![strings(&[
            "https://site/documentation/a?x=1",
            "https://site/documentation/a?x=2",
            "https://site/documentation/a?x=1",
        ])];
        assert_eq!(harvest_links(groups, "/documentation/").len(), 2);
    }

    #[test]
    fn test_metadata_last_wins() {
        let tags = vec![
            ("description".to_string(), Some("first".to_string())),
            ("og:title".to_string(), Some("Swift".to_string())),
            ("description".to_string(), Some("second".to_string())),
            ("robots".to_string(), None),
        ];
        let metadata = collect_metadata(tags);

        assert_eq!(metadata.len(), 3);
        assert_eq!(metadata["description"], "second");
        assert_eq!(metadata["og:title"], "Swift");
        assert_eq!(metadata["robots"], "");
    }

    #[test]
    fn test_link_harvest_script_embeds_selectors() {
        let config = Config::default();
        let script = link_harvest_script(&config.selectors.link_selectors).unwrap();
        assert!(script.contains(r#""nav.documentation-nav a""#));
        assert!(script.contains(r#""a[href^=\"/documentation/\"]""#));
    }

    #[test]
    fn test_outcome_accessors() {
        let failure = FetchOutcome::failure(
            "https://site/documentation/x",
            &CrawlError::Timeout(Duration::from_secs(30)),
        );
        assert_eq!(failure.url(), "https://site/documentation/x");
        assert!(!failure.is_success());
        assert!(failure.is_retryable());

        let failure = FetchOutcome::failure("u", &CrawlError::EvaluationFailed("x".into()));
        assert!(!failure.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_ready_returns_fastest_check() {
        let checks: Vec<std::pin::Pin<Box<dyn Future<Output = ()>>>> = vec![
            Box::pin(sleep(Duration::from_millis(800))),
            Box::pin(sleep(Duration::from_millis(200))),
        ];
        assert_eq!(first_ready(checks, Duration::from_secs(3)).await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_ready_ceiling_is_not_an_error() {
        let start = tokio::time::Instant::now();
        let checks = vec![
            futures::future::pending::<()>(),
            futures::future::pending::<()>(),
        ];
        assert_eq!(first_ready(checks, Duration::from_secs(3)).await, None);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_first_ready_without_checks() {
        let checks: Vec<futures::future::Ready<()>> = Vec::new();
        assert_eq!(first_ready(checks, Duration::from_secs(3)).await, None);
    }
}
