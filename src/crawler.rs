//! Crawl orchestration
//!
//! A [`Crawler`] drives one barrier-synchronized loop per crawl: take a batch
//! from the [`Frontier`], fetch every URL in it concurrently against the
//! [`ResourcePool`], fold the outcomes once the whole batch has settled, then
//! report progress and pause before the next batch. Counters live in a
//! per-call [`CrawlSession`], so one `Crawler` can run several crawls.

use crate::{
    ChromeExtractor, ChromeLauncher, CompleteStats, Config, CrawlError,
    CrawlEvent, CrawlFailure, CrawlMetrics, EventSink, FetchOutcome, Frontier, HandleLauncher,
    MemoryMonitor, PageFetcher, ProgressUpdate, ResourcePool,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle of the orchestrator, published on a `watch` channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrawlState {
    Idle,
    Initializing,
    Running,
    Draining,
    Done,
    Failed,
}

impl CrawlState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CrawlState::Done | CrawlState::Failed)
    }
}

/// Running totals of one crawl
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlStats {
    pub processed_pages: usize,
    pub found_links: usize,
    pub failed_pages: usize,
    pub batches: usize,
}

impl CrawlStats {
    /// Fold one fetch outcome into the totals.
    pub fn record(&mut self, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Success(page) => {
                self.processed_pages += 1;
                self.found_links += page.links.len();
            }
            FetchOutcome::Failure { .. } => self.failed_pages += 1,
        }
    }
}

/// Approximate completion: processed / (processed + queued).
///
/// Not monotonic, since newly discovered links grow the denominator. Defined
/// as 1.0 when nothing was processed and nothing remains.
pub fn progress_ratio(processed: usize, queued: usize) -> f64 {
    let total = processed + queued;
    if total == 0 {
        1.0
    } else {
        processed as f64 / total as f64
    }
}

/// State owned by a single crawl invocation
pub struct CrawlSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub frontier: Frontier,
    pub stats: CrawlStats,
    started: Instant,
}

impl CrawlSession {
    pub fn new(start_url: &str) -> Self {
        let frontier = Frontier::new();
        frontier.add(start_url);
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            frontier,
            stats: CrawlStats::default(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// What a finished crawl returns to its caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlReport {
    pub crawl_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub state: CrawlState,
    /// Resident memory in MB before the crawl
    pub memory_before: u64,
    /// Resident memory in MB after the crawl
    pub memory_after: u64,
    pub processed_pages: usize,
    pub found_links: usize,
    pub failed_pages: usize,
    pub batches: usize,
    pub total_time: Duration,
    pub cancelled: bool,
}

impl CrawlReport {
    pub fn pages_per_second(&self) -> f64 {
        let secs = self.total_time.as_secs_f64();
        if secs > 0.0 {
            self.processed_pages as f64 / secs
        } else {
            0.0
        }
    }

    pub fn complete_stats(&self) -> CompleteStats {
        CompleteStats {
            total_time: self.total_time.as_secs_f64(),
            pages_per_second: self.pages_per_second(),
            processed_pages: self.processed_pages,
            found_links: self.found_links,
            memory_before: self.memory_before,
            memory_after: self.memory_after,
            cancelled: self.cancelled,
        }
    }
}

/// Breadth-first documentation crawler over a pool of rendering handles
pub struct Crawler<L, F> {
    config: Config,
    launcher: L,
    fetcher: F,
    memory: MemoryMonitor,
    metrics: CrawlMetrics,
    state: watch::Sender<CrawlState>,
}

/// Crawler backed by headless Chrome
pub type ChromeCrawler = Crawler<ChromeLauncher, ChromeExtractor>;

impl ChromeCrawler {
    pub fn chrome(config: Config) -> Self {
        let launcher = ChromeLauncher::new(config.clone());
        let fetcher = ChromeExtractor::new(config.clone());
        Self::new(config, launcher, fetcher)
    }
}

impl<L, F> Crawler<L, F>
where
    L: HandleLauncher,
    F: PageFetcher<Handle = L::Handle>,
{
    pub fn new(config: Config, launcher: L, fetcher: F) -> Self {
        let memory = MemoryMonitor::new(config.memory_threshold_mb);
        let (state, _) = watch::channel(CrawlState::Idle);
        Self {
            config,
            launcher,
            fetcher,
            memory,
            metrics: CrawlMetrics::new(),
            state,
        }
    }

    pub fn with_memory_monitor(mut self, memory: MemoryMonitor) -> Self {
        self.memory = memory;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn state(&self) -> CrawlState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CrawlState> {
        self.state.subscribe()
    }

    /// Crawl everything reachable from `start_url` without cancellation.
    pub async fn crawl(&self, start_url: &str, events: EventSink) -> Result<CrawlReport, CrawlError> {
        self.crawl_with_cancellation(start_url, events, CancellationToken::new())
            .await
    }

    /// Crawl everything reachable from `start_url`.
    ///
    /// Per-page failures are absorbed. Only fatal setup failures return an
    /// error, after an `error` event and without a `complete` event.
    /// Cancelling `cancel` stops dispatching, drains the pool and returns a
    /// report flagged `cancelled`.
    pub async fn crawl_with_cancellation(
        &self,
        start_url: &str,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Result<CrawlReport, CrawlError> {
        self.transition(CrawlState::Initializing);
        let mut session = CrawlSession::new(start_url);
        info!("Starting crawl {} from {}", session.id, start_url);

        let memory_before = self.memory.sample();

        let pool = match self.initialize().await {
            Ok(pool) => pool,
            Err(e) => {
                error!("Crawl {} failed to initialize: {}", session.id, e);
                self.transition(CrawlState::Failed);
                events
                    .emit(CrawlEvent::Error(CrawlFailure {
                        message: e.to_string(),
                        memory_usage: Some(self.memory.usage()),
                    }))
                    .await;
                return Err(e);
            }
        };

        self.transition(CrawlState::Running);
        let cancelled = self.run(&mut session, &pool, &events, &cancel).await;

        self.transition(CrawlState::Draining);
        pool.shutdown(&self.launcher).await;
        let memory_after = self.memory.sample();

        self.transition(CrawlState::Done);
        let report = CrawlReport {
            crawl_id: session.id,
            started_at: session.started_at,
            state: CrawlState::Done,
            memory_before,
            memory_after,
            processed_pages: session.stats.processed_pages,
            found_links: session.stats.found_links,
            failed_pages: session.stats.failed_pages,
            batches: session.stats.batches,
            total_time: session.elapsed(),
            cancelled,
        };

        info!(
            "Crawl {} finished: {} pages, {} links, {} failed in {:?}{}",
            report.crawl_id,
            report.processed_pages,
            report.found_links,
            report.failed_pages,
            report.total_time,
            if cancelled { " (cancelled)" } else { "" }
        );

        events
            .emit(CrawlEvent::Complete {
                stats: report.complete_stats(),
            })
            .await;

        Ok(report)
    }

    async fn initialize(&self) -> Result<ResourcePool<L::Handle>, CrawlError> {
        self.config.validate()?;
        ResourcePool::initialize(&self.launcher, self.config.browser_pool_size).await
    }

    /// Batch loop. Returns whether it stopped because of cancellation.
    async fn run(
        &self,
        session: &mut CrawlSession,
        pool: &ResourcePool<L::Handle>,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> bool {
        while session.frontier.has_more() {
            if cancel.is_cancelled() {
                info!(
                    "Crawl {} cancelled with {} URLs queued",
                    session.id,
                    session.frontier.queued_len()
                );
                return true;
            }

            let batch = session.frontier.next_batch(self.config.batch_size);
            debug!("Dispatching batch of {} URLs", batch.len());

            let outcomes = self.fetch_batch(&batch, pool, cancel).await;

            for outcome in outcomes {
                session.stats.record(&outcome);
                match &outcome {
                    FetchOutcome::Success(page) => {
                        for link in &page.links {
                            session.frontier.add(link);
                        }
                        events.emit(CrawlEvent::Result(page.clone())).await;
                    }
                    FetchOutcome::Failure { url, error, .. } => {
                        warn!("Failed to crawl {}: {}", url, error);
                    }
                }
                session.frontier.mark_visited(outcome.url());
            }

            session.stats.batches += 1;
            let queued = session.frontier.queued_len();
            self.metrics.record_batch(queued);

            events
                .emit(CrawlEvent::Progress(ProgressUpdate {
                    progress: progress_ratio(session.stats.processed_pages, queued),
                    processed_pages: session.stats.processed_pages,
                    found_links: session.stats.found_links,
                    memory_usage: Some(self.memory.usage()),
                }))
                .await;

            self.memory.maybe_reclaim();

            if session.frontier.has_more() && !self.config.rate_limit.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.rate_limit) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        cancel.is_cancelled()
    }

    async fn fetch_batch(
        &self,
        batch: &[String],
        pool: &ResourcePool<L::Handle>,
        cancel: &CancellationToken,
    ) -> Vec<FetchOutcome> {
        let limiter = Semaphore::new(self.config.max_concurrent_fetches);
        join_all(
            batch
                .iter()
                .map(|url| self.fetch_one(url, pool, &limiter, cancel)),
        )
        .await
    }

    /// Fetch one URL, retrying retryable failures on a fresh handle.
    ///
    /// Metrics record the final outcome once per URL; each retry is counted
    /// separately.
    async fn fetch_one(
        &self,
        url: &str,
        pool: &ResourcePool<L::Handle>,
        limiter: &Semaphore,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        let _permit = match limiter.acquire().await {
            Ok(permit) => permit,
            Err(e) => return FetchOutcome::failure(url, &CrawlError::from(e)),
        };

        let retry = &self.config.retry;
        let started = Instant::now();
        let mut attempt = 0;
        let outcome = loop {
            let handle = pool.acquire();
            let outcome = self.fetcher.fetch(url, &*handle, cancel).await;

            if !outcome.is_retryable() || attempt >= retry.max_retries || cancel.is_cancelled() {
                break outcome;
            }

            let delay = retry.delay_for(attempt);
            attempt += 1;
            debug!(
                "Retrying {} (attempt {}/{}) in {:?}",
                url, attempt, retry.max_retries, delay
            );
            self.metrics.record_retry();

            let cancelled = tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = cancel.cancelled() => true,
            };
            if cancelled {
                break outcome;
            }
        };

        let links = match &outcome {
            FetchOutcome::Success(page) => page.links.len(),
            FetchOutcome::Failure { .. } => 0,
        };
        self.metrics
            .record_fetch(started.elapsed(), outcome.is_success(), links);
        outcome
    }

    fn transition(&self, next: CrawlState) {
        let previous = self.state.send_replace(next);
        debug!("Crawl state {:?} -> {:?}", previous, next);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageData;
    use std::collections::BTreeMap;

    fn page(url: &str, links: &[&str]) -> FetchOutcome {
        FetchOutcome::Success(PageData {
            url: url.to_string(),
            title: String::new(),
            links: links.iter().map(|l| l.to_string()).collect(),
            metadata: BTreeMap::new(),
        })
    }

    #[test]
    fn test_progress_ratio() {
        assert_eq!(progress_ratio(0, 0), 1.0);
        assert_eq!(progress_ratio(0, 4), 0.0);
        assert_eq!(progress_ratio(1, 3), 0.25);
        assert_eq!(progress_ratio(5, 0), 1.0);
    }

    #[test]
    fn test_progress_can_move_backwards() {
        let early = progress_ratio(1, 1);
        let later = progress_ratio(2, 6);
        assert!(later < early);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = CrawlStats::default();
        stats.record(&page("a", &["b", "c"]));
        stats.record(&page("b", &[]));
        stats.record(&FetchOutcome::failure("c", &CrawlError::Timeout(Duration::from_secs(30))));

        assert_eq!(stats.processed_pages, 2);
        assert_eq!(stats.found_links, 2);
        assert_eq!(stats.failed_pages, 1);
    }

    #[test]
    fn test_session_seeds_frontier() {
        let session = CrawlSession::new("https://site/documentation");
        assert_eq!(session.frontier.queued_len(), 1);
        assert_eq!(session.stats, CrawlStats::default());
    }

    #[test]
    fn test_report_pages_per_second() {
        let report = CrawlReport {
            crawl_id: Uuid::new_v4(),
            started_at: Utc::now(),
            state: CrawlState::Done,
            memory_before: 10,
            memory_after: 12,
            processed_pages: 10,
            found_links: 30,
            failed_pages: 0,
            batches: 2,
            total_time: Duration::from_secs(4),
            cancelled: false,
        };
        assert_eq!(report.pages_per_second(), 2.5);

        let stats = report.complete_stats();
        assert_eq!(stats.total_time, 4.0);
        assert_eq!(stats.processed_pages, 10);
        assert_eq!(stats.memory_after, 12);

        let instant = CrawlReport {
            total_time: Duration::ZERO,
            ..report
        };
        assert_eq!(instant.pages_per_second(), 0.0);
    }

    #[test]
    fn test_terminal_states() {
        assert!(CrawlState::Done.is_terminal());
        assert!(CrawlState::Failed.is_terminal());
        assert!(!CrawlState::Draining.is_terminal());
        assert!(!CrawlState::Idle.is_terminal());
    }
}
