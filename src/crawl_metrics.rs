use metrics::{Counter, Gauge, Histogram};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Crawl counters recorded through the `metrics` facade
///
/// Without an installed recorder every handle is a no-op.
pub struct CrawlMetrics {
    pub pages_processed: Counter,
    pub pages_failed: Counter,
    pub links_found: Counter,
    pub batches: Counter,
    pub retries: Counter,
    pub fetch_duration: Histogram,
    pub frontier_queued: Gauge,
}

impl CrawlMetrics {
    pub fn new() -> Self {
        Self {
            pages_processed: metrics::counter!("doc_crawler_pages_processed_total"),
            pages_failed: metrics::counter!("doc_crawler_pages_failed_total"),
            links_found: metrics::counter!("doc_crawler_links_found_total"),
            batches: metrics::counter!("doc_crawler_batches_total"),
            retries: metrics::counter!("doc_crawler_retries_total"),
            fetch_duration: metrics::histogram!("doc_crawler_fetch_duration_seconds"),
            frontier_queued: metrics::gauge!("doc_crawler_frontier_queued"),
        }
    }

    pub fn record_fetch(&self, duration: Duration, success: bool, links: usize) {
        if success {
            self.pages_processed.increment(1);
            self.links_found.increment(links as u64);
        } else {
            self.pages_failed.increment(1);
        }
        self.fetch_duration.record(duration.as_secs_f64());
    }

    pub fn record_batch(&self, queued: usize) {
        self.batches.increment(1);
        self.frontier_queued.set(queued as f64);
    }

    pub fn record_retry(&self) {
        self.retries.increment(1);
    }
}

impl Default for CrawlMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a Prometheus recorder serving `/metrics` on `addr`.
pub fn install_prometheus_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!("Serving Prometheus metrics on {}", addr);
    Ok(())
}
