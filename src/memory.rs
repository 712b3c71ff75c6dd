//! Process memory sampling and pressure detection

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Point-in-time memory reading, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    /// Resident memory of this process
    pub heap_used: u64,
    /// Virtual memory reserved by this process
    pub heap_total: u64,
    /// Memory swapped out of this process
    pub external: u64,
    pub percentage_used: f64,
}

impl MemoryUsage {
    pub fn new(heap_used: u64, heap_total: u64, external: u64) -> Self {
        let percentage_used = if heap_total > 0 {
            heap_used as f64 / heap_total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            heap_used,
            heap_total,
            external,
            percentage_used,
        }
    }

    pub fn used_mb(&self) -> u64 {
        self.heap_used / BYTES_PER_MB
    }
}

/// Where memory readings come from, and how reclamation is requested
#[cfg_attr(test, mockall::automock)]
pub trait MemorySource: Send + Sync {
    fn usage(&self) -> MemoryUsage;

    /// Best-effort reclamation hint. Returns whether anything was attempted;
    /// hosts without such a facility return `false`.
    fn reclaim(&self) -> bool {
        false
    }
}

/// Reads `/proc/self/status`; all readings are zero where it is unavailable
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcMemorySource;

impl ProcMemorySource {
    fn parse_kb(line: &str) -> Option<u64> {
        line.split_whitespace().nth(1)?.parse::<u64>().ok()
    }

    /// Extract `VmRSS`, `VmSize` and `VmSwap` (in bytes) from a status file.
    pub fn parse_status(content: &str) -> MemoryUsage {
        let mut rss = 0;
        let mut size = 0;
        let mut swap = 0;

        for line in content.lines() {
            let target = if line.starts_with("VmRSS:") {
                &mut rss
            } else if line.starts_with("VmSize:") {
                &mut size
            } else if line.starts_with("VmSwap:") {
                &mut swap
            } else {
                continue;
            };
            if let Some(kb) = Self::parse_kb(line) {
                *target = kb * 1024;
            }
        }

        MemoryUsage::new(rss, size, swap)
    }
}

impl MemorySource for ProcMemorySource {
    fn usage(&self) -> MemoryUsage {
        match std::fs::read_to_string("/proc/self/status") {
            Ok(content) => Self::parse_status(&content),
            Err(e) => {
                debug!("Memory usage unavailable: {}", e);
                MemoryUsage::default()
            }
        }
    }
}

/// Tracks the latest memory sample against a fixed threshold
pub struct MemoryMonitor {
    source: Box<dyn MemorySource>,
    threshold_mb: u64,
    last_sample_mb: AtomicU64,
}

impl MemoryMonitor {
    pub fn new(threshold_mb: u64) -> Self {
        Self::with_source(Box::new(ProcMemorySource), threshold_mb)
    }

    pub fn with_source(source: Box<dyn MemorySource>, threshold_mb: u64) -> Self {
        Self {
            source,
            threshold_mb,
            last_sample_mb: AtomicU64::new(0),
        }
    }

    /// Full reading; also refreshes the latest sample.
    pub fn usage(&self) -> MemoryUsage {
        let usage = self.source.usage();
        self.last_sample_mb.store(usage.used_mb(), Ordering::Relaxed);
        metrics::gauge!("doc_crawler_memory_used_bytes").set(usage.heap_used as f64);
        usage
    }

    /// Current usage in MB.
    pub fn sample(&self) -> u64 {
        self.usage().used_mb()
    }

    pub fn last_sample(&self) -> u64 {
        self.last_sample_mb.load(Ordering::Relaxed)
    }

    /// Whether the latest sample exceeds the threshold.
    pub fn under_pressure(&self) -> bool {
        self.last_sample() > self.threshold_mb
    }

    /// Issue a reclamation hint if the latest sample is over the threshold.
    /// Returns whether a hint was issued.
    pub fn maybe_reclaim(&self) -> bool {
        if !self.under_pressure() {
            return false;
        }

        warn!(
            "Memory usage {} MB exceeds {} MB, requesting reclamation",
            self.last_sample(),
            self.threshold_mb
        );
        metrics::counter!("doc_crawler_memory_reclaims_total").increment(1);
        if !self.source.reclaim() {
            debug!("No reclamation facility available");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\tdoc-crawler\n\
        VmPeak:\t  300000 kB\n\
        VmSize:\t  262144 kB\n\
        VmRSS:\t  131072 kB\n\
        VmSwap:\t    1024 kB\n";

    #[test]
    fn test_parse_status() {
        let usage = ProcMemorySource::parse_status(STATUS);
        assert_eq!(usage.heap_used, 128 * BYTES_PER_MB);
        assert_eq!(usage.heap_total, 256 * BYTES_PER_MB);
        assert_eq!(usage.external, BYTES_PER_MB);
        assert_eq!(usage.percentage_used, 50.0);
        assert_eq!(usage.used_mb(), 128);
    }

    #[test]
    fn test_parse_empty_status() {
        let usage = ProcMemorySource::parse_status("");
        assert_eq!(usage, MemoryUsage::default());
        assert_eq!(usage.percentage_used, 0.0);
    }

    #[test]
    fn test_pressure_below_threshold() {
        let mut source = MockMemorySource::new();
        source
            .expect_usage()
            .returning(|| MemoryUsage::new(512 * BYTES_PER_MB, 2048 * BYTES_PER_MB, 0));
        source.expect_reclaim().never();

        let monitor = MemoryMonitor::with_source(Box::new(source), 1024);
        assert_eq!(monitor.sample(), 512);
        assert!(!monitor.under_pressure());
        assert!(!monitor.maybe_reclaim());
    }

    #[test]
    fn test_pressure_triggers_reclaim_hint() {
        let mut source = MockMemorySource::new();
        source
            .expect_usage()
            .returning(|| MemoryUsage::new(2000 * BYTES_PER_MB, 4096 * BYTES_PER_MB, 0));
        source.expect_reclaim().times(1).returning(|| false);

        let monitor = MemoryMonitor::with_source(Box::new(source), 1024);
        assert!(!monitor.maybe_reclaim());
        monitor.sample();
        assert!(monitor.maybe_reclaim());
        assert!(monitor.under_pressure());
        assert_eq!(monitor.last_sample(), 2000);
    }

    #[test]
    fn test_usage_serializes_camel_case() {
        let usage = MemoryUsage::new(10, 20, 0);
        let json = serde_json::to_value(usage).unwrap();
        assert_eq!(json["heapUsed"], 10);
        assert_eq!(json["heapTotal"], 20);
        assert_eq!(json["percentageUsed"], 50.0);
    }
}
