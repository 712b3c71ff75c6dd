//! Events streamed from a running crawl to its observer
//!
//! Events are sent on a bounded `tokio::sync::mpsc` channel in the order they
//! happen. Their JSON form is tagged by `type` with camelCase fields, matching
//! what browser-side observers consume.

use crate::{MemoryUsage, PageData};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CrawlEvent {
    Progress(ProgressUpdate),
    Result(PageData),
    Error(CrawlFailure),
    Complete { stats: CompleteStats },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// Approximate completion in `[0, 1]`; may move backwards as links are found
    pub progress: f64,
    pub processed_pages: usize,
    pub found_links: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<MemoryUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlFailure {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<MemoryUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteStats {
    /// Wall-clock duration in seconds
    pub total_time: f64,
    pub pages_per_second: f64,
    pub processed_pages: usize,
    pub found_links: usize,
    /// Resident memory in MB before the crawl
    pub memory_before: u64,
    /// Resident memory in MB after the crawl
    pub memory_after: u64,
    #[serde(default)]
    pub cancelled: bool,
}

/// Sending half handed to the orchestrator
///
/// A dropped receiver does not stop the crawl; further events are discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::Sender<CrawlEvent>,
}

impl EventSink {
    pub fn new(sender: mpsc::Sender<CrawlEvent>) -> Self {
        Self { sender }
    }

    /// Create a sink together with the receiver an observer reads from.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CrawlEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender), receiver)
    }

    pub async fn emit(&self, event: CrawlEvent) {
        if self.sender.send(event).await.is_err() {
            debug!("Event receiver dropped, discarding event");
        }
    }
}

impl From<mpsc::Sender<CrawlEvent>> for EventSink {
    fn from(sender: mpsc::Sender<CrawlEvent>) -> Self {
        Self::new(sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_progress_wire_format() {
        let event = CrawlEvent::Progress(ProgressUpdate {
            progress: 0.5,
            processed_pages: 3,
            found_links: 12,
            memory_usage: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["processedPages"], 3);
        assert_eq!(json["foundLinks"], 12);
        assert!(json.get("memoryUsage").is_none());
    }

    #[test]
    fn test_result_wire_format() {
        let mut metadata = BTreeMap::new();
        metadata.insert("description".to_string(), "Swift docs".to_string());
        let event = CrawlEvent::Result(PageData {
            url: "https://site/documentation/swift".to_string(),
            title: "Swift".to_string(),
            links: vec!["https://site/documentation/swift/array".to_string()],
            metadata,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["title"], "Swift");
        assert_eq!(json["links"][0], "https://site/documentation/swift/array");
        assert_eq!(json["metadata"]["description"], "Swift docs");
    }

    #[test]
    fn test_complete_wire_format() {
        let event = CrawlEvent::Complete {
            stats: CompleteStats {
                total_time: 2.0,
                pages_per_second: 1.5,
                processed_pages: 3,
                found_links: 4,
                memory_before: 10,
                memory_after: 12,
                cancelled: false,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["stats"]["totalTime"], 2.0);
        assert_eq!(json["stats"]["pagesPerSecond"], 1.5);
        assert_eq!(json["stats"]["memoryAfter"], 12);

        let back: CrawlEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_emit_after_receiver_dropped() {
        let (sink, receiver) = EventSink::channel(1);
        drop(receiver);
        sink.emit(CrawlEvent::Error(CrawlFailure {
            message: "boom".to_string(),
            memory_usage: None,
        }))
        .await;
    }
}
