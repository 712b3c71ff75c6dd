//! # Doc Crawler
//!
//! A breadth-first crawler for JavaScript-rendered documentation sites. Pages
//! are loaded in a small pool of headless Chrome instances, each page is
//! given a short window to render its documentation content, and title, meta
//! tags and documentation links are harvested from the live DOM.
//!
//! ## How a crawl runs
//!
//! - The start URL seeds a [`Frontier`] that hands out each URL at most once.
//! - URLs are taken in batches (5 by default) and fetched concurrently, each
//!   against a browser chosen round-robin from the [`ResourcePool`].
//! - Once the whole batch has settled, discovered links are enqueued, a
//!   `progress` event is emitted and the crawler pauses before the next batch.
//! - Images, stylesheets, fonts and media are blocked at the protocol level,
//!   so only documents and scripts are loaded.
//!
//! Progress and results stream to the caller as [`CrawlEvent`]s over a tokio
//! channel; the returned [`CrawlReport`] carries the final totals.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doc_crawler::{ChromeCrawler, Config, CrawlEvent, EventSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let crawler = ChromeCrawler::chrome(config);
//!
//!     let (events, mut receiver) = EventSink::channel(256);
//!     tokio::spawn(async move {
//!         while let Some(event) = receiver.recv().await {
//!             if let CrawlEvent::Result(page) = event {
//!                 println!("{} ({} links)", page.title, page.links.len());
//!             }
//!         }
//!     });
//!
//!     let report = crawler
//!         .crawl("https://developer.apple.com/documentation/swift", events)
//!         .await?;
//!     println!("Crawled {} pages", report.processed_pages);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! doc-crawler crawl --url https://developer.apple.com/documentation/swift > pages.jsonl
//! doc-crawler validate --config crawler.json
//! ```

/// Configuration and settings for the crawler
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Visit-once URL queue
pub mod frontier;

/// Browser pool management for concurrent Chrome instances
pub mod browser_pool;

/// Page loading and content extraction
pub mod page_extractor;

/// Process memory sampling and pressure detection
pub mod memory;

/// Events streamed to crawl observers
pub mod events;

/// Crawl orchestration
pub mod crawler;

/// Metrics recorded through the `metrics` facade
pub mod crawl_metrics;

/// Command-line interface implementation
pub mod cli;

/// Utility functions and helpers
pub mod utils;


pub use browser_pool::*;
pub use cli::*;
pub use config::*;
pub use crawl_metrics::*;
pub use crawler::*;
pub use error::*;
pub use events::*;
pub use frontier::*;
pub use memory::*;
pub use page_extractor::*;
pub use utils::*;
