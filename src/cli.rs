use crate::{
    format_bytes, format_duration, validate_url, ChromeCrawler, Config, CrawlEvent, CrawlReport,
    EventSink,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "doc-crawler")]
#[command(about = "Crawl JavaScript-rendered documentation sites with headless Chrome")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Browser pool size")]
    pub pool_size: Option<usize>,

    #[arg(long, global = true, help = "URLs fetched per batch")]
    pub batch_size: Option<usize>,

    #[arg(long, global = true, help = "Navigation timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, global = true, help = "Serve Prometheus metrics on this address")]
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl a documentation site, printing events as JSON lines
    Crawl {
        #[arg(short, long, help = "Start URL")]
        url: String,

        #[arg(long, help = "Retries per failed page (default: none)")]
        max_retries: Option<usize>,

        #[arg(long, help = "Pause between batches in milliseconds")]
        rate_limit: Option<u64>,
    },

    /// Validate configuration
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

impl Cli {
    /// Apply command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(pool_size) = self.pool_size {
            config.browser_pool_size = pool_size;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(timeout) = self.timeout {
            config.navigation_timeout = Duration::from_secs(timeout);
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }
        if let Commands::Crawl {
            max_retries,
            rate_limit,
            ..
        } = &self.command
        {
            if let Some(max_retries) = max_retries {
                config.retry.max_retries = *max_retries;
            }
            if let Some(rate_limit) = rate_limit {
                config.rate_limit = Duration::from_millis(*rate_limit);
            }
        }
    }
}

pub struct CliRunner {
    pub config: Config,
}

impl CliRunner {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(&self, command: Commands, cancel: CancellationToken) -> anyhow::Result<()> {
        match command {
            Commands::Crawl { url, .. } => self.run_crawl(&url, cancel).await,
            Commands::Validate { config } => self.validate_config(&config),
        }
    }

    pub async fn run_crawl(&self, url: &str, cancel: CancellationToken) -> anyhow::Result<()> {
        let start = validate_url(url)?;
        info!("Crawling from: {}", start);

        let crawler = ChromeCrawler::chrome(self.config.clone());
        let (events, mut receiver) = EventSink::channel(self.config.event_buffer);

        let printer = tokio::spawn(async move {
            let mut printed = 0usize;
            while let Some(event) = receiver.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => {
                        println!("{line}");
                        printed += 1;
                    }
                    Err(e) => error!("Failed to serialize event: {}", e),
                }
                if let CrawlEvent::Error(failure) = &event {
                    error!("Crawl error: {}", failure.message);
                }
            }
            printed
        });

        let result = crawler
            .crawl_with_cancellation(start.as_str(), events, cancel)
            .await;
        let printed = printer.await.context("event printer task failed")?;

        let report = result.context("crawl failed")?;
        info!("Wrote {} events", printed);
        print_summary(&report);
        Ok(())
    }

    pub fn validate_config(&self, config_path: &Path) -> anyhow::Result<()> {
        println!("Validating configuration: {}", config_path.display());

        let config = Config::from_json_file(config_path)?;

        println!("Configuration is valid:");
        println!("  Browser pool size: {}", config.browser_pool_size);
        println!("  Batch size: {}", config.batch_size);
        println!("  Max concurrent fetches: {}", config.max_concurrent_fetches);
        println!("  Navigation timeout: {:?}", config.navigation_timeout);
        println!("  Rate limit: {:?}", config.rate_limit);
        println!("  Max retries: {}", config.retry.max_retries);
        println!("  Memory threshold: {} MB", config.memory_threshold_mb);
        println!("  Link filter: {}", config.selectors.link_filter);
        println!(
            "  Blocked resources: {}",
            config.blocked_resource_types.join(", ")
        );

        Ok(())
    }
}

/// Human summary on stderr; stdout carries only event lines.
fn print_summary(report: &CrawlReport) {
    eprintln!("Crawl {} complete:", report.crawl_id);
    eprintln!("  Started: {}", report.started_at.to_rfc3339());
    eprintln!("  Pages: {}", report.processed_pages);
    eprintln!("  Links found: {}", report.found_links);
    eprintln!("  Failed pages: {}", report.failed_pages);
    eprintln!("  Batches: {}", report.batches);
    eprintln!("  Duration: {}", format_duration(report.total_time));
    eprintln!("  Rate: {:.2} pages/s", report.pages_per_second());
    eprintln!(
        "  Memory: {} -> {}",
        format_bytes(report.memory_before * 1024 * 1024),
        format_bytes(report.memory_after * 1024 * 1024)
    );
    if report.cancelled {
        eprintln!("  Cancelled before the frontier was exhausted");
    }
}

/// Install the fmt subscriber, writing to stderr.
pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crawl_command() {
        let cli = Cli::try_parse_from([
            "doc-crawler",
            "crawl",
            "--url",
            "https://site/documentation",
            "--pool-size",
            "2",
            "--max-retries",
            "3",
        ])
        .unwrap();

        assert_eq!(cli.pool_size, Some(2));
        match &cli.command {
            Commands::Crawl {
                url, max_retries, ..
            } => {
                assert_eq!(url, "https://site/documentation");
                assert_eq!(*max_retries, Some(3));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let cli = Cli::try_parse_from([
            "doc-crawler",
            "--batch-size",
            "8",
            "--timeout",
            "10",
            "crawl",
            "--url",
            "https://site/documentation",
            "--rate-limit",
            "0",
        ])
        .unwrap();

        let mut config = Config::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.batch_size, 8);
        assert_eq!(config.navigation_timeout, Duration::from_secs(10));
        assert_eq!(config.rate_limit, Duration::ZERO);
        assert_eq!(config.browser_pool_size, 3);
        assert_eq!(config.retry.max_retries, 0);
    }

    #[test]
    fn test_parse_validate_command() {
        let cli =
            Cli::try_parse_from(["doc-crawler", "validate", "--config", "crawler.json"]).unwrap();
        assert!(matches!(cli.command, Commands::Validate { .. }));
    }
}
