use anyhow::Context;
use clap::Parser;
use doc_crawler::{install_prometheus_exporter, setup_logging, Cli, CliRunner, Config};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting doc-crawler v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;

    if let Some(addr) = args.metrics_addr {
        install_prometheus_exporter(addr)?;
    }

    // Signals cancel the crawl so the pool is still drained.
    let cancel = CancellationToken::new();
    let _shutdown_handler = setup_shutdown_handler(cancel.clone());

    let cli_runner = CliRunner::new(config);
    let result = cli_runner.run(args.command, cancel).await;

    if let Err(e) = result {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    info!("doc-crawler stopped");
    Ok(())
}

fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(config_path) => Config::from_json_file(config_path)
            .with_context(|| format!("failed to load {}", config_path.display()))?,
        None => Config::default(),
    };

    args.apply_overrides(&mut config);
    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Browser pool size: {}", config.browser_pool_size);
    info!("Batch size: {}", config.batch_size);
    info!("Navigation timeout: {:?}", config.navigation_timeout);

    Ok(config)
}

fn setup_shutdown_handler(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
            Ok(signal) => signal,
            Err(e) => {
                error!("Failed to create SIGINT handler: {}", e);
                return;
            }
        };
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                error!("Failed to create SIGTERM handler: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        cancel.cancel();
    })
}
