//! tern CLI: follow a log file, ship matching lines to a webhook.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tern::app::{init_metrics, init_tracing, shutdown_signal};
use tern::{CliArgs, Config, Pipeline};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    let config = match Config::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_metrics(&config.metrics) {
        eprintln!("Failed to start metrics exporter: {e}");
        return ExitCode::FAILURE;
    }

    let pipeline = match Pipeline::from_config(&config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to start pipeline: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        file = %config.source.path.display(),
        pattern = %config.source.pattern,
        "starting tern"
    );

    let shutdown = CancellationToken::new();
    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            token.cancel();
        });
    }

    let (stats, delivery) = pipeline.run(shutdown).await;

    info!(
        lines_read = stats.lines_read,
        matched = stats.matched,
        suppressed = stats.suppressed,
        delivered = delivery.delivered,
        dropped = delivery.dropped,
        "tern stopped"
    );
    ExitCode::SUCCESS
}
