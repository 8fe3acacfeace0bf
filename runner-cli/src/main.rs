mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use loader_core::errors::LoadError;
use loader_core::telemetry::{self, TracingProgress};
use loader_core::{LoadConfig, LoadMetrics, MemorySink, PostgresSink, run_load};
use tracing::{error, info};

use crate::cli::Cli;

/// Entry point for loading a month of taxi trips into Postgres.
///
/// What it does at a high-level:
///     Build the load config from flags (or a YAML file).
///     Download the CSV if it is remote.
///     Replace the target table, then append the rows batch by batch.
#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    match run(&cli).await.context("Load failed") {
        Ok(metrics) => {
            if cli.metrics_json {
                println!("{}", serde_json::to_string(&metrics)?);
            }
            Ok(())
        }
        Err(e) => {
            if let Some(load_err) = e.downcast_ref::<LoadError>() {
                error!("{:?}", e);
                std::process::exit(load_err.exit_code());
            }
            Err(e)
        }
    }
}

async fn run(cli: &Cli) -> Result<LoadMetrics, LoadError> {
    let config: LoadConfig = cli.to_config()?;
    info!(
        source = %config.source.url,
        target = %config.sink.redacted_url(),
        table = %config.sink.table,
        batch_size = config.processing.batch_size,
        "starting load"
    );

    if cli.dry_run {
        info!("dry run: rows are read and type-checked but not written");
        let (metrics, _) = run_load(config, MemorySink::discarding(), TracingProgress::new()).await?;
        return Ok(metrics);
    }

    let sink = PostgresSink::connect(&config.sink).await?;
    let (metrics, _) = run_load(config, sink, TracingProgress::new()).await?;
    Ok(metrics)
}
