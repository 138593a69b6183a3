use std::process::ExitCode;

use clap::Parser;
use pipecli::{run, Args};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing; stdout carries the pipeline output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(&args, bytepipe::drain_to_stdout).await {
        Ok(report) => {
            info!(
                succeeded = report.succeeded,
                failed = report.failed,
                bytes = report.bytes_drained,
                "pipeline finished"
            );
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
