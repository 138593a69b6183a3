//! Command pipelines through bounded byte pipes
//!
//! ```text
//! COMMAND... ──merged output──▶ pipe 1 ──stdin──▶ --through ──▶ pipe 2 ──▶ drain
//!                                  │
//!                                  └──────(no --through)────────────────▶ drain
//! ```
//!
//! Producers run one after another. When the last one exits, pipe 1 is
//! closed so the filter sees end-of-input; when the filter exits, pipe 2
//! is closed so the drain sees end-of-stream.

use std::io;
use std::num::NonZeroUsize;
use std::process::ExitStatus;

use anyhow::{Context, Result};
use bytepipe::{CommandSpec, DrainTask, PipedCommand, RunError, StreamBuffer, DEFAULT_CAPACITY};
use clap::Parser;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Parser)]
#[command(name = "pipecli", version, about = "Run commands through bounded byte pipes")]
pub struct Args {
    /// Capacity of each pipe, in bytes
    #[arg(long, env = "BYTEPIPE_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub capacity: NonZeroUsize,

    /// Filter command reading the producers' output, e.g. "tr a-z A-Z"
    #[arg(long, value_name = "COMMAND")]
    pub through: Option<String>,

    /// Producer command lines, run in order, e.g. "echo hello"
    #[arg(required = true, value_name = "COMMAND")]
    pub commands: Vec<String>,
}

/// Outcome of a pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Commands that exited successfully
    pub succeeded: usize,
    /// Commands that failed to run or exited unsuccessfully
    pub failed: usize,
    pub bytes_drained: u64,
}

impl RunReport {
    fn record(&mut self, spec: &CommandSpec, result: Result<ExitStatus, RunError>) {
        match result {
            Ok(status) if status.success() => {
                debug!(command = %spec, "command succeeded");
                self.succeeded += 1;
            }
            Ok(status) => {
                warn!(command = %spec, %status, "command exited unsuccessfully");
                self.failed += 1;
            }
            Err(e) => {
                warn!(command = %spec, error = %e, "command failed");
                self.failed += 1;
            }
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

struct FilterStage {
    spec: CommandSpec,
    output: StreamBuffer,
    task: JoinHandle<Result<ExitStatus, RunError>>,
}

fn parse_command(line: &str) -> Result<CommandSpec> {
    CommandSpec::parse(line).with_context(|| format!("empty command line: {line:?}"))
}

/// Run the pipeline described by `args`
///
/// `start_drain` receives the last pipe of the pipeline and starts the task
/// that consumes it, usually [`bytepipe::drain_to_stdout`].
pub async fn run<F>(args: &Args, start_drain: F) -> Result<RunReport>
where
    F: FnOnce(StreamBuffer) -> io::Result<DrainTask>,
{
    let producers = args
        .commands
        .iter()
        .map(|line| parse_command(line))
        .collect::<Result<Vec<_>>>()?;
    let filter_spec = args.through.as_deref().map(parse_command).transpose()?;

    let produced = StreamBuffer::with_capacity(args.capacity);

    let output = filter_spec
        .as_ref()
        .map(|_| StreamBuffer::with_capacity(args.capacity));

    // Nothing runs yet, so a failed start leaves no blocked process behind
    let drained = output.clone().unwrap_or_else(|| produced.clone());
    let drain = start_drain(drained).context("failed to start drain task")?;

    let filter = filter_spec.zip(output).map(|(spec, output)| {
        let cmd = PipedCommand::new()
            .stdin(produced.clone())
            .merged_output(output.clone());
        let task = {
            let spec = spec.clone();
            let input = produced.clone();
            tokio::spawn(async move {
                let result = cmd.run(&spec).await;
                // Producers still writing get a closed pipe instead of blocking
                if input.close_if_open() {
                    debug!(command = %spec, "filter exited before its input was closed");
                }
                result
            })
        };
        FilterStage { spec, output, task }
    });

    let mut report = RunReport::default();
    let producer = PipedCommand::new().merged_output(produced.clone());
    for spec in &producers {
        let result = producer.run(spec).await;
        report.record(spec, result);
    }
    // End of input for the filter or the drain; an early-exiting filter may have closed it already
    produced.close_if_open();

    if let Some(FilterStage { spec, output, task }) = filter {
        match task.await {
            Ok(result) => report.record(&spec, result),
            Err(e) => {
                warn!(command = %spec, error = %e, "filter task failed");
                report.failed += 1;
            }
        }
        output.close()?;
    }

    let summary = tokio::task::spawn_blocking(move || drain.join())
        .await
        .context("failed to wait for drain task")?
        .context("drain task failed")?;
    report.bytes_drained = summary.bytes;
    Ok(report)
}
