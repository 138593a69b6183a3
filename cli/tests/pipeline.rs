#![cfg(unix)]

use bytepipe::{DrainConfig, DrainTask};
use clap::Parser;
use parking_lot::Mutex;
use pipecli::{run, Args};
use std::io::{self, Write};
use std::sync::Arc;

/// Drain sink that keeps everything for inspection
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().clone()).unwrap()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn args(argv: &[&str]) -> Args {
    Args::try_parse_from(std::iter::once("pipecli").chain(argv.iter().copied())).unwrap()
}

async fn run_captured(argv: &[&str]) -> (pipecli::RunReport, String) {
    let captured = Captured::default();
    let sink = captured.clone();
    let report = run(&args(argv), move |buffer| {
        DrainTask::spawn(buffer, sink, DrainConfig::default())
    })
    .await
    .unwrap();
    (report, captured.text())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_producers_only() {
    let (report, out) = run_captured(&["--capacity", "8", "echo hey-hi-hello", "echo 1-2-3"]).await;

    assert_eq!(out, "hey-hi-hello\n1-2-3\n");
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.bytes_drained, 19);
    assert!(report.is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_producers_through_filter() {
    let (report, out) = run_captured(&[
        "--capacity",
        "4",
        "--through",
        "tr a-z A-Z",
        "echo hey-hi-hello",
        "echo 1-2-3-5, repeat",
    ])
    .await;

    assert_eq!(out, "HEY-HI-HELLO\n1-2-3-5, REPEAT\n");
    // Two producers and the filter
    assert_eq!(report.succeeded, 3);
    assert!(report.is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_command_is_counted() {
    let (report, out) = run_captured(&["false", "bytepipe-no-such-program", "echo still-here"]).await;

    assert_eq!(out, "still-here\n");
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 2);
    assert!(!report.is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_filter_exiting_early_stops_producer() {
    // `yes` never ends by itself; it fails once the filter is gone
    let (report, out) = run_captured(&["--capacity", "64", "--through", "head -c 5", "yes"]).await;

    assert_eq!(out, "y\ny\ny");
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
}

#[test]
fn test_zero_capacity_rejected() {
    let err = Args::try_parse_from(["pipecli", "--capacity", "0", "echo"]).unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
}

#[test]
fn test_command_required() {
    assert!(Args::try_parse_from(["pipecli"]).is_err());
}

#[tokio::test]
async fn test_blank_command_line_rejected() {
    let result = run(&args(&["   "]), |buffer| {
        DrainTask::spawn(buffer, io::sink(), DrainConfig::default())
    })
    .await;
    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_drain_start_runs_no_filter() {
    let marker = std::env::temp_dir().join(format!("pipecli-filter-ran-{}", std::process::id()));
    let _ = std::fs::remove_file(&marker);
    let through = format!("touch {}", marker.display());

    let result = run(&args(&["--through", through.as_str(), "echo hi"]), |_| {
        Err(io::Error::new(io::ErrorKind::Other, "no sink"))
    })
    .await;
    assert!(result.is_err());

    std::thread::sleep(std::time::Duration::from_millis(200));
    assert!(!marker.exists(), "filter started although the drain failed");
}
