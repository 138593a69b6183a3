//! Piped process runner
//!
//! Runs an external program with its standard streams wired to
//! [`StreamBuffer`]s:
//!
//! - stdin: bytes read from the input buffer are forwarded to the process;
//!   closing the input buffer closes the process's stdin
//! - stdout/stderr: process output is written into the output buffers,
//!   blocking (off the async runtime) when they are full
//!
//! The runner never closes the buffers it was given. Several commands can
//! write into the same buffer one after another; the caller closes it when
//! the last producer is done.
//!
//! ```ignore
//! let pipe1 = StreamBuffer::with_default_capacity();
//! let pipe2 = StreamBuffer::with_default_capacity();
//! let drain = drain_to_stdout(pipe2.clone())?;
//!
//! let upper = PipedCommand::new().stdin(pipe1.clone()).merged_output(pipe2.clone());
//! let producer = PipedCommand::new().merged_output(pipe1.clone());
//!
//! let filter = tokio::spawn(async move { upper.execf("tr", ["a-z", "A-Z"]).await });
//! producer.execf("echo", ["hey-hi-hello"]).await?;
//! pipe1.close()?;
//! filter.await??;
//! pipe2.close()?;
//! drain.join()?;
//! ```

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, trace};

use crate::error::{PipeError, RunError};
use crate::stream::StreamBuffer;

/// Size of the chunks moved between a process and a buffer
const PUMP_CHUNK_SIZE: usize = 4096;

/// Longest wait of a single stdin buffer read
const STDIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Program, arguments and environment of a process to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Split a command line on whitespace; no quoting is supported
    ///
    /// Returns `None` for a blank line.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let program = words.next()?;
        Some(Self::new(program).args(words))
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Stream wiring for processes
///
/// A stream without a buffer is connected to the null device.
#[derive(Debug, Clone, Default)]
pub struct PipedCommand {
    stdin: Option<StreamBuffer>,
    stdout: Option<StreamBuffer>,
    stderr: Option<StreamBuffer>,
}

impl PipedCommand {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stdin(mut self, buffer: StreamBuffer) -> Self {
        self.stdin = Some(buffer);
        self
    }

    #[must_use]
    pub fn stdout(mut self, buffer: StreamBuffer) -> Self {
        self.stdout = Some(buffer);
        self
    }

    #[must_use]
    pub fn stderr(mut self, buffer: StreamBuffer) -> Self {
        self.stderr = Some(buffer);
        self
    }

    /// Send both stdout and stderr into `buffer`
    #[must_use]
    pub fn merged_output(self, buffer: StreamBuffer) -> Self {
        self.stdout(buffer.clone()).stderr(buffer)
    }

    /// Run `program` with `args` and wait for it
    pub async fn execf<I, S>(&self, program: &str, args: I) -> Result<ExitStatus, RunError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run(&CommandSpec::new(program).args(args)).await
    }

    /// Spawn the process, pump its streams and wait for completion
    ///
    /// Returns once the process has exited and every pump has finished.
    /// The stdin pump finishes when the input buffer reaches end-of-stream
    /// or the process stops accepting input, so a process with an input
    /// buffer is only reported finished after that buffer was closed or
    /// the process exited and the next input chunk hit a broken pipe.
    ///
    /// A non-zero exit status is not an error; check the returned status.
    ///
    /// # Errors
    ///
    /// - [`RunError::Spawn`] if the program cannot be started
    /// - [`RunError::Pipe`] if an output buffer was closed while in use
    /// - [`RunError::Io`] for other stream failures
    ///
    /// On error the process is killed.
    pub async fn run(&self, spec: &CommandSpec) -> Result<ExitStatus, RunError> {
        let mut child = self
            .configure_command(spec)
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: spec.program.clone(),
                source,
            })?;
        debug!(command = %spec, pid = ?child.id(), "process spawned");

        let child_stdin = child.stdin.take();
        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        // Set once the process side failed; stops the stdin pump
        let stop = AtomicBool::new(false);

        let input = async {
            match (&self.stdin, child_stdin) {
                (Some(buffer), Some(stdin)) => pump_input(buffer.clone(), stdin, &stop).await,
                _ => Ok(0),
            }
        };
        let output = async {
            match (&self.stdout, child_stdout) {
                (Some(buffer), Some(stdout)) => pump_output(stdout, buffer.clone(), "stdout").await,
                _ => Ok(0),
            }
        };
        let errors = async {
            match (&self.stderr, child_stderr) {
                (Some(buffer), Some(stderr)) => pump_output(stderr, buffer.clone(), "stderr").await,
                _ => Ok(0),
            }
        };
        let process = async {
            let exit = async { child.wait().await.map_err(RunError::from) };
            let result = tokio::try_join!(exit, output, errors);
            if result.is_err() {
                if let Err(e) = child.start_kill() {
                    debug!(command = %spec, error = %e, "failed to kill process");
                }
                stop.store(true, Ordering::Release);
            }
            result
        };

        // The stdin pump is always awaited: no buffer read outlives `run`
        let (process, bytes_in) = tokio::join!(process, input);
        let (status, bytes_out, bytes_err) = process?;
        let bytes_in = bytes_in?;
        debug!(
            command = %spec,
            %status,
            bytes_in,
            bytes_out,
            bytes_err,
            "process finished"
        );
        Ok(status)
    }

    fn configure_command(&self, spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(key, value)| (key, value)))
            .stdin(stdio_for(self.stdin.is_some()))
            .stdout(stdio_for(self.stdout.is_some()))
            .stderr(stdio_for(self.stderr.is_some()))
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

fn stdio_for(has_buffer: bool) -> Stdio {
    if has_buffer {
        Stdio::piped()
    } else {
        Stdio::null()
    }
}

/// Forward the input buffer to the process until end-of-stream
///
/// Buffer reads block, so they run on the blocking pool. Each read waits
/// at most [`STDIN_POLL_INTERVAL`] so that `stop` is noticed without
/// leaving a read behind that would consume bytes meant for a later reader.
async fn pump_input(
    buffer: StreamBuffer,
    mut stdin: ChildStdin,
    stop: &AtomicBool,
) -> Result<u64, RunError> {
    let mut total = 0u64;
    while !stop.load(Ordering::Acquire) {
        let reader = buffer.clone();
        let chunk = tokio::task::spawn_blocking(move || {
            let mut chunk = vec![0u8; PUMP_CHUNK_SIZE];
            reader
                .read_timeout(&mut chunk, STDIN_POLL_INTERVAL)
                .map(|n| {
                    n.map(|n| {
                        chunk.truncate(n);
                        chunk
                    })
                })
        })
        .await?;

        let chunk = match chunk {
            Ok(Some(chunk)) => chunk,
            Ok(None) => continue,
            Err(PipeError::EndOfStream) => {
                // Dropping the handle closes the pipe: the process sees end-of-input
                drop(stdin);
                debug!(total, "stdin reached end of stream");
                return Ok(total);
            }
            Err(e) => return Err(e.into()),
        };

        match stdin.write_all(&chunk).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(total, "process closed its stdin");
                return Ok(total);
            }
            Err(e) => return Err(e.into()),
        }
        trace!(bytes = chunk.len(), "stdin chunk");
        total += chunk.len() as u64;
    }

    debug!(total, "stdin pump stopped");
    Ok(total)
}

/// Copy process output into `buffer` until the process closes the stream
async fn pump_output<R>(mut source: R, buffer: StreamBuffer, stream: &'static str) -> Result<u64, RunError>
where
    R: AsyncRead + Unpin,
{
    let mut total = 0u64;
    let mut chunk = vec![0u8; PUMP_CHUNK_SIZE];
    loop {
        let n = source.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        let data = chunk[..n].to_vec();
        let writer = buffer.clone();
        tokio::task::spawn_blocking(move || writer.write(&data)).await??;
        trace!(stream, bytes = n, "output chunk");
        total += n as u64;
    }
    Ok(total)
}
