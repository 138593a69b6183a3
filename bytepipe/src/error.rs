//! Error types for pipe, drain and runner operations

use std::io;

/// Error type for stream buffer operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PipeError {
    /// Write attempted on a closed pipe, or a blocked write was woken by a close.
    /// `written` bytes of the call were enqueued before the close was observed.
    #[error("closed pipe ({written} bytes written)")]
    Closed { written: usize },

    /// The pipe is closed and every buffered byte has been read
    #[error("end of stream")]
    EndOfStream,

    #[error("pipe capacity must be positive")]
    ZeroCapacity,
}

impl PipeError {
    /// Bytes accepted by the failing call before the error was observed
    #[must_use]
    pub fn written(&self) -> usize {
        match self {
            PipeError::Closed { written } => *written,
            PipeError::EndOfStream | PipeError::ZeroCapacity => 0,
        }
    }
}

impl From<PipeError> for io::Error {
    fn from(e: PipeError) -> Self {
        let kind = match e {
            PipeError::Closed { .. } => io::ErrorKind::BrokenPipe,
            PipeError::EndOfStream => io::ErrorKind::UnexpectedEof,
            PipeError::ZeroCapacity => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, e)
    }
}

impl embedded_io::Error for PipeError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            PipeError::Closed { .. } => embedded_io::ErrorKind::BrokenPipe,
            PipeError::EndOfStream | PipeError::ZeroCapacity => embedded_io::ErrorKind::Other,
        }
    }
}

/// Error type for the drain task
#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    #[error("reading from pipe failed: {0}")]
    Read(#[source] PipeError),

    #[error("writing to sink failed: {0}")]
    Sink(#[source] io::Error),

    #[error("drain thread panicked")]
    Panicked,
}

/// Error type for the piped process runner
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("pipe error: {0}")]
    Pipe(#[from] PipeError),

    #[error("pump task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
