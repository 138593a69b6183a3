//! Drain task: forwards everything read from a [`StreamBuffer`] to a sink
//!
//! The task runs on its own thread and ends when the buffer reports
//! end-of-stream. The caller owns the [`DrainTask`] handle and collects
//! the outcome with [`DrainTask::join`].

use std::io::{self, Write};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{DrainError, PipeError};
use crate::stream::StreamBuffer;

/// Parameters of a drain task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainConfig {
    /// Size of the read buffer; a single read forwards at most this many bytes
    pub chunk_size: usize,
    pub thread_name: String,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            thread_name: "bytepipe-drain".to_string(),
        }
    }
}

/// What a finished drain task forwarded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub bytes: u64,
    pub chunks: u64,
}

/// Handle of a running drain task
///
/// If the sink fails, the task closes the buffer before stopping, so
/// writers blocked on it get [`PipeError::Closed`] instead of waiting for
/// a reader that is gone.
#[derive(Debug)]
pub struct DrainTask {
    handle: JoinHandle<Result<DrainSummary, DrainError>>,
}

impl DrainTask {
    /// Start draining `buffer` into `sink` on a new thread
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a zero `chunk_size`, or the error of
    /// the thread spawn.
    pub fn spawn<W>(buffer: StreamBuffer, sink: W, config: DrainConfig) -> io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        if config.chunk_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "drain chunk size must be positive",
            ));
        }

        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_drain(&buffer, sink, config.chunk_size))?;
        Ok(Self { handle })
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to finish
    ///
    /// End-of-stream is the normal way for the task to end and yields `Ok`.
    pub fn join(self) -> Result<DrainSummary, DrainError> {
        self.handle.join().map_err(|_| DrainError::Panicked)?
    }
}

fn run_drain<W: Write>(
    buffer: &StreamBuffer,
    mut sink: W,
    chunk_size: usize,
) -> Result<DrainSummary, DrainError> {
    debug!(?buffer, chunk_size, "drain starting");

    let mut chunk = vec![0u8; chunk_size];
    let mut summary = DrainSummary::default();

    let result = loop {
        let n = match buffer.read(&mut chunk) {
            Ok(n) => n,
            Err(PipeError::EndOfStream) => break Ok(summary),
            Err(e) => break Err(DrainError::Read(e)),
        };

        if let Err(e) = sink.write_all(&chunk[..n]).and_then(|()| sink.flush()) {
            // Nobody consumes the buffer any more: fail writers instead of blocking them
            buffer.close_if_open();
            break Err(DrainError::Sink(e));
        }
        summary.bytes += n as u64;
        summary.chunks += 1;
    };

    match &result {
        Ok(summary) => debug!(bytes = summary.bytes, chunks = summary.chunks, "drain finished"),
        Err(e) => warn!(error = %e, "drain stopped"),
    }
    result
}

/// Print everything from `buffer` to stdout as text
///
/// Bytes are decoded as UTF-8; invalid sequences are shown as U+FFFD.
pub fn drain_to_stdout(buffer: StreamBuffer) -> io::Result<DrainTask> {
    DrainTask::spawn(
        buffer,
        TextSink::new(io::stdout()),
        DrainConfig {
            thread_name: "bytepipe-stdout".to_string(),
            ..DrainConfig::default()
        },
    )
}

/// `Write` adapter that renders bytes as lossy UTF-8 text
///
/// An incomplete multi-byte sequence at the end of a write is held back
/// until the next write completes it, so text split across chunks is
/// rendered intact. The held bytes are rendered lossily on drop.
pub struct TextSink<W: Write> {
    inner: W,
    pending: Vec<u8>,
}

impl<W: Write> TextSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    fn render(&mut self, flush_all: bool) -> io::Result<()> {
        let keep = if flush_all {
            0
        } else {
            incomplete_suffix_len(&self.pending)
        };
        let end = self.pending.len() - keep;
        let text = String::from_utf8_lossy(&self.pending[..end]).into_owned();
        self.inner.write_all(text.as_bytes())?;
        self.pending.drain(..end);
        Ok(())
    }
}

/// Length of a trailing UTF-8 sequence that may still be completed
fn incomplete_suffix_len(bytes: &[u8]) -> usize {
    let tail_start = bytes.len().saturating_sub(3);
    for (i, &b) in bytes.iter().enumerate().skip(tail_start).rev() {
        let expected = match b {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            0x80..=0xBF => continue,
            _ => return 0,
        };
        let have = bytes.len() - i;
        return if have < expected { have } else { 0 };
    }
    0
}

impl<W: Write> Write for TextSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.render(false)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> Drop for TextSink<W> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            let _ = self.render(true);
            let _ = self.inner.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_suffix_len() {
        assert_eq!(incomplete_suffix_len(b"abc"), 0);
        assert_eq!(incomplete_suffix_len(&[b'a', 0xC3]), 1);
        // "é" complete
        assert_eq!(incomplete_suffix_len(&[0xC3, 0xA9]), 0);
        // first two bytes of "€"
        assert_eq!(incomplete_suffix_len(&[b'x', 0xE2, 0x82]), 2);
        // stray continuation bytes are not held back
        assert_eq!(incomplete_suffix_len(&[0x80, 0x80, 0x80]), 0);
    }

    #[test]
    fn test_text_sink_joins_split_sequence() {
        let mut sink = TextSink::new(Vec::new());
        let euro = "€".as_bytes();
        sink.write_all(&[b'a', euro[0]]).unwrap();
        assert_eq!(sink.get_ref(), b"a");
        sink.write_all(&euro[1..]).unwrap();
        assert_eq!(sink.get_ref().as_slice(), "a€".as_bytes());
    }

    #[test]
    fn test_text_sink_replaces_invalid_bytes() {
        let mut sink = TextSink::new(Vec::new());
        sink.write_all(&[b'o', 0xFF, b'k']).unwrap();
        assert_eq!(sink.get_ref().as_slice(), "o\u{FFFD}k".as_bytes());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let buffer = StreamBuffer::new(1).unwrap();
        let config = DrainConfig {
            chunk_size: 0,
            ..DrainConfig::default()
        };
        let err = DrainTask::spawn(buffer, io::sink(), config).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
