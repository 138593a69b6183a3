//! Stream buffer: byte-stream read/write semantics over a [`ByteChannel`]
//!
//! - `write` blocks while the buffer is full
//! - `read` blocks until the first byte is available, then takes whatever
//!   else is already buffered without waiting again
//! - `close` signals end-of-stream; buffered bytes remain readable

use std::fmt;
use std::io;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::{ByteChannel, TryDequeue};
use crate::error::PipeError;

/// Capacity used by [`StreamBuffer::with_default_capacity`]
pub const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(500) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Bounded byte pipe shared between threads
///
/// Cloning is cheap and every clone refers to the same underlying channel,
/// so one clone can be handed to a producer and another to a consumer.
///
/// # Thread Safety
///
/// All methods take `&self`. The channel serializes access internally, so
/// no external lock is needed. Concurrent writers are allowed, but only
/// byte order is preserved: bytes of two concurrent `write` calls may
/// interleave. Reading is meant for a single consumer at a time.
///
/// # Example
///
/// ```
/// use bytepipe::{PipeError, StreamBuffer};
///
/// let pipe = StreamBuffer::new(4).unwrap();
/// pipe.write(b"AB").unwrap();
///
/// let mut buf = [0u8; 10];
/// assert_eq!(pipe.read(&mut buf), Ok(2));
/// assert_eq!(&buf[..2], b"AB");
///
/// pipe.close().unwrap();
/// assert_eq!(pipe.read(&mut buf), Err(PipeError::EndOfStream));
/// ```
#[derive(Clone)]
pub struct StreamBuffer {
    channel: Arc<ByteChannel>,
}

impl StreamBuffer {
    /// Create an open buffer holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Result<Self, PipeError> {
        Ok(Self {
            channel: Arc::new(ByteChannel::new(capacity)?),
        })
    }

    #[must_use]
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            channel: Arc::new(ByteChannel::with_capacity(capacity)),
        }
    }

    /// Create an open buffer with [`DEFAULT_CAPACITY`]
    #[must_use]
    pub fn with_default_capacity() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.channel.capacity()
    }

    /// Number of bytes written but not yet read
    #[must_use]
    pub fn len(&self) -> usize {
        self.channel.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Write all of `data`, blocking while the buffer is full
    ///
    /// Returns `data.len()` on success. If the buffer is closed before or
    /// during the call, returns [`PipeError::Closed`] carrying the number
    /// of bytes that were enqueued before the close. Those bytes stay
    /// readable.
    pub fn write(&self, data: &[u8]) -> Result<usize, PipeError> {
        let mut written = 0;
        while let Some(rest) = data.get(written..).filter(|rest| !rest.is_empty()) {
            match self.channel.enqueue_slice(rest) {
                Ok(n) => written += n,
                Err(_) => return Err(PipeError::Closed { written }),
            }
        }
        Ok(written)
    }

    /// Read into `into` with hybrid blocking
    ///
    /// 1. Blocks until at least one byte is available or the buffer is
    ///    closed and drained.
    /// 2. Closed and drained: returns [`PipeError::EndOfStream`], on this
    ///    and every later call.
    /// 3. Otherwise copies whatever else is already buffered, without
    ///    waiting, and returns the count.
    ///
    /// A read that observes the close after copying some bytes returns
    /// those bytes; end-of-stream is reported by the next call. An empty
    /// `into` returns `Ok(0)` immediately.
    pub fn read(&self, into: &mut [u8]) -> Result<usize, PipeError> {
        let Some((first, rest)) = into.split_first_mut() else {
            return Ok(0);
        };

        match self.channel.dequeue() {
            Some(byte) => {
                *first = byte;
                Ok(1 + self.channel.drain_into(rest))
            }
            None => Err(PipeError::EndOfStream),
        }
    }

    /// Like [`StreamBuffer::read`], but wait at most `timeout` for the
    /// first byte
    ///
    /// Returns `Ok(None)` if nothing arrived in time; no byte is consumed
    /// then.
    pub fn read_timeout(
        &self,
        into: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>, PipeError> {
        let Some((first, rest)) = into.split_first_mut() else {
            return Ok(Some(0));
        };

        match self.channel.dequeue_timeout(timeout) {
            TryDequeue::Byte(byte) => {
                *first = byte;
                Ok(Some(1 + self.channel.drain_into(rest)))
            }
            TryDequeue::WouldBlock => Ok(None),
            TryDequeue::Closed => Err(PipeError::EndOfStream),
        }
    }

    /// Close the buffer
    ///
    /// Blocked and future writes fail with [`PipeError::Closed`]; readers
    /// drain the buffered bytes and then see [`PipeError::EndOfStream`].
    /// Closing an already closed buffer is a no-op that logs a warning.
    pub fn close(&self) -> Result<(), PipeError> {
        if !self.channel.close() {
            log::warn!("StreamBuffer::close() called on already closed buffer: {self:?}");
        }
        Ok(())
    }

    /// Close the buffer unless it is already closed
    ///
    /// Returns `true` if this call closed it. For shutdown paths where more
    /// than one party may legitimately close the same buffer.
    pub fn close_if_open(&self) -> bool {
        self.channel.close()
    }
}

impl fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamBuffer({:?})", self.channel)
    }
}

fn io_write(buffer: &StreamBuffer, buf: &[u8]) -> io::Result<usize> {
    match buffer.write(buf) {
        Ok(n) => Ok(n),
        // A short write is reported as such; the next call sees the error
        Err(PipeError::Closed { written }) if written > 0 => Ok(written),
        Err(e) => Err(e.into()),
    }
}

fn io_read(buffer: &StreamBuffer, buf: &mut [u8]) -> io::Result<usize> {
    match buffer.read(buf) {
        Ok(n) => Ok(n),
        Err(PipeError::EndOfStream) => Ok(0),
        Err(e) => Err(e.into()),
    }
}

impl io::Write for StreamBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io_write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for &StreamBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io_write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for StreamBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io_read(self, buf)
    }
}

impl io::Read for &StreamBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io_read(self, buf)
    }
}

// Implement embedded_io traits
impl embedded_io::ErrorType for StreamBuffer {
    type Error = PipeError;
}

impl embedded_io::Read for StreamBuffer {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match StreamBuffer::read(self, buf) {
            Err(PipeError::EndOfStream) => Ok(0),
            other => other,
        }
    }
}

impl embedded_io::Write for StreamBuffer {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        match StreamBuffer::write(self, buf) {
            Err(PipeError::Closed { written }) if written > 0 => Ok(written),
            other => other,
        }
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
