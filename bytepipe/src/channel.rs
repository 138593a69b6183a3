//! Bounded byte channel
//!
//! A fixed-capacity FIFO of bytes shared between threads. Writers block
//! while the queue is full, readers block while it is empty. Closing the
//! channel wakes every blocked caller:
//!
//! - blocked writers return [`PipeError::Closed`]
//! - blocked readers keep receiving buffered bytes, then observe the close
//!
//! # Workflow
//!
//! Both sides follow the same "lock - check - wait" pattern. The condition
//! (queue full/empty, closed flag) is always evaluated under the state lock,
//! and `Condvar::wait` releases that lock atomically. A `close()` between the
//! check and the wait is therefore impossible to miss.
//!
//! ```text
//! writer                          reader
//! ------                          ------
//! lock                            lock
//! while full && open: wait        while empty && open: wait
//!   (not_full)                      (not_empty)
//! if closed: Err(Closed)          pop_front -> notify not_full
//! push_back -> notify not_empty   or None if closed and empty
//! ```

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use crate::error::PipeError;

/// Result of a non-blocking dequeue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryDequeue {
    /// A byte was available
    Byte(u8),
    /// The queue is empty but still open; a blocking dequeue would wait
    WouldBlock,
    /// The queue is closed and every buffered byte has been delivered
    Closed,
}

struct State {
    queue: VecDeque<u8>,
    closed: bool,
}

/// Fixed-capacity concurrent byte queue
///
/// # Thread Safety
///
/// All operations take `&self` and synchronize on an internal
/// `parking_lot::Mutex`. Share the channel between threads with `Arc`.
/// Operations are not reentrant, but none of them calls back into user code
/// while holding the lock.
pub struct ByteChannel {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl ByteChannel {
    /// Create an open channel holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Result<Self, PipeError> {
        NonZeroUsize::new(capacity)
            .map(Self::with_capacity)
            .ok_or(PipeError::ZeroCapacity)
    }

    #[must_use]
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        let capacity = capacity.get();
        Self {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes currently buffered
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Append one byte, blocking while the channel is full
    ///
    /// Fails with `Closed { written: 0 }` if the channel is closed before
    /// the byte could be stored, including while this call was waiting.
    pub fn enqueue(&self, byte: u8) -> Result<(), PipeError> {
        let mut state = self.state.lock();
        while state.queue.len() >= self.capacity && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(PipeError::Closed { written: 0 });
        }
        state.queue.push_back(byte);
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Append a prefix of `data`, blocking until at least one slot is free
    ///
    /// Stores as many leading bytes as fit in a single critical section and
    /// returns their number. Returns `Ok(0)` for empty `data` without
    /// waiting.
    pub fn enqueue_slice(&self, data: &[u8]) -> Result<usize, PipeError> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock();
        while state.queue.len() >= self.capacity && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(PipeError::Closed { written: 0 });
        }
        let room = self.capacity - state.queue.len();
        let n = room.min(data.len());
        state.queue.extend(&data[..n]);
        drop(state);

        // Several bytes may satisfy several readers
        self.not_empty.notify_all();
        Ok(n)
    }

    /// Remove the oldest byte, blocking while the channel is empty and open
    ///
    /// Returns `None` once the channel is closed and drained.
    pub fn dequeue(&self) -> Option<u8> {
        let mut state = self.state.lock();
        while state.queue.is_empty() && !state.closed {
            self.not_empty.wait(&mut state);
        }
        let byte = state.queue.pop_front();
        drop(state);

        if byte.is_some() {
            self.not_full.notify_one();
        }
        byte
    }

    /// Remove the oldest byte without blocking
    pub fn try_dequeue(&self) -> TryDequeue {
        let mut state = self.state.lock();
        let byte = state.queue.pop_front();
        let closed = state.closed;
        drop(state);

        match byte {
            Some(byte) => {
                self.not_full.notify_one();
                TryDequeue::Byte(byte)
            }
            None if closed => TryDequeue::Closed,
            None => TryDequeue::WouldBlock,
        }
    }

    /// Remove the oldest byte, blocking for at most `timeout`
    ///
    /// Returns [`TryDequeue::WouldBlock`] if the channel stayed empty and
    /// open for the whole `timeout`. Nothing is consumed in that case.
    pub fn dequeue_timeout(&self, timeout: Duration) -> TryDequeue {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.queue.is_empty() && !state.closed {
            if self.not_empty.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        let byte = state.queue.pop_front();
        let closed = state.closed;
        drop(state);

        match byte {
            Some(byte) => {
                self.not_full.notify_one();
                TryDequeue::Byte(byte)
            }
            None if closed => TryDequeue::Closed,
            None => TryDequeue::WouldBlock,
        }
    }

    /// Move buffered bytes into `dest` without blocking
    ///
    /// Equivalent to calling [`ByteChannel::try_dequeue`] until it stops
    /// returning bytes or `dest` is full, but under one lock acquisition.
    pub fn drain_into(&self, dest: &mut [u8]) -> usize {
        if dest.is_empty() {
            return 0;
        }

        let mut state = self.state.lock();
        let n = state.queue.len().min(dest.len());
        for (slot, byte) in dest.iter_mut().zip(state.queue.drain(..n)) {
            *slot = byte;
        }
        drop(state);

        if n > 0 {
            self.not_full.notify_all();
        }
        n
    }

    /// Mark the channel closed and wake every waiter
    ///
    /// Buffered bytes stay readable. Returns `false` if the channel was
    /// already closed.
    pub fn close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
        }
        self.not_full.notify_all();
        self.not_empty.notify_all();
        true
    }
}

impl fmt::Debug for ByteChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(
            f,
            "ByteChannel(capacity={}, len={}, closed={})",
            self.capacity,
            state.queue.len(),
            state.closed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(ByteChannel::new(0).unwrap_err(), PipeError::ZeroCapacity);
    }

    #[test]
    fn test_fifo_order() {
        let ch = ByteChannel::new(4).unwrap();
        for b in b"abc" {
            ch.enqueue(*b).unwrap();
        }
        assert_eq!(ch.len(), 3);
        assert_eq!(ch.dequeue(), Some(b'a'));
        assert_eq!(ch.dequeue(), Some(b'b'));
        assert_eq!(ch.dequeue(), Some(b'c'));
        assert!(ch.is_empty());
    }

    #[test]
    fn test_try_dequeue_states() {
        let ch = ByteChannel::new(2).unwrap();
        assert_eq!(ch.try_dequeue(), TryDequeue::WouldBlock);

        ch.enqueue(7).unwrap();
        ch.close();
        assert_eq!(ch.try_dequeue(), TryDequeue::Byte(7));
        assert_eq!(ch.try_dequeue(), TryDequeue::Closed);
    }

    #[test]
    fn test_dequeue_timeout() {
        let ch = Arc::new(ByteChannel::new(2).unwrap());
        assert_eq!(
            ch.dequeue_timeout(Duration::from_millis(20)),
            TryDequeue::WouldBlock
        );

        let writer = thread::spawn({
            let ch = Arc::clone(&ch);
            move || {
                thread::sleep(Duration::from_millis(30));
                ch.enqueue(9).unwrap();
            }
        });
        assert_eq!(
            ch.dequeue_timeout(Duration::from_secs(5)),
            TryDequeue::Byte(9)
        );
        writer.join().unwrap();

        ch.close();
        assert_eq!(ch.dequeue_timeout(Duration::from_secs(5)), TryDequeue::Closed);
    }

    #[test]
    fn test_close_keeps_buffered_bytes() {
        let ch = ByteChannel::new(4).unwrap();
        ch.enqueue(1).unwrap();
        ch.enqueue(2).unwrap();
        assert!(ch.close());

        assert_eq!(ch.dequeue(), Some(1));
        assert_eq!(ch.dequeue(), Some(2));
        assert_eq!(ch.dequeue(), None);
        assert_eq!(ch.dequeue(), None);
    }

    #[test]
    fn test_second_close_reports_false() {
        let ch = ByteChannel::new(1).unwrap();
        assert!(ch.close());
        assert!(!ch.close());
        assert!(ch.is_closed());
    }

    #[test]
    fn test_enqueue_after_close_fails() {
        let ch = ByteChannel::new(1).unwrap();
        ch.close();
        assert_eq!(ch.enqueue(1), Err(PipeError::Closed { written: 0 }));
        assert_eq!(
            ch.enqueue_slice(b"x"),
            Err(PipeError::Closed { written: 0 })
        );
    }

    #[test]
    fn test_enqueue_slice_stores_what_fits() {
        let ch = ByteChannel::new(3).unwrap();
        assert_eq!(ch.enqueue_slice(b"hello"), Ok(3));
        assert_eq!(ch.enqueue_slice(b""), Ok(0));

        let mut buf = [0u8; 8];
        assert_eq!(ch.drain_into(&mut buf), 3);
        assert_eq!(&buf[..3], b"hel");
        assert_eq!(ch.drain_into(&mut buf), 0);
    }

    #[test]
    fn test_close_wakes_blocked_dequeue() {
        let ch = Arc::new(ByteChannel::new(1).unwrap());
        let reader = thread::spawn({
            let ch = Arc::clone(&ch);
            move || ch.dequeue()
        });

        thread::sleep(Duration::from_millis(50));
        ch.close();
        assert_eq!(reader.join().unwrap(), None);
    }

    #[test]
    fn test_close_wakes_blocked_enqueue() {
        let ch = Arc::new(ByteChannel::new(1).unwrap());
        ch.enqueue(1).unwrap();

        let writer = thread::spawn({
            let ch = Arc::clone(&ch);
            move || ch.enqueue(2)
        });

        thread::sleep(Duration::from_millis(50));
        ch.close();
        assert_eq!(writer.join().unwrap(), Err(PipeError::Closed { written: 0 }));
        // The byte stored before the close is still there
        assert_eq!(ch.dequeue(), Some(1));
        assert_eq!(ch.dequeue(), None);
    }
}
