//! Bounded thread-safe byte pipe
//!
//! [`StreamBuffer`] lets independently scheduled threads, tasks and
//! external processes exchange a stream of bytes:
//!
//! - writes block while the buffer is full
//! - a read blocks until the first byte arrives, then takes whatever else
//!   is already buffered without waiting again
//! - closing the buffer signals end-of-stream once buffered bytes are read
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  PipedCommand / DrainTask           │
//! │  - process stdio pumps              │
//! │  - background forwarding to a sink  │
//! └─────────────────────────────────────┘
//!          ▲
//!          │ read / write / close
//!          ▼
//! ┌─────────────────────────────────────┐
//! │  StreamBuffer (stream semantics)    │
//! │  - hybrid blocking read             │
//! │  - std::io and embedded_io traits   │
//! └─────────────────────────────────────┘
//!          ▲
//!          │ enqueue / dequeue / close
//!          ▼
//! ┌─────────────────────────────────────┐
//! │  ByteChannel (synchronization)      │
//! │  - Mutex<VecDeque<u8>>              │
//! │  - not_empty / not_full condvars    │
//! └─────────────────────────────────────┘
//! ```

pub mod channel;
pub mod drain;
pub mod error;
pub mod runner;
pub mod stream;

pub use channel::{ByteChannel, TryDequeue};
pub use drain::{drain_to_stdout, DrainConfig, DrainSummary, DrainTask, TextSink};
pub use error::{DrainError, PipeError, RunError};
pub use runner::{CommandSpec, PipedCommand};
pub use stream::{StreamBuffer, DEFAULT_CAPACITY};
