//! KILN Event Log
//!
//! Immutable message envelopes, the task lifecycle, and an append-only
//! framed log whose readers survive a torn tail.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cursor;
pub mod encoding;
pub mod event;
pub mod sink;
pub mod stream;
pub mod task;

pub use cursor::{Cursor, ReadOutcome, read_all};
pub use encoding::{FrameError, MAX_RECORD_LEN, decode_frame, encode_batch, encode_frame};
pub use event::{Coverage, Event, Message, Metric, Op, Outcome, Preamble};
pub use sink::{EventSink, LogSink, MemorySink, NullSink};
pub use stream::{
    LogContents, LogError, LogResult, LogWriter, SCHEMA_VERSION, read_log, read_log_file,
};
pub use task::{EventError, Task, TaskBoard, TaskState};
