//! Cursor for resuming reads of a log.

use crate::encoding::{FrameError, decode_frame};
use crate::event::Message;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Position in a log: records consumed and the byte offset after them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Cursor {
    record: u64,
    offset: u64,
}

/// Result of a tolerant read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOutcome {
    /// Every fully decoded message, in log order
    pub messages: Vec<Message>,
    /// Byte offset of the first frame that failed to decode, if any
    pub truncated_at: Option<u64>,
}

impl ReadOutcome {
    /// Whether the read stopped at a torn or corrupt frame
    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        self.truncated_at.is_some()
    }
}

impl Cursor {
    /// Start of the log
    #[must_use]
    pub const fn start() -> Self {
        Self {
            record: 0,
            offset: 0,
        }
    }

    /// Cursor at a known record and byte offset
    #[must_use]
    pub const fn at(record: u64, offset: u64) -> Self {
        Self { record, offset }
    }

    /// Records consumed so far
    #[must_use]
    pub const fn record(&self) -> u64 {
        self.record
    }

    /// Byte offset of the next frame
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Step over one frame of `len` bytes
    pub fn advance(&mut self, len: u64) {
        self.record = self.record.saturating_add(1);
        self.offset = self.offset.saturating_add(len);
    }

    /// Decode every complete frame of `log` from the cursor on and advance
    /// past them.
    ///
    /// Stops at the first frame that fails to decode. An incomplete frame
    /// at the end is a torn write; a corrupt frame is logged louder, but
    /// both only end the read.
    pub fn read(&mut self, log: &[u8]) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        let Some(mut rest) = usize::try_from(self.offset).ok().and_then(|o| log.get(o..)) else {
            return outcome;
        };
        while !rest.is_empty() {
            match decode_frame(rest) {
                Ok((message, used)) => {
                    outcome.messages.push(message);
                    self.advance(used as u64);
                    rest = &rest[used..];
                }
                Err(e) => {
                    match &e {
                        FrameError::Incomplete { .. } => {
                            warn!(offset = self.offset, error = %e, "log ends in a torn record");
                        }
                        _ => warn!(offset = self.offset, error = %e, "corrupt log record, stopping read"),
                    }
                    outcome.truncated_at = Some(self.offset);
                    break;
                }
            }
        }
        outcome
    }
}

/// Decode a whole log from the start
#[must_use]
pub fn read_all(log: &[u8]) -> ReadOutcome {
    Cursor::start().read(log)
}
