//! Append-only log files.
//!
//! A log starts with a [`Preamble`] record. [`LogWriter`] frames messages
//! onto any `Write`; [`read_log`] decodes a log tolerantly and checks the
//! preamble against the reader's schema version.

use crate::cursor::{ReadOutcome, read_all};
use crate::encoding::{FrameError, encode_batch, encode_frame};
use crate::event::{Event, Message, Preamble};
use kiln_core::Version;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;

/// Schema version written by this build
pub const SCHEMA_VERSION: Version = Version::new(1, 0, 0);

/// Log errors
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Framing failure while writing
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// First record is absent or not a preamble
    #[error("Log does not start with a preamble")]
    MissingPreamble,

    /// Written by an incompatible schema
    #[error("Log schema {found} cannot be read by {reader}")]
    IncompatibleVersion {
        /// Version in the preamble
        found: Version,
        /// Reader's version
        reader: Version,
    },
}

/// Result alias for log operations
pub type LogResult<T> = Result<T, LogError>;

/// Frames messages onto a writer
#[derive(Debug)]
pub struct LogWriter<W> {
    writer: W,
    records: u64,
    bytes: u64,
}

impl<W: Write> LogWriter<W> {
    /// Start a new log by writing `preamble`
    ///
    /// # Errors
    ///
    /// Returns error if the preamble cannot be written
    pub fn create(writer: W, preamble: Preamble) -> LogResult<Self> {
        let mut log = Self::resume(writer, 0, 0);
        log.append(&Message::new(Event::Preamble(preamble)))?;
        Ok(log)
    }

    /// Continue a log that already holds `records` records in `bytes` bytes
    #[must_use]
    pub const fn resume(writer: W, records: u64, bytes: u64) -> Self {
        Self {
            writer,
            records,
            bytes,
        }
    }

    /// Append one message
    ///
    /// # Errors
    ///
    /// Returns error if the message cannot be framed or written
    pub fn append(&mut self, message: &Message) -> LogResult<()> {
        let mut buf = Vec::new();
        let len = encode_frame(message, &mut buf)?;
        self.writer.write_all(&buf)?;
        self.records += 1;
        self.bytes += len as u64;
        Ok(())
    }

    /// Append a batch with a single write so it lands contiguously
    ///
    /// # Errors
    ///
    /// Returns error if any message cannot be framed (nothing is written
    /// then) or the write fails
    pub fn append_batch(&mut self, messages: &[Message]) -> LogResult<()> {
        let buf = encode_batch(messages)?;
        self.writer.write_all(&buf)?;
        self.records += messages.len() as u64;
        self.bytes += buf.len() as u64;
        debug!(count = messages.len(), bytes = buf.len(), "appended batch");
        Ok(())
    }

    /// Flush the underlying writer
    ///
    /// # Errors
    ///
    /// Returns error if flushing fails
    pub fn flush(&mut self) -> LogResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Records written, preamble included
    #[must_use]
    pub const fn records(&self) -> u64 {
        self.records
    }

    /// Bytes written
    #[must_use]
    pub const fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Consume and return the writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl LogWriter<File> {
    /// Create a new log file at `path`. Fails if it exists.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists or cannot be written
    pub fn create_file(path: &Path, preamble: Preamble) -> LogResult<Self> {
        let file = OpenOptions::new().append(true).create_new(true).open(path)?;
        Self::create(file, preamble)
    }
}

/// Decoded log
#[derive(Debug, Clone, PartialEq)]
pub struct LogContents {
    /// The log's preamble
    pub preamble: Preamble,
    /// Every decoded message, preamble record first
    pub read: ReadOutcome,
}

/// Decode `log` and validate its preamble against `reader`
///
/// # Errors
///
/// Returns error if the first record is not a preamble or its version
/// cannot be read. A torn tail is not an error.
pub fn read_log(log: &[u8], reader: Version) -> LogResult<LogContents> {
    let read = read_all(log);
    let preamble = match read.messages.first().map(Message::event) {
        Some(Event::Preamble(preamble)) => *preamble,
        _ => return Err(LogError::MissingPreamble),
    };
    if !reader.can_read(&preamble.version) {
        return Err(LogError::IncompatibleVersion {
            found: preamble.version,
            reader,
        });
    }
    Ok(LogContents { preamble, read })
}

/// Read and validate the log file at `path`
///
/// # Errors
///
/// Returns error if the file cannot be read or the preamble is invalid
pub fn read_log_file(path: &Path, reader: Version) -> LogResult<LogContents> {
    let bytes = std::fs::read(path)?;
    read_log(&bytes, reader)
}
