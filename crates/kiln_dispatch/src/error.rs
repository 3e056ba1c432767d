//! Dispatch service errors.

use kiln_core::{CoreError, RunId};
use kiln_log::{FrameError, LogError};
use std::io;

/// Dispatch service errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No log exists for the run
    #[error("Unknown run: {0}")]
    UnknownRun(RunId),

    /// A preamble was dispatched after the start of a log
    #[error("Preamble at record {seq} of run {run}; only the first record may be a preamble")]
    MisplacedPreamble {
        /// Run the batch was for
        run: RunId,
        /// Record the preamble would have landed at
        seq: u64,
    },

    /// Upload did not start with its metadata
    #[error("Upload must start with a metadata chunk")]
    MissingMetadata,

    /// Upload sent metadata more than once
    #[error("Upload sent a second metadata chunk")]
    DuplicateMetadata,

    /// Upload checksum is not a BLAKE3 hex digest
    #[error("Invalid upload checksum: {0}")]
    InvalidChecksum(#[from] CoreError),

    /// Uploaded bytes do not hash to the announced checksum
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Announced digest
        expected: String,
        /// Digest of the received bytes
        actual: String,
    },

    /// Run log could not be read
    #[error(transparent)]
    Log(#[from] LogError),

    /// Batch could not be framed
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;
