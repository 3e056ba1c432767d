//! The event service surface.

use crate::error::DispatchResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use kiln_core::RunId;
use kiln_log::Message;
use serde::{Deserialize, Serialize};

/// Acknowledgement of a dispatched batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchAck {
    /// Messages persisted from the batch
    pub accepted: usize,
    /// Record number of the first of them
    pub first_seq: u64,
}

/// One chunk of a persisted log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogResponse {
    /// Messages in log order
    pub messages: Vec<Message>,
    /// Set on the last chunk when the log ends in a torn record
    pub truncated: bool,
}

/// Piece of an artifact upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadChunk {
    /// Announces the artifact; must come first
    Metadata {
        /// Hex BLAKE3 digest of the whole artifact
        checksum: String,
    },
    /// Artifact bytes
    Data(Bytes),
}

/// Messages of a run, persisted ones first, then live ones
pub type MessageStream = BoxStream<'static, DispatchResult<Message>>;

/// Finite stream of log chunks
pub type LogStream = BoxStream<'static, DispatchResult<LogResponse>>;

/// Incoming upload
pub type UploadStream = BoxStream<'static, UploadChunk>;

/// Event service: producers dispatch batches, consumers watch or read
/// runs, and pipelines upload artifacts.
#[async_trait]
pub trait EventService: Send + Sync {
    /// Persist `batch` at the end of the run's log and publish it to
    /// watchers. A batch is never interleaved with another.
    ///
    /// # Errors
    ///
    /// Returns error if the batch is malformed or cannot be persisted
    async fn dispatch(&self, run: RunId, batch: Vec<Message>) -> DispatchResult<DispatchAck>;

    /// Every persisted message of the run from the start, then live ones,
    /// in persistence order.
    ///
    /// # Errors
    ///
    /// Returns error if the run has no log
    async fn watch(&self, run: RunId) -> DispatchResult<MessageStream>;

    /// What is persisted for the run, in chunks.
    ///
    /// # Errors
    ///
    /// Returns error if the run has no readable log
    async fn logs(&self, run: RunId) -> DispatchResult<LogStream>;

    /// Store an artifact under its checksum once the bytes verify.
    ///
    /// # Errors
    ///
    /// Returns error if the metadata is missing or invalid, or the bytes
    /// do not match the checksum
    async fn upload(&self, chunks: UploadStream) -> DispatchResult<RunId>;
}
