//! File-backed [`EventService`].

use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::run::{DefaultPreamble, RunLog};
use crate::service::{
    DispatchAck, EventService, LogResponse, LogStream, MessageStream, UploadStream,
};
use crate::{upload, watch};
use async_trait::async_trait;
use futures::stream;
use kiln_core::{Hash, RunId};
use kiln_log::{Message, read_log};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::fs;
use tracing::{debug, info};

/// Event service persisting each run to `<root>/runs/<run>.log`
#[derive(Debug)]
pub struct Dispatcher {
    config: DispatchConfig,
    runs: Mutex<HashMap<RunId, Arc<RunLog>>>,
}

impl Dispatcher {
    /// Create a dispatcher
    #[must_use]
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Get config
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Stop publishing live messages for `run`.
    ///
    /// Watchers drain what was persisted and then end. The run keeps its
    /// single log handle, so a later dispatch resumes the same log and
    /// numbering. Returns whether the run was open.
    pub async fn close(&self, run: RunId) -> bool {
        let cached = self.lock_runs().get(&run).cloned();
        let Some(log) = cached else {
            return false;
        };
        let closed = log.close().await;
        if closed {
            info!(%run, "run closed");
        }
        closed
    }

    /// Stored artifact of an upload, by the run id the upload returned.
    ///
    /// # Errors
    ///
    /// Returns error if no upload was recorded under `run`
    pub async fn upload_of(&self, run: RunId) -> DispatchResult<PathBuf> {
        let key = match fs::read_to_string(self.config.upload_record_path(run)).await {
            Ok(key) => key,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DispatchError::UnknownRun(run));
            }
            Err(e) => return Err(e.into()),
        };
        let checksum = Hash::from_hex(key.trim())?;
        Ok(self.config.upload_path(&checksum))
    }

    /// Run logs currently held open
    #[must_use]
    pub fn open_runs(&self) -> usize {
        self.lock_runs().len()
    }

    /// The one log handle of `run`.
    ///
    /// When the map is full, entries nobody else holds and nobody watches
    /// are released first; they are restored from disk on next use.
    fn run_log(&self, run: RunId) -> Arc<RunLog> {
        let mut runs = self.lock_runs();
        if let Some(log) = runs.get(&run) {
            return Arc::clone(log);
        }
        if runs.len() >= self.config.max_open_runs {
            let before = runs.len();
            runs.retain(|_, log| !log.is_idle());
            debug!(released = before - runs.len(), open = runs.len(), "released idle run logs");
        }
        let log = Arc::new(RunLog::new(
            run,
            self.config.run_log_path(run),
            self.config.watch_capacity,
        ));
        runs.insert(run, Arc::clone(&log));
        log
    }

    async fn existing(&self, run: RunId) -> DispatchResult<Arc<RunLog>> {
        let cached = self.lock_runs().get(&run).cloned();
        if let Some(log) = cached {
            return Ok(log);
        }
        if fs::try_exists(self.config.run_log_path(run)).await? {
            Ok(self.run_log(run))
        } else {
            Err(DispatchError::UnknownRun(run))
        }
    }

    fn default_preamble(&self) -> DefaultPreamble {
        DefaultPreamble {
            version: self.config.schema_version,
            validity: self.config.preamble_validity,
        }
    }

    fn lock_runs(&self) -> std::sync::MutexGuard<'_, HashMap<RunId, Arc<RunLog>>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventService for Dispatcher {
    async fn dispatch(&self, run: RunId, batch: Vec<Message>) -> DispatchResult<DispatchAck> {
        let log = self.run_log(run);
        let ack = log.append(batch, self.default_preamble()).await?;
        debug!(%run, accepted = ack.accepted, first_seq = ack.first_seq, "batch dispatched");
        Ok(ack)
    }

    async fn watch(&self, run: RunId) -> DispatchResult<MessageStream> {
        let (path, live) = {
            let log = self.existing(run).await?;
            (log.path().to_path_buf(), log.subscribe().await)
        };
        debug!(%run, "watcher attached");
        Ok(watch::follow(path, live))
    }

    async fn logs(&self, run: RunId) -> DispatchResult<LogStream> {
        let log = match fs::read(self.config.run_log_path(run)).await {
            Ok(log) => log,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DispatchError::UnknownRun(run));
            }
            Err(e) => return Err(e.into()),
        };
        let contents = read_log(&log, self.config.schema_version)?;
        let truncated = contents.read.is_truncated();

        let mut chunks: Vec<LogResponse> = contents
            .read
            .messages
            .chunks(self.config.log_chunk.max(1))
            .map(|chunk| LogResponse {
                messages: chunk.to_vec(),
                truncated: false,
            })
            .collect();
        if let Some(last) = chunks.last_mut() {
            last.truncated = truncated;
        }
        Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
    }

    async fn upload(&self, chunks: UploadStream) -> DispatchResult<RunId> {
        let checksum = upload::receive(&self.config.uploads_dir(), chunks).await?;
        let run = RunId::new();
        fs::create_dir_all(self.config.runs_dir()).await?;
        fs::write(self.config.upload_record_path(run), checksum.to_hex()).await?;
        info!(%run, %checksum, "upload recorded");
        Ok(run)
    }
}
