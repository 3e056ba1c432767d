//! Per-run log state: the on-disk tail and the live channel.

use crate::error::{DispatchError, DispatchResult};
use crate::service::DispatchAck;
use kiln_core::{RunId, Version};
use kiln_log::{Event, LogError, Message, encode_frame, read_all};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, warn};

/// A persisted message and where it sits in the log
#[derive(Debug, Clone)]
pub(crate) struct Sequenced {
    /// Record number
    pub seq: u64,
    /// Byte offset just past the record
    pub end: u64,
    pub message: Message,
}

/// Preamble written when a log is opened without one
#[derive(Debug, Clone, Copy)]
pub(crate) struct DefaultPreamble {
    pub version: Version,
    pub validity: Duration,
}

#[derive(Debug, Default)]
struct Tail {
    file: Option<File>,
    restored: bool,
    records: u64,
    bytes: u64,
    /// `None` once the run is closed
    live: Option<broadcast::Sender<Sequenced>>,
}

impl Tail {
    /// Pick up an existing log, cutting off a torn final record so new
    /// frames are appended after the last good one.
    async fn restore(&mut self, path: &Path) -> DispatchResult<()> {
        let log = match fs::read(path).await {
            Ok(log) => log,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let outcome = read_all(&log);
        let end = outcome.truncated_at.unwrap_or(log.len() as u64);
        if outcome.is_truncated() {
            warn!(path = %path.display(), end, "cutting torn tail off run log");
            OpenOptions::new()
                .write(true)
                .open(path)
                .await?
                .set_len(end)
                .await?;
        }
        self.records = outcome.messages.len() as u64;
        self.bytes = end;
        self.restored = true;
        Ok(())
    }

    async fn file(&mut self, path: &Path) -> DispatchResult<&mut File> {
        if self.file.is_none() {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).await?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            self.file = Some(file);
        }
        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(io::Error::other("run log not open").into()),
        }
    }
}

/// One run's log.
///
/// The dispatcher keeps at most one per run, so every append and every
/// live subscription for the run goes through the same tail lock.
#[derive(Debug)]
pub(crate) struct RunLog {
    run: RunId,
    path: PathBuf,
    capacity: usize,
    tail: Mutex<Tail>,
}

impl RunLog {
    pub(crate) fn new(run: RunId, path: PathBuf, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (live, _) = broadcast::channel(capacity);
        Self {
            run,
            path,
            capacity,
            tail: Mutex::new(Tail {
                live: Some(live),
                ..Tail::default()
            }),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Receiver for live appends. On a closed run the receiver reports
    /// closed straight away.
    pub(crate) async fn subscribe(&self) -> broadcast::Receiver<Sequenced> {
        let tail = self.tail.lock().await;
        match &tail.live {
            Some(live) => live.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Stop publishing; returns whether the run was open
    pub(crate) async fn close(&self) -> bool {
        self.tail.lock().await.live.take().is_some()
    }

    /// Whether nothing but the dispatcher's map refers to this log and no
    /// watcher is attached. Only then can the entry be dropped without
    /// racing an append.
    pub(crate) fn is_idle(self: &Arc<Self>) -> bool {
        Arc::strong_count(self) == 1
            && self.tail.try_lock().is_ok_and(|tail| {
                tail.live
                    .as_ref()
                    .is_none_or(|live| live.receiver_count() == 0)
            })
    }

    /// Append `batch` with a single write while holding the tail lock,
    /// then publish it. A log is started with `preamble` unless the batch
    /// opens with its own.
    pub(crate) async fn append(
        &self,
        mut batch: Vec<Message>,
        preamble: DefaultPreamble,
    ) -> DispatchResult<DispatchAck> {
        let mut tail = self.tail.lock().await;
        if !tail.restored {
            tail.restore(&self.path).await?;
        }
        if batch.is_empty() {
            return Ok(DispatchAck {
                accepted: 0,
                first_seq: tail.records,
            });
        }

        let mut injected = 0;
        if tail.records == 0 {
            match batch[0].event() {
                Event::Preamble(own) if !preamble.version.can_read(&own.version) => {
                    return Err(LogError::IncompatibleVersion {
                        found: own.version,
                        reader: preamble.version,
                    }
                    .into());
                }
                Event::Preamble(_) => {}
                _ => {
                    debug!(run = %self.run, "starting run log with a default preamble");
                    batch.insert(0, Message::preamble(preamble.version, preamble.validity));
                    injected = 1;
                }
            }
        }

        let start = tail.records;
        let mut frames = Vec::new();
        let mut ends = Vec::with_capacity(batch.len());
        for (i, message) in batch.iter().enumerate() {
            let seq = start + i as u64;
            if seq > 0 && matches!(message.event(), Event::Preamble(_)) {
                return Err(DispatchError::MisplacedPreamble { run: self.run, seq });
            }
            encode_frame(message, &mut frames)?;
            ends.push(tail.bytes + frames.len() as u64);
        }

        let written = {
            let file = tail.file(&self.path).await?;
            match file.write_all(&frames).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            // Reopen and cut any partial frame on the next append
            tail.file = None;
            tail.restored = false;
            return Err(e.into());
        }

        tail.records = start + batch.len() as u64;
        tail.bytes += frames.len() as u64;
        debug!(run = %self.run, records = tail.records, bytes = tail.bytes, "appended batch");

        let accepted = batch.len() - injected;
        let capacity = self.capacity;
        let live = tail.live.get_or_insert_with(|| {
            debug!(run = %self.run, "reopening closed run");
            broadcast::channel(capacity).0
        });
        for (i, (message, end)) in batch.into_iter().zip(ends).enumerate() {
            // No receivers is not an error
            let _ = live.send(Sequenced {
                seq: start + i as u64,
                end,
                message,
            });
        }

        Ok(DispatchAck {
            accepted,
            first_seq: start + injected as u64,
        })
    }
}
