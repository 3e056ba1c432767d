//! Watch streams: replay from the log, then follow the live channel.
//!
//! A watcher never blocks the writer and never loses a message. When it
//! falls behind the live channel, or sees a record number it did not
//! expect, it reads the missing records back from the log at its cursor
//! and then continues live.

use crate::error::DispatchResult;
use crate::run::Sequenced;
use crate::service::MessageStream;
use async_stream::stream;
use kiln_log::{Cursor, Message};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Stream every message of the log at `path`, then what `live` publishes
pub(crate) fn follow(path: PathBuf, mut live: Receiver<Sequenced>) -> MessageStream {
    Box::pin(stream! {
        let mut cursor = Cursor::start();
        let mut behind = true;
        let mut closed = false;
        loop {
            if behind {
                match catch_up(&path, &mut cursor).await {
                    Ok(messages) => {
                        for message in messages {
                            yield Ok(message);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
                behind = false;
            }
            if closed {
                break;
            }
            match live.recv().await {
                Ok(next) if next.seq < cursor.record() => {}
                Ok(next) if next.seq == cursor.record() => {
                    cursor = Cursor::at(next.seq + 1, next.end);
                    yield Ok(next.message);
                }
                Ok(next) => {
                    debug!(expected = cursor.record(), received = next.seq, "gap in live messages, reading log");
                    behind = true;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, record = cursor.record(), "watcher lagged, reading log");
                    behind = true;
                }
                Err(RecvError::Closed) => {
                    behind = true;
                    closed = true;
                }
            }
        }
    })
}

/// Read the records after `cursor` and move it past them
async fn catch_up(path: &Path, cursor: &mut Cursor) -> DispatchResult<Vec<Message>> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    file.seek(SeekFrom::Start(cursor.offset())).await?;
    let mut rest = Vec::new();
    file.read_to_end(&mut rest).await?;

    let mut local = Cursor::at(cursor.record(), 0);
    let outcome = local.read(&rest);
    *cursor = Cursor::at(local.record(), cursor.offset() + local.offset());
    Ok(outcome.messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_log::encode_frame;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_catch_up_resumes_at_cursor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.log");
        let messages: Vec<Message> = (0..4).map(|_| Message::heartbeat()).collect();
        let mut log = Vec::new();
        for message in &messages {
            encode_frame(message, &mut log).unwrap();
        }
        let whole = log.len();
        // Half of a fifth record
        let mut torn = Vec::new();
        encode_frame(&Message::heartbeat(), &mut torn).unwrap();
        log.extend_from_slice(&torn[..torn.len() / 2]);
        std::fs::write(&path, &log).unwrap();

        let mut cursor = Cursor::start();
        assert_eq!(catch_up(&path, &mut cursor).await.unwrap(), messages);
        assert_eq!(cursor, Cursor::at(4, whole as u64));

        // Nothing new until the record is completed
        assert!(catch_up(&path, &mut cursor).await.unwrap().is_empty());
        log.truncate(whole);
        log.extend_from_slice(&torn);
        std::fs::write(&path, &log).unwrap();
        assert_eq!(catch_up(&path, &mut cursor).await.unwrap().len(), 1);
        assert_eq!(cursor.record(), 5);
    }

    #[tokio::test]
    async fn test_catch_up_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut cursor = Cursor::start();
        let read = catch_up(&dir.path().join("absent.log"), &mut cursor).await.unwrap();
        assert!(read.is_empty());
        assert_eq!(cursor, Cursor::start());
    }
}
