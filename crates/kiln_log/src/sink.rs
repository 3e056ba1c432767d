//! Destinations for emitted messages.

use crate::event::Message;
use crate::stream::LogWriter;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::error;

/// Receives messages as they are produced. Emitting never fails from the
/// producer's point of view; a sink reports its own failures.
pub trait EventSink: Send + Sync {
    /// Accept one message
    fn emit(&self, message: Message);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, message: Message) {
        (**self).emit(message);
    }
}

impl<S: EventSink + ?Sized> EventSink for &S {
    fn emit(&self, message: Message) {
        (**self).emit(message);
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _message: Message) {}
}

/// Collects messages in memory. Clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl MemorySink {
    /// Empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain everything emitted so far
    #[must_use]
    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.messages.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of messages held
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn emit(&self, message: Message) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }
}

/// Appends every message to a log
#[derive(Debug)]
pub struct LogSink<W> {
    log: Mutex<LogWriter<W>>,
}

impl<W: Write + Send> LogSink<W> {
    /// Wrap a log writer
    #[must_use]
    pub fn new(log: LogWriter<W>) -> Self {
        Self {
            log: Mutex::new(log),
        }
    }

    /// Take the writer back
    pub fn into_inner(self) -> LogWriter<W> {
        self.log.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> EventSink for LogSink<W> {
    fn emit(&self, message: Message) {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = log.append(&message) {
            error!(id = %message.id(), error = %e, "failed to append message to log");
        }
    }
}
