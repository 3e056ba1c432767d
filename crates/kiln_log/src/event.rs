//! Event types for the message log.
//!
//! A [`Message`] is stamped with its id and capture time when it is built
//! and has no mutators afterwards.

use crate::task::Task;
use kiln_core::{MessageId, OperationId, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable log envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    ts: Timestamp,
    event: Event,
}

impl Message {
    /// Stamp `event` with a fresh id and the current time
    #[must_use]
    pub fn new(event: Event) -> Self {
        Self {
            id: MessageId::new(),
            ts: Timestamp::now(),
            event,
        }
    }

    /// Liveness marker
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(Event::Heartbeat)
    }

    /// Log preamble for `version`, valid from now for `validity`
    #[must_use]
    pub fn preamble(version: Version, validity: Duration) -> Self {
        Self::new(Event::Preamble(Preamble::new(version, validity)))
    }

    /// Task state snapshot
    #[must_use]
    pub fn task(task: Task) -> Self {
        Self::new(Event::Task(task))
    }

    /// Message id
    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.id
    }

    /// Capture time
    #[must_use]
    pub const fn ts(&self) -> Timestamp {
        self.ts
    }

    /// Payload
    #[must_use]
    pub const fn event(&self) -> &Event {
        &self.event
    }

    /// Take the payload
    #[must_use]
    pub fn into_event(self) -> Event {
        self.event
    }
}

/// Message payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// First record of every log
    Preamble(Preamble),
    /// Liveness marker with no content
    Heartbeat,
    /// Task state snapshot
    Task(Task),
    /// Metric sample
    Metric(Metric),
    /// Coverage file report
    Coverage(Coverage),
    /// Timing record of one finished span
    Op(Op),
}

impl Event {
    /// Short name of the variant
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Preamble(_) => "preamble",
            Self::Heartbeat => "heartbeat",
            Self::Task(_) => "task",
            Self::Metric(_) => "metric",
            Self::Coverage(_) => "coverage",
            Self::Op(_) => "op",
        }
    }
}

/// Schema version and validity window of a log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preamble {
    /// Schema version the log was written with
    pub version: Version,
    /// Start of the validity window
    pub not_before: Timestamp,
    /// End of the validity window
    pub not_after: Timestamp,
}

impl Preamble {
    /// Window starting now
    #[must_use]
    pub fn new(version: Version, validity: Duration) -> Self {
        let now = Timestamp::now();
        Self {
            version,
            not_before: now,
            not_after: now.add(validity),
        }
    }

    /// Whether `at` falls within the window
    #[must_use]
    pub fn is_valid_at(&self, at: Timestamp) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

/// Metric sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric name
    pub name: String,
    /// Sample value
    pub value: f64,
    /// `key=value` tags
    pub tags: Vec<String>,
}

/// Coverage report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    /// Report format, e.g. `lcov`
    pub format: String,
    /// Host path of the report
    pub path: String,
}

/// How a span ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Wrapped call returned normally
    Success,
    /// Wrapped call errored or unwound
    Error,
}

impl Outcome {
    /// Whether the span succeeded
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Timing record for one popped span
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Op {
    /// Operation id
    pub name: OperationId,
    /// Path above the operation, captured when it was pushed
    pub ancestors: Vec<OperationId>,
    /// Outcome
    pub outcome: Outcome,
    /// Time between push and pop
    pub elapsed_ms: u64,
}

impl Op {
    /// Full slash-joined path of the operation
    #[must_use]
    pub fn path(&self) -> String {
        OperationId::join_path(self.ancestors.iter().chain(std::iter::once(&self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;

    #[test]
    fn test_message_stamped_once() {
        let a = Message::heartbeat();
        let b = Message::heartbeat();
        assert_ne!(a.id(), b.id());
        assert!(a.ts() <= b.ts());
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn test_preamble_window() {
        let preamble = Preamble::new(Version::new(1, 0, 0), Duration::from_secs(60));
        assert!(preamble.is_valid_at(preamble.not_before));
        assert!(preamble.is_valid_at(preamble.not_after));
        assert!(!preamble.is_valid_at(preamble.not_after.add(Duration::from_secs(1))));
    }

    #[test]
    fn test_op_path() {
        let op = Op {
            name: OperationId::new("test").unwrap(),
            ancestors: vec![
                OperationId::new("ci").unwrap(),
                OperationId::new("build").unwrap(),
            ],
            outcome: Outcome::Success,
            elapsed_ms: 12,
        };
        assert_eq!(op.path(), "ci/build/test");
    }

    #[test]
    fn test_event_json_shape() {
        let message = Message::task(Task::new("ci/build", "Build workspace"));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["event"]["Task"]["id"], "ci/build");
        assert_eq!(json["event"]["Task"]["state"], "Pending");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
        match back.event() {
            Event::Task(task) => assert_eq!(task.state(), TaskState::Pending),
            other => panic!("unexpected {}", other.kind()),
        }
    }
}
