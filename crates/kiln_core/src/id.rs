//! Identifiers for KILN entities.
//!
//! Run and message ids are UUIDs. Message ids are UUIDv7 so that sorting by
//! id sorts by creation time. Operation ids are caller-chosen names that only
//! need to be unique among siblings.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Run identifier - identifies one pipeline execution and its log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random RunId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from UUID bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run_{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let raw = s.strip_prefix("run_").unwrap_or(s);
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|e| CoreError::InvalidId {
                reason: format!("run id {s:?}: {e}"),
            })
    }
}

/// Message identifier - time ordered, unique per message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Create a new time-ordered MessageId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg_{}", self.0)
    }
}

/// Operation identifier.
///
/// Unique among siblings under one parent, not globally. Paths of operation
/// ids are joined with [`OperationId::SEPARATOR`], so the separator is not
/// allowed inside an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationId(String);

impl OperationId {
    /// Separator used when joining ids into a path
    pub const SEPARATOR: char = '/';

    /// Create an operation id
    ///
    /// # Errors
    ///
    /// Returns error if the id is empty or contains the path separator
    pub fn new(id: impl Into<String>) -> CoreResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::InvalidId {
                reason: "operation id is empty".to_string(),
            });
        }
        if id.contains(Self::SEPARATOR) {
            return Err(CoreError::InvalidId {
                reason: format!("operation id {id:?} contains '{}'", Self::SEPARATOR),
            });
        }
        Ok(Self(id))
    }

    /// Get as str
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join a path of ids into a single task key
    #[must_use]
    pub fn join_path<'a>(path: impl IntoIterator<Item = &'a OperationId>) -> String {
        let mut out = String::new();
        for (i, id) in path.into_iter().enumerate() {
            if i > 0 {
                out.push(Self::SEPARATOR);
            }
            out.push_str(&id.0);
        }
        out
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OperationId {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for OperationId {
    type Error = CoreError;

    fn try_from(value: &str) -> CoreResult<Self> {
        Self::new(value)
    }
}

impl From<OperationId> for String {
    fn from(id: OperationId) -> Self {
        id.0
    }
}

impl AsRef<str> for OperationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
