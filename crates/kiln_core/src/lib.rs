//! KILN Core Types
//!
//! Pure types shared by the boundary protocol, the tracer and the event log.
//! Nothing in this crate performs I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod id;
pub mod time;
pub mod version;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use hash::{Hash, Hasher};
pub use id::{MessageId, OperationId, RunId};
pub use time::{Deadline, Timestamp};
pub use version::{Version, VersionError};
