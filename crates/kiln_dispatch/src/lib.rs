//! KILN Dispatch
//!
//! Persists run events to per-run append-only logs, streams them to
//! watchers live, and stores checksummed artifact uploads.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod service;

mod run;
mod upload;
mod watch;

pub use config::DispatchConfig;
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, DispatchResult};
pub use service::{
    DispatchAck, EventService, LogResponse, LogStream, MessageStream, UploadChunk, UploadStream,
};
