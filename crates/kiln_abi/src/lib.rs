//! KILN Capability Boundary
//!
//! Sandboxed pipeline code reaches privileged operations only through the
//! [`Boundary`] trait: primitives in, one status code out. The guest side
//! marshals typed arguments into call-scoped guest memory through the
//! proxies in [`proxy`]; the host side decodes them in [`HostAdapter`] and
//! hands them to a [`CapabilityHost`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod boundary;
pub mod capability;
pub mod host;
pub mod marshal;
pub mod memory;
pub mod proxy;
pub mod system;

pub use boundary::Boundary;
pub use capability::{Capability, CapabilityError};
pub use host::{CapabilityHost, HostAdapter, HostError, codes};
pub use marshal::{MarshalError, MarshalLimits, Status, StatusKind, StrArray};
pub use memory::{CallFrame, GuestMemory, MemoryLimit, Slice};
pub use proxy::{Container, Coverage, GIT_COMMIT_BUF_LEN, Git, Guest, Metrics, Process};
pub use system::{ContainerBackend, EventTelemetry, SystemHost, TelemetryBackend};
