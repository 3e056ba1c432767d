//! KILN Graph Tracer
//!
//! Pipelines run twice. The discovery pass learns the operation graph
//! without side effects; the real pass executes it and emits task state
//! and timing events. Each [`ExecutionContext`] owns its span stack, so
//! concurrent contexts never contend on tracing state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod graph;
pub mod harness;
pub mod tracer;

pub use context::{ExecutionContext, Span, SpanGuard};
pub use error::{TraceError, TraceResult};
pub use graph::{DiscoveredGraph, Node};
pub use harness::{DualPass, PassReport, Reparented, StructureDiff};
pub use tracer::{Pass, Tracer};
