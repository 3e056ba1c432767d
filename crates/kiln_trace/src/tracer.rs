//! The tracer shared by every context of one pass.

use crate::context::ExecutionContext;
use crate::graph::DiscoveredGraph;
use kiln_core::OperationId;
use kiln_log::{EventSink, Message};
use std::sync::{Arc, Mutex, PoisonError};

/// Which pass a tracer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Dry run that learns the operation graph
    Discovery,
    /// Real run
    Execution,
}

/// Pass-wide tracer state: the pass kind, the event sink and the graph.
///
/// Span stacks are not kept here; each [`ExecutionContext`] owns its own.
pub struct Tracer {
    pass: Pass,
    sink: Arc<dyn EventSink>,
    graph: Mutex<DiscoveredGraph>,
}

impl Tracer {
    /// Tracer for `pass` emitting into `sink`
    #[must_use]
    pub fn new(pass: Pass, sink: Arc<dyn EventSink>) -> Arc<Self> {
        Arc::new(Self {
            pass,
            sink,
            graph: Mutex::new(DiscoveredGraph::new()),
        })
    }

    /// Tracer for a discovery pass
    #[must_use]
    pub fn discovery(sink: Arc<dyn EventSink>) -> Arc<Self> {
        Self::new(Pass::Discovery, sink)
    }

    /// Tracer for a real pass
    #[must_use]
    pub fn execution(sink: Arc<dyn EventSink>) -> Arc<Self> {
        Self::new(Pass::Execution, sink)
    }

    /// Root context for this pass
    #[must_use]
    pub fn context(self: &Arc<Self>) -> ExecutionContext {
        ExecutionContext::new(Arc::clone(self))
    }

    /// The pass kind
    #[must_use]
    pub const fn pass(&self) -> Pass {
        self.pass
    }

    /// Whether this is a discovery pass.
    ///
    /// Pipelines use this to skip side effects while keeping the same
    /// control flow. Both passes must take the same branches: a condition
    /// that depends on state only the real pass mutates makes the
    /// discovered graph diverge from the executed one. Use
    /// [`crate::DualPass`] to check.
    #[must_use]
    pub fn analysing(&self) -> bool {
        self.pass == Pass::Discovery
    }

    /// Snapshot of the operations seen so far
    #[must_use]
    pub fn graph(&self) -> DiscoveredGraph {
        self.lock_graph().clone()
    }

    pub(crate) fn record(&self, parent: Option<&str>, path: &str, id: &OperationId) -> bool {
        self.lock_graph().insert(parent, path, id)
    }

    pub(crate) fn emit(&self, message: Message) {
        self.sink.emit(message);
    }

    fn lock_graph(&self) -> std::sync::MutexGuard<'_, DiscoveredGraph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("pass", &self.pass)
            .field("nodes", &self.lock_graph().len())
            .finish_non_exhaustive()
    }
}
