//! Runs a pipeline twice, discovery then real, and compares the structure
//! each pass produced.
//!
//! Discovery is only as faithful as the pipeline's branching: both passes
//! must take the same branches. The harness makes divergence visible
//! instead of trusting it.

use crate::context::ExecutionContext;
use crate::graph::DiscoveredGraph;
use crate::tracer::Tracer;
use kiln_core::OperationId;
use kiln_log::EventSink;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// An id found under different parents in the two passes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reparented {
    /// The reused id
    pub id: OperationId,
    /// Path in the discovery pass
    pub discovered: String,
    /// Path in the real pass
    pub executed: String,
}

/// Difference between discovered and executed structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureDiff {
    /// Discovered but never executed
    pub missing: Vec<String>,
    /// Executed but never discovered
    pub unexpected: Vec<String>,
    /// Pairs of `missing`/`unexpected` entries sharing an id
    pub reparented: Vec<Reparented>,
}

impl StructureDiff {
    /// Compare two graphs
    #[must_use]
    pub fn between(discovered: &DiscoveredGraph, executed: &DiscoveredGraph) -> Self {
        let missing: Vec<String> = discovered
            .paths()
            .filter(|p| !executed.contains(p))
            .map(str::to_string)
            .collect();
        let unexpected: Vec<String> = executed
            .paths()
            .filter(|p| !discovered.contains(p))
            .map(str::to_string)
            .collect();

        let mut reparented = Vec::new();
        for path in &unexpected {
            let Some(node) = executed.get(path) else {
                continue;
            };
            let previous = missing
                .iter()
                .find(|m| discovered.get(m).is_some_and(|d| d.id == node.id));
            if let Some(previous) = previous {
                reparented.push(Reparented {
                    id: node.id.clone(),
                    discovered: previous.clone(),
                    executed: path.clone(),
                });
            }
        }

        Self {
            missing,
            unexpected,
            reparented,
        }
    }

    /// Whether both passes produced the same structure
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Outcome of a dual-pass run
#[derive(Debug, Clone)]
pub struct PassReport<T> {
    /// Value returned by the real pass
    pub output: T,
    /// Structure seen by the discovery pass
    pub discovered: DiscoveredGraph,
    /// Structure seen by the real pass
    pub executed: DiscoveredGraph,
    /// Their difference
    pub diff: StructureDiff,
}

/// Dual-pass runner
#[derive(Clone)]
pub struct DualPass {
    sink: Arc<dyn EventSink>,
}

impl DualPass {
    /// Runner whose passes both emit into `sink`
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Run `pipeline` in discovery mode, then for real.
    ///
    /// # Errors
    ///
    /// Returns the pipeline's error from whichever pass failed first; the
    /// real pass does not run if discovery fails
    pub fn run<T, E, F>(&self, mut pipeline: F) -> Result<PassReport<T>, E>
    where
        F: FnMut(&mut ExecutionContext) -> Result<T, E>,
    {
        let discovery = Tracer::discovery(Arc::clone(&self.sink));
        run_pass(&discovery, &mut pipeline)?;
        let discovered = discovery.graph();
        info!(nodes = discovered.len(), "discovery pass finished");

        let execution = Tracer::execution(Arc::clone(&self.sink));
        let output = run_pass(&execution, &mut pipeline)?;
        let executed = execution.graph();

        let diff = StructureDiff::between(&discovered, &executed);
        for moved in &diff.reparented {
            warn!(id = %moved.id, discovered = %moved.discovered, executed = %moved.executed, "operation id reused under a different parent");
        }
        if !diff.is_consistent() {
            warn!(
                missing = diff.missing.len(),
                unexpected = diff.unexpected.len(),
                "executed structure diverged from discovery"
            );
        }

        Ok(PassReport {
            output,
            discovered,
            executed,
            diff,
        })
    }
}

impl std::fmt::Debug for DualPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualPass").finish_non_exhaustive()
    }
}

fn run_pass<T, E, F>(tracer: &Arc<Tracer>, pipeline: &mut F) -> Result<T, E>
where
    F: FnMut(&mut ExecutionContext) -> Result<T, E>,
{
    let mut ctx = tracer.context();
    let result = pipeline(&mut ctx);
    if !ctx.is_idle() {
        warn!(pass = ?tracer.pass(), depth = ctx.depth(), "pass ended with open spans");
    }
    result
}
