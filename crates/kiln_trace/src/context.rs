//! Execution contexts and their span stacks.
//!
//! A context is Idle while its stack is empty and Active otherwise. Pushes
//! and pops must nest: a pop names the span on top of the stack and the
//! parent it was pushed under. Anything else is a stack discipline
//! violation, returned to the caller and logged, with the stack untouched.

use crate::error::{TraceError, TraceResult};
use crate::tracer::{Pass, Tracer};
use kiln_core::OperationId;
use kiln_log::{Event, Message, Op, Outcome, Task, TaskState};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// One active push/pop region
#[derive(Debug, Clone)]
pub struct Span {
    parent: Option<OperationId>,
    id: OperationId,
    path: String,
    ancestors: Arc<[OperationId]>,
    started_at: Instant,
    task: Task,
}

impl Span {
    /// Operation id
    #[must_use]
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    /// Parent id, `None` at the root
    #[must_use]
    pub fn parent(&self) -> Option<&OperationId> {
        self.parent.as_ref()
    }

    /// Slash-joined path, also the task id
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Ancestors captured at push
    #[must_use]
    pub fn ancestors(&self) -> &[OperationId] {
        &self.ancestors
    }
}

/// A logical run: an immutable inherited path plus its own span stack
#[derive(Debug)]
pub struct ExecutionContext {
    tracer: Arc<Tracer>,
    base: Arc<[OperationId]>,
    stack: Vec<Span>,
}

impl ExecutionContext {
    /// Root context of `tracer`'s pass
    #[must_use]
    pub fn new(tracer: Arc<Tracer>) -> Self {
        Self {
            tracer,
            base: Arc::from(Vec::new()),
            stack: Vec::new(),
        }
    }

    /// Child context for concurrent work. It starts Idle, inherits a copy
    /// of the current path, and shares nothing mutable with `self`.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            tracer: Arc::clone(&self.tracer),
            base: self.snapshot(),
            stack: Vec::new(),
        }
    }

    /// The pass tracer
    #[must_use]
    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    /// See [`Tracer::analysing`]
    #[must_use]
    pub fn analysing(&self) -> bool {
        self.tracer.analysing()
    }

    /// Number of active spans
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Whether no span is active
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.stack.is_empty()
    }

    /// Innermost active span
    #[must_use]
    pub fn top(&self) -> Option<&Span> {
        self.stack.last()
    }

    /// Id new spans are pushed under
    #[must_use]
    pub fn current(&self) -> Option<&OperationId> {
        self.stack.last().map(|s| &s.id).or_else(|| self.base.last())
    }

    /// Full current path, inherited part included
    #[must_use]
    pub fn path(&self) -> Vec<OperationId> {
        self.snapshot().to_vec()
    }

    fn snapshot(&self) -> Arc<[OperationId]> {
        self.base
            .iter()
            .chain(self.stack.iter().map(|s| &s.id))
            .cloned()
            .collect()
    }

    /// Push `id` under `parent` (`""` for the root)
    ///
    /// # Errors
    ///
    /// Returns error if `parent` is not the current span or `id` is invalid
    pub fn push(&mut self, parent: &str, id: &str) -> TraceResult<()> {
        let expected = self.current().map_or("", OperationId::as_str);
        if expected != parent {
            return Err(self.violation("push", expected.to_string(), parent.to_string()));
        }
        let id = OperationId::new(id)?;
        let ancestors = self.snapshot();
        let parent_path = (!ancestors.is_empty()).then(|| OperationId::join_path(ancestors.iter()));
        let path = OperationId::join_path(ancestors.iter().chain(std::iter::once(&id)));

        let is_new = self.tracer.record(parent_path.as_deref(), &path, &id);
        let mut task = Task::new(path.clone(), id.as_str());
        match self.tracer.pass() {
            Pass::Discovery => {
                if is_new {
                    self.tracer.emit(Message::task(task.clone()));
                }
            }
            Pass::Execution => {
                task.advance(TaskState::Initiated)?;
                self.tracer.emit(Message::task(task.clone()));
            }
        }
        debug!(path = %path, depth = self.stack.len(), "span pushed");

        self.stack.push(Span {
            parent: ancestors.last().cloned(),
            id,
            path,
            ancestors,
            started_at: Instant::now(),
            task,
        });
        Ok(())
    }

    /// Pop `id`, which must be the top span and pushed under `parent`.
    ///
    /// In the real pass this emits the span's `Op` record followed by its
    /// terminal task state.
    ///
    /// # Errors
    ///
    /// Returns error if `id` or `parent` do not match the top of the stack;
    /// the stack is left unchanged
    pub fn pop(&mut self, parent: &str, id: &str, outcome: Outcome) -> TraceResult<()> {
        let matches = self.stack.last().is_some_and(|top| {
            top.id.as_str() == id && top.parent.as_ref().map_or("", OperationId::as_str) == parent
        });
        if !matches {
            let expected = self
                .stack
                .last()
                .map_or_else(String::new, |top| top.id.to_string());
            return Err(self.violation("pop", expected, id.to_string()));
        }
        let Some(mut span) = self.stack.pop() else {
            return Err(self.violation("pop", String::new(), id.to_string()));
        };

        let elapsed_ms = u64::try_from(span.started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(path = %span.path, elapsed_ms, ?outcome, "span popped");
        if self.tracer.pass() == Pass::Execution {
            self.tracer.emit(Message::new(Event::Op(Op {
                name: span.id.clone(),
                ancestors: span.ancestors.to_vec(),
                outcome,
                elapsed_ms,
            })));
            let terminal = match outcome {
                Outcome::Success => TaskState::Completed,
                Outcome::Error => TaskState::Error,
            };
            span.task.advance(terminal)?;
            self.tracer.emit(Message::task(span.task));
        }
        Ok(())
    }

    /// Push `id` under the current span and return a guard that pops it
    /// when dropped, on every exit path. Unwinding through the guard or
    /// calling [`SpanGuard::fail`] records the span as failed.
    ///
    /// # Errors
    ///
    /// Returns error if `id` is invalid
    pub fn enter(&mut self, id: &str) -> TraceResult<SpanGuard<'_>> {
        let parent = self.current().map(ToString::to_string).unwrap_or_default();
        self.push(&parent, id)?;
        Ok(SpanGuard {
            ctx: self,
            parent,
            id: id.to_string(),
            failed: false,
        })
    }

    /// Run `f` inside span `id`. An `Err` from `f` marks the span failed.
    ///
    /// # Errors
    ///
    /// Returns the span error converted into `E`, or the error of `f`
    pub fn span<T, E, F>(&mut self, id: &str, f: F) -> Result<T, E>
    where
        E: From<TraceError>,
        F: FnOnce(&mut ExecutionContext) -> Result<T, E>,
    {
        let mut guard = self.enter(id)?;
        let result = f(&mut *guard);
        if result.is_err() {
            guard.fail();
        }
        result
    }

    fn violation(&self, op: &'static str, expected: String, found: String) -> TraceError {
        error!(op, expected = %expected, found = %found, depth = self.stack.len(), "stack discipline violation");
        TraceError::StackDiscipline { expected, found }
    }
}

/// Pops its span on drop
#[derive(Debug)]
pub struct SpanGuard<'a> {
    ctx: &'a mut ExecutionContext,
    parent: String,
    id: String,
    failed: bool,
}

impl SpanGuard<'_> {
    /// Record the span as failed when it is popped
    pub fn fail(&mut self) {
        self.failed = true;
    }

    /// Span id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Deref for SpanGuard<'_> {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        self.ctx
    }
}

impl DerefMut for SpanGuard<'_> {
    fn deref_mut(&mut self) -> &mut ExecutionContext {
        self.ctx
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        let outcome = if self.failed || std::thread::panicking() {
            Outcome::Error
        } else {
            Outcome::Success
        };
        // A violation here was already logged by `pop`.
        let _ = self.ctx.pop(&self.parent, &self.id, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_log::{MemorySink, TaskBoard};
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn execution() -> (ExecutionContext, MemorySink) {
        let sink = MemorySink::new();
        let tracer = Tracer::execution(Arc::new(sink.clone()));
        (tracer.context(), sink)
    }

    fn ops(sink: &MemorySink) -> Vec<Op> {
        sink.messages()
            .into_iter()
            .filter_map(|m| match m.into_event() {
                Event::Op(op) => Some(op),
                _ => None,
            })
            .collect()
    }

    fn tasks(sink: &MemorySink) -> Vec<Task> {
        sink.messages()
            .into_iter()
            .filter_map(|m| match m.into_event() {
                Event::Task(task) => Some(task),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_push_pop_emits_in_pop_order() {
        let (mut ctx, sink) = execution();
        ctx.push("", "ci").unwrap();
        ctx.push("ci", "build").unwrap();
        assert_eq!(ctx.depth(), 2);
        assert_eq!(ctx.top().unwrap().path(), "ci/build");
        ctx.pop("ci", "build", Outcome::Success).unwrap();
        ctx.pop("", "ci", Outcome::Success).unwrap();
        assert!(ctx.is_idle());

        let ops = ops(&sink);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].path(), "ci/build");
        assert_eq!(ops[1].path(), "ci");
        assert!(ops[1].ancestors.is_empty());

        let mut board = TaskBoard::new();
        for task in tasks(&sink) {
            board.apply(&task).unwrap();
        }
        assert!(board.is_settled());
        assert_eq!(board.state("ci/build"), Some(TaskState::Completed));
    }

    #[test]
    fn test_non_top_pop_reported_every_time() {
        let (mut ctx, sink) = execution();
        ctx.push("", "a").unwrap();
        ctx.push("a", "b").unwrap();

        for _ in 0..3 {
            let err = ctx.pop("", "a", Outcome::Success).unwrap_err();
            assert_eq!(
                err,
                TraceError::StackDiscipline {
                    expected: "b".into(),
                    found: "a".into()
                }
            );
            assert_eq!(ctx.depth(), 2);
        }
        assert!(ops(&sink).is_empty());

        ctx.pop("a", "b", Outcome::Success).unwrap();
        ctx.pop("", "a", Outcome::Success).unwrap();
        assert_eq!(ops(&sink).len(), 2);
    }

    #[test]
    fn test_pop_on_idle_and_wrong_parent() {
        let (mut ctx, _) = execution();
        assert!(matches!(
            ctx.pop("", "a", Outcome::Success),
            Err(TraceError::StackDiscipline { .. })
        ));
        ctx.push("", "a").unwrap();
        ctx.push("a", "b").unwrap();
        assert!(ctx.pop("x", "b", Outcome::Success).is_err());
        assert!(ctx.push("x", "c").is_err());
        assert!(ctx.push("", "c").is_err());
        assert!(ctx.push("a", "c").is_err());
        assert_eq!(ctx.depth(), 2);
    }

    #[test]
    fn test_invalid_id_rejected() {
        let (mut ctx, _) = execution();
        assert!(matches!(ctx.push("", ""), Err(TraceError::InvalidId(_))));
        assert!(matches!(ctx.push("", "a/b"), Err(TraceError::InvalidId(_))));
        assert!(ctx.is_idle());
    }

    #[test]
    fn test_sibling_spans_do_not_share_ancestry() {
        let (mut ctx, sink) = execution();
        {
            let mut root = ctx.enter("root").unwrap();
            root.span("left", |ctx| ctx.span("leaf", |_| Ok::<_, TraceError>(())))
                .unwrap();
            root.span("right", |_| Ok::<_, TraceError>(())).unwrap();
        }
        let paths: Vec<(String, usize)> = ops(&sink)
            .iter()
            .map(|op| (op.path(), op.ancestors.len()))
            .collect();
        assert_eq!(
            paths,
            vec![
                ("root/left/leaf".to_string(), 2),
                ("root/left".to_string(), 1),
                ("root/right".to_string(), 1),
                ("root".to_string(), 0),
            ]
        );
    }

    #[derive(Debug)]
    struct StepFailed;

    impl From<TraceError> for StepFailed {
        fn from(_: TraceError) -> Self {
            StepFailed
        }
    }

    fn failing_step(ctx: &mut ExecutionContext) -> Result<(), StepFailed> {
        ctx.span("compile", |_| Err::<(), _>(StepFailed))?;
        ctx.span("unreachable", |_| Ok(()))
    }

    #[test]
    fn test_early_return_records_error() {
        let (mut ctx, sink) = execution();
        assert!(ctx.span("build", failing_step).is_err());
        assert!(ctx.is_idle());

        let ops = ops(&sink);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].path(), "build/compile");
        assert_eq!(ops[0].outcome, Outcome::Error);
        assert_eq!(ops[1].outcome, Outcome::Error);
        let last = tasks(&sink).pop().unwrap();
        assert_eq!(last.id, "build");
        assert_eq!(last.state(), TaskState::Error);
    }

    #[test]
    fn test_unwind_pops_span() {
        let (mut ctx, sink) = execution();
        let result: std::thread::Result<()> =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let _guard = ctx.enter("explode").unwrap();
                panic!("boom")
            }));
        assert!(result.is_err());
        assert!(ctx.is_idle());
        let ops = ops(&sink);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].outcome, Outcome::Error);
    }

    #[test]
    fn test_guard_fail() {
        let (mut ctx, sink) = execution();
        {
            let mut guard = ctx.enter("lint").unwrap();
            guard.fail();
        }
        assert_eq!(ops(&sink)[0].outcome, Outcome::Error);
    }

    #[test]
    fn test_fork_is_independent() {
        let (mut ctx, sink) = execution();
        ctx.push("", "ci").unwrap();
        let mut children: Vec<ExecutionContext> = (0..4).map(|_| ctx.fork()).collect();
        assert_eq!(children[0].path().len(), 1);

        std::thread::scope(|scope| {
            for (i, child) in children.iter_mut().enumerate() {
                scope.spawn(move || {
                    let id = format!("shard{i}");
                    child
                        .span(&id, |c| c.span("test", |_| Ok::<_, TraceError>(())))
                        .unwrap();
                    assert!(child.is_idle());
                });
            }
        });
        assert_eq!(ctx.depth(), 1);
        ctx.pop("", "ci", Outcome::Success).unwrap();

        let ops = ops(&sink);
        assert_eq!(ops.len(), 9);
        for op in &ops[..8] {
            assert_eq!(op.ancestors[0].as_str(), "ci");
        }
        assert_eq!(ctx.tracer().graph().children("ci").count(), 4);
    }

    #[test]
    fn test_discovery_emits_pending_once() {
        let sink = MemorySink::new();
        let tracer = Tracer::discovery(Arc::new(sink.clone()));
        let mut ctx = tracer.context();
        for _ in 0..3 {
            ctx.span("poll", |_| Ok::<_, TraceError>(())).unwrap();
        }
        let tasks = tasks(&sink);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].state(), TaskState::Pending);
        assert!(ops(&sink).is_empty());
        assert_eq!(tracer.graph().len(), 1);
    }

    proptest! {
        #[test]
        fn prop_ancestor_len_equals_depth_at_push(steps in proptest::collection::vec(any::<bool>(), 0..64)) {
            let (mut ctx, sink) = execution();
            let mut depth_at_push = HashMap::new();
            let mut next = 0usize;
            for push in steps {
                if push || ctx.is_idle() {
                    let id = format!("n{next}");
                    next += 1;
                    let parent = ctx.current().map(ToString::to_string).unwrap_or_default();
                    depth_at_push.insert(id.clone(), ctx.depth());
                    ctx.push(&parent, &id).unwrap();
                } else {
                    let top = ctx.top().unwrap();
                    let (id, parent) = (top.id().to_string(), top.parent().map(ToString::to_string).unwrap_or_default());
                    ctx.pop(&parent, &id, Outcome::Success).unwrap();
                }
            }
            while let Some(top) = ctx.top() {
                let (id, parent) = (top.id().to_string(), top.parent().map(ToString::to_string).unwrap_or_default());
                ctx.pop(&parent, &id, Outcome::Success).unwrap();
            }

            let ops = ops(&sink);
            prop_assert_eq!(ops.len(), next);
            for op in ops {
                prop_assert_eq!(op.ancestors.len(), depth_at_push[op.name.as_str()]);
            }
        }
    }
}
