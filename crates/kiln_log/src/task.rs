//! Task lifecycle.
//!
//! `Pending -> Initiated -> {Completed | Error}`. Terminal states are final
//! and no other transition is accepted.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Task state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Discovered, not started
    Pending,
    /// Running
    Initiated,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Error,
}

impl TaskState {
    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Whether `self -> next` is a valid transition
    #[must_use]
    pub const fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Initiated)
                | (Self::Initiated, Self::Completed)
                | (Self::Initiated, Self::Error)
        )
    }

    /// Validate `self -> next`
    ///
    /// # Errors
    ///
    /// Returns error if the transition is not allowed
    pub fn transition(self, next: TaskState) -> Result<TaskState, EventError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(EventError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Initiated => "initiated",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Event model errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// Transition outside the lifecycle
    #[error("Invalid task transition {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: TaskState,
        /// Rejected state
        to: TaskState,
    },
}

/// Task snapshot. The id is the slash-joined operation path, so it joins
/// the tracer's span ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Operation path
    pub id: String,
    /// Human readable description
    pub description: String,
    state: TaskState,
}

impl Task {
    /// New pending task
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            state: TaskState::Pending,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.state
    }

    /// Move to `next`
    ///
    /// # Errors
    ///
    /// Returns error and leaves the task unchanged if the transition is not
    /// allowed
    pub fn advance(&mut self, next: TaskState) -> Result<(), EventError> {
        self.state = self.state.transition(next)?;
        Ok(())
    }
}

/// Latest known state per task, in first-seen order.
///
/// Consumers fold task snapshots into this to render progress. A task may
/// first appear in any state (a run without a discovery pass never emits
/// `Pending`); every later snapshot must be a valid transition.
#[derive(Debug, Clone, Default)]
pub struct TaskBoard {
    tasks: IndexMap<String, TaskState>,
}

impl TaskBoard {
    /// Empty board
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a snapshot
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot moves a known task backwards
    pub fn apply(&mut self, task: &Task) -> Result<(), EventError> {
        match self.tasks.get_mut(&task.id) {
            Some(state) => {
                *state = state.transition(task.state())?;
            }
            None => {
                self.tasks.insert(task.id.clone(), task.state());
            }
        }
        Ok(())
    }

    /// State of `id`
    #[must_use]
    pub fn state(&self, id: &str) -> Option<TaskState> {
        self.tasks.get(id).copied()
    }

    /// Tasks in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = (&str, TaskState)> {
        self.tasks.iter().map(|(id, state)| (id.as_str(), *state))
    }

    /// Number of tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task was seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Whether every task reached a terminal state
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.tasks.values().all(|s| s.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [TaskState; 4] = [
        TaskState::Pending,
        TaskState::Initiated,
        TaskState::Completed,
        TaskState::Error,
    ];

    #[test]
    fn test_forward_lifecycle() {
        let mut task = Task::new("ci/test", "Run tests");
        task.advance(TaskState::Initiated).unwrap();
        task.advance(TaskState::Completed).unwrap();
        assert!(task.state().is_terminal());
    }

    #[test]
    fn test_completed_to_initiated_rejected() {
        let mut task = Task::new("ci/test", "Run tests");
        task.advance(TaskState::Initiated).unwrap();
        task.advance(TaskState::Completed).unwrap();
        let err = task.advance(TaskState::Initiated).unwrap_err();
        assert_eq!(
            err,
            EventError::InvalidTransition {
                from: TaskState::Completed,
                to: TaskState::Initiated
            }
        );
        assert_eq!(task.state(), TaskState::Completed);
    }

    #[test]
    fn test_skipping_initiated_rejected() {
        let mut task = Task::new("t", "");
        assert!(task.advance(TaskState::Completed).is_err());
        assert!(task.advance(TaskState::Error).is_err());
        assert_eq!(task.state(), TaskState::Pending);
    }

    #[test]
    fn test_board_tracks_snapshots() {
        let mut board = TaskBoard::new();
        let mut build = Task::new("ci/build", "");
        board.apply(&build).unwrap();
        build.advance(TaskState::Initiated).unwrap();
        board.apply(&build).unwrap();

        let mut lint = Task::new("ci/lint", "");
        lint.advance(TaskState::Initiated).unwrap();
        board.apply(&lint).unwrap();
        assert!(!board.is_settled());

        build.advance(TaskState::Completed).unwrap();
        board.apply(&build).unwrap();
        lint.advance(TaskState::Error).unwrap();
        board.apply(&lint).unwrap();

        assert!(board.is_settled());
        let order: Vec<_> = board.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["ci/build", "ci/lint"]);

        // Replaying an older snapshot moves backwards.
        assert!(board.apply(&Task::new("ci/build", "")).is_err());
        assert_eq!(board.state("ci/build"), Some(TaskState::Completed));
    }

    proptest! {
        #[test]
        fn prop_terminal_states_are_final(from in 2usize..4, to in 0usize..4) {
            prop_assert!(ALL[from].transition(ALL[to]).is_err());
        }

        #[test]
        fn prop_only_forward_steps(from in 0usize..4, to in 0usize..4) {
            let ok = ALL[from].transition(ALL[to]).is_ok();
            let expected = matches!((from, to), (0, 1) | (1, 2) | (1, 3));
            prop_assert_eq!(ok, expected);
        }
    }
}
