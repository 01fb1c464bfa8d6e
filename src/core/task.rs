//! Task data model for the orchestrator.
//!
//! A task is a named unit of work with prerequisites and an action. The
//! action is either an async body or a [`Sequence`] of other tasks that the
//! orchestrator interprets.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::core::sequence::Sequence;
use crate::Result;

/// Boxed future returned by a task body.
pub type TaskFuture = BoxFuture<'static, Result<()>>;

/// A task body. Bodies capture their configuration and collaborators when
/// they are constructed and are invoked with no arguments.
pub type TaskBody = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// What happens when a task body reports an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// The error fails the task and aborts any sequence running it.
    #[default]
    Abort,
    /// The error is logged and the task is treated as finished.
    Continue,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Abort => write!(f, "abort"),
            FailurePolicy::Continue => write!(f, "continue"),
        }
    }
}

/// Task status in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    /// Body finished successfully.
    Completed,
    /// Body failed under the `continue` policy; the run went on.
    Tolerated {
        /// Error message that was logged.
        error: String,
    },
    /// Body failed and the failure propagated.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// Never started because a prerequisite failed.
    Skipped {
        /// The prerequisite that failed.
        blocked_by: String,
    },
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Tolerated { .. })
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Tolerated { error } => write!(f, "tolerated: {}", error),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Skipped { blocked_by } => write!(f, "skipped: '{}' failed", blocked_by),
        }
    }
}

/// The work a task performs once its prerequisites are done.
#[derive(Clone)]
pub enum TaskAction {
    /// Only prerequisites; nothing else to do.
    Noop,
    /// An async body.
    Body(TaskBody),
    /// Run other tasks in order.
    Sequence(Sequence),
}

impl std::fmt::Debug for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskAction::Noop => write!(f, "Noop"),
            TaskAction::Body(_) => write!(f, "Body(..)"),
            TaskAction::Sequence(seq) => write!(f, "Sequence({})", seq),
        }
    }
}

/// A named task in the task graph.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique name the task is invoked by.
    pub name: String,
    /// One-line description shown by `--list`.
    pub description: String,
    /// Tasks that must complete successfully first, in order.
    pub prerequisites: Vec<String>,
    /// The work itself.
    pub action: TaskAction,
    /// What an error from the action does to the run.
    pub policy: FailurePolicy,
    /// Logged once the task finishes successfully.
    pub completion_message: Option<String>,
}

impl Task {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            prerequisites: Vec::new(),
            action: TaskAction::Noop,
            policy: FailurePolicy::Abort,
            completion_message: None,
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn depends_on<I, S>(mut self, prerequisites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prerequisites
            .extend(prerequisites.into_iter().map(Into::into));
        self
    }

    /// Set an async body for the task.
    pub fn body<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.action = TaskAction::Body(Arc::new(move || f().boxed()));
        self
    }

    pub fn sequence(mut self, sequence: Sequence) -> Self {
        self.action = TaskAction::Sequence(sequence);
        self
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn on_complete(mut self, message: &str) -> Self {
        self.completion_message = Some(message.to_string());
        self
    }

    /// Every task name this task refers to, prerequisites first.
    pub fn referenced_tasks(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.prerequisites.iter().map(String::as_str).collect();
        if let TaskAction::Sequence(seq) = &self.action {
            names.extend(seq.task_names());
        }
        names
    }
}
