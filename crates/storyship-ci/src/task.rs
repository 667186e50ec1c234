//! Task and step definitions.
//!
//! A task is an ordered list of steps over a shared context, plus an
//! optional skip predicate evaluated before the first step.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storyship_core::Result;

/// State of a task as reported to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    /// A step is running; `phase` names it.
    Running { phase: String },
    /// Every step finished. `is_final` marks the task itself as done.
    Success { is_final: bool },
    Skipped { reason: String },
    Failed { error: String },
}

impl TaskState {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running { .. } => "running",
            TaskState::Success { .. } => "success",
            TaskState::Skipped { .. } => "skipped",
            TaskState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Success { .. } | TaskState::Skipped { .. } | TaskState::Failed { .. }
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Running { phase } => write!(f, "running ({phase})"),
            TaskState::Skipped { reason } => write!(f, "skipped: {reason}"),
            TaskState::Failed { error } => write!(f, "failed: {error}"),
            other => f.write_str(other.label()),
        }
    }
}

/// One unit of work inside a task.
#[async_trait]
pub trait Step<C: Send>: Send + Sync {
    /// Phase label reported while the step runs.
    fn phase(&self) -> &str;

    async fn run(&self, ctx: &mut C) -> Result<()>;
}

/// Returns a reason when the task should not run.
pub type SkipPredicate<C> = Box<dyn Fn(&C) -> Option<String> + Send + Sync>;

/// A named sequence of steps.
pub struct Task<C: Send> {
    /// Stable identifier (e.g. `traceChangedFiles`).
    pub name: String,
    /// Human-readable title.
    pub title: String,
    pub(crate) skip: Option<SkipPredicate<C>>,
    pub(crate) steps: Vec<Box<dyn Step<C>>>,
    pub(crate) final_on_success: bool,
}

impl<C: Send> Task<C> {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            skip: None,
            steps: Vec::new(),
            final_on_success: false,
        }
    }

    /// Skip the whole task when `predicate` returns a reason.
    pub fn skip_when(
        mut self,
        predicate: impl Fn(&C) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.skip = Some(Box::new(predicate));
        self
    }

    pub fn step(mut self, step: impl Step<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Report `Success { is_final: true }` when the last step finishes.
    pub fn final_on_success(mut self) -> Self {
        self.final_on_success = true;
        self
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn skip_reason(&self, ctx: &C) -> Option<String> {
        self.skip.as_ref().and_then(|predicate| predicate(ctx))
    }
}

impl<C: Send> fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("title", &self.title)
            .field("steps", &self.steps.iter().map(|s| s.phase()).collect::<Vec<_>>())
            .field("final_on_success", &self.final_on_success)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Step<u32> for Noop {
        fn phase(&self) -> &str {
            "noop"
        }

        async fn run(&self, ctx: &mut u32) -> Result<()> {
            *ctx += 1;
            Ok(())
        }
    }

    #[test]
    fn test_task_builder() {
        let task = Task::new("count", "Counting")
            .skip_when(|n: &u32| (*n > 5).then(|| "too many".to_string()))
            .step(Noop)
            .step(Noop)
            .final_on_success();

        assert_eq!(task.step_count(), 2);
        assert!(task.final_on_success);
        assert_eq!(task.skip_reason(&1), None);
        assert_eq!(task.skip_reason(&6).as_deref(), Some("too many"));
    }

    #[test]
    fn test_task_state_display() {
        assert_eq!(
            TaskState::Running {
                phase: "uploading".to_string()
            }
            .to_string(),
            "running (uploading)"
        );
        assert_eq!(TaskState::Pending.to_string(), "pending");
        assert!(TaskState::Success { is_final: false }.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
    }
}
