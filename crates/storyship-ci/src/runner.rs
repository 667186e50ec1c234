//! Task execution and state reporting.

use std::sync::Arc;
use std::time::Instant;

use storyship_core::{emit_task_transition, Result};
use tracing::debug;

use crate::task::{Task, TaskState};

/// Receives every task state transition.
pub trait TaskObserver: Send + Sync {
    fn on_transition(&self, task: &str, state: &TaskState);
}

/// Observer that logs transitions as structured tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl TaskObserver for TracingObserver {
    fn on_transition(&self, task: &str, state: &TaskState) {
        let detail = match state {
            TaskState::Running { phase } => Some(phase.as_str()),
            TaskState::Skipped { reason } => Some(reason.as_str()),
            TaskState::Failed { error } => Some(error.as_str()),
            TaskState::Pending | TaskState::Success { .. } => None,
        };
        emit_task_transition(task, state.label(), detail);
    }
}

/// How a task ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Skipped(String),
}

/// Runs tasks against a context, reporting to an observer.
///
/// No retries happen here; a failing step stops its task and the error is
/// returned after the observer saw `Failed`.
#[derive(Clone)]
pub struct TaskRunner {
    observer: Arc<dyn TaskObserver>,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new(Arc::new(TracingObserver))
    }
}

impl TaskRunner {
    pub fn new(observer: Arc<dyn TaskObserver>) -> Self {
        Self { observer }
    }

    pub async fn run<C: Send>(&self, task: &Task<C>, ctx: &mut C) -> Result<TaskOutcome> {
        let start = Instant::now();

        if let Some(reason) = task.skip_reason(ctx) {
            self.observer
                .on_transition(&task.name, &TaskState::Skipped { reason: reason.clone() });
            return Ok(TaskOutcome::Skipped(reason));
        }

        self.observer.on_transition(&task.name, &TaskState::Pending);

        for step in &task.steps {
            self.observer.on_transition(
                &task.name,
                &TaskState::Running {
                    phase: step.phase().to_string(),
                },
            );
            if let Err(e) = step.run(ctx).await {
                self.observer.on_transition(
                    &task.name,
                    &TaskState::Failed {
                        error: e.to_string(),
                    },
                );
                return Err(e);
            }
        }

        self.observer.on_transition(
            &task.name,
            &TaskState::Success {
                is_final: task.final_on_success,
            },
        );
        debug!(
            task = %task.name,
            duration_ms = start.elapsed().as_millis() as u64,
            "task finished"
        );
        Ok(TaskOutcome::Completed)
    }
}
