//! Structured observability hooks for pipeline lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via the `PipelineSpan` RAII guard
//! - Emission functions for task transitions, tracing results, upload
//!   progress and build registration
//!
//! For JSON output, initialise tracing with `json = true`.

use tracing::{info, warn};

use crate::turbosnap::TurboSnapResult;

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// # Example
///
/// ```ignore
/// let _span = PipelineSpan::enter("6f1c...");
/// // every log line now carries run_id = "6f1c..."
/// ```
pub struct PipelineSpan {
    _span: tracing::span::EnteredSpan,
}

impl PipelineSpan {
    /// Create and enter a span tagged with the run id.
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("storyship.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a task changed state.
pub fn emit_task_transition(task: &str, state: &str, detail: Option<&str>) {
    info!(
        event = "task.transition",
        task = %task,
        state = %state,
        detail = detail.unwrap_or_default(),
    );
}

/// Emit event: tracing finished with either affected stories or a bail reason.
pub fn emit_trace_result(result: &TurboSnapResult) {
    match result {
        TurboSnapResult::Traced {
            affected_story_files,
        } => info!(
            event = "turbosnap.traced",
            affected = affected_story_files.len(),
        ),
        TurboSnapResult::Bailed { bail_reason } => info!(
            event = "turbosnap.bailed",
            reason = %bail_reason,
        ),
    }
}

/// Emit event: cumulative upload progress.
pub fn emit_upload_progress(uploaded: u64, total: u64) {
    let percent = if total == 0 {
        100
    } else {
        uploaded.saturating_mul(100) / total
    };
    info!(
        event = "upload.progress",
        uploaded = uploaded,
        total = total,
        percent = percent,
    );
}

/// Emit event: the service registered a build.
pub fn emit_build_created(build_id: &str, number: u64, spec_count: u64) {
    info!(
        event = "build.created",
        build_id = %build_id,
        number = number,
        spec_count = spec_count,
    );
}

/// Emit event: restoring the workspace failed (warning level).
pub fn emit_restore_failed(error: &dyn std::fmt::Display) {
    warn!(event = "workspace.restore_failed", error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_span_create() {
        let _span = PipelineSpan::enter("test-run-id");
    }

    #[test]
    fn test_progress_with_empty_total() {
        emit_upload_progress(0, 0);
    }
}
