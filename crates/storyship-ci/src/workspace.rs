//! Workspace safety for patch builds.
//!
//! Before building a patch, the caller's repository must be clean and up to
//! date, and the patch refs must share an ancestor. Only then is the merge
//! base checked out and dependencies installed. Any checkout is undone by
//! [`WorkspacePreparer::restore`].

use std::sync::Arc;

use storyship_core::{
    emit_restore_failed, GitFacts, PipelineContext, PipelineError, Result, WorkspaceCheckout,
    WorkspaceError,
};
use tracing::{info, warn};

use crate::command::{CommandExecutor, CommandSpec};

/// Guards and prepares the workspace for a patch build.
pub struct WorkspacePreparer {
    git: Arc<dyn GitFacts>,
    executor: Arc<dyn CommandExecutor>,
}

impl WorkspacePreparer {
    pub fn new(git: Arc<dyn GitFacts>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { git, executor }
    }

    /// Check the gates, check out the merge base and install dependencies.
    ///
    /// Gate failures set `ctx.exit_code` (101 dirty, 102 stale, 103 no merge
    /// base, 104 install failed). Writes `ctx.workspace` and
    /// `ctx.git.merge_base` once the checkout happened.
    pub async fn prepare(&self, ctx: &mut PipelineContext) -> Result<()> {
        let (head, base) = match ctx.options().patch_refs() {
            Some((head, base)) => (head.to_string(), base.to_string()),
            None => {
                return Err(PipelineError::InvalidRefs(
                    "both patch head and patch base refs are required".to_string(),
                ))
            }
        };
        if head == base {
            return Err(PipelineError::InvalidRefs(format!(
                "patch head and base are both {head}"
            )));
        }

        if !self.git.is_clean().await? {
            return Err(fail(ctx, WorkspaceError::DirtyWorkingTree));
        }

        if !self.git.is_up_to_date(&base).await? {
            let hint = self.git.update_message().await?;
            return Err(fail(ctx, WorkspaceError::OutOfDate { hint }));
        }

        let Some(merge_base) = self.git.find_merge_base(&head, &base).await? else {
            return Err(fail(ctx, WorkspaceError::NoMergeBase { head, base }));
        };

        let original_ref = self.git.current_ref().await?;
        info!(
            head = %head,
            base = %base,
            merge_base = %merge_base,
            original_ref = %original_ref,
            "checking out merge base"
        );
        self.git.checkout(&merge_base).await?;
        ctx.workspace = Some(WorkspaceCheckout {
            original_ref,
            merge_base: merge_base.clone(),
        });
        ctx.git.merge_base = Some(merge_base);

        if let Err(reason) = self.install(ctx).await {
            let error = fail(ctx, WorkspaceError::InstallFailed { reason });
            if let Err(restore_error) = self.restore(ctx).await {
                emit_restore_failed(&restore_error);
            }
            return Err(error);
        }

        Ok(())
    }

    async fn install(&self, ctx: &PipelineContext) -> std::result::Result<(), String> {
        let Some(command) = ctx.options().install_command.clone() else {
            info!("no install command configured, skipping dependency installation");
            return Ok(());
        };
        let spec = CommandSpec::new("install", command, ctx.options().command_timeout_secs);
        let result = self
            .executor
            .execute(&spec)
            .await
            .map_err(|e| e.to_string())?;
        if result.passed() {
            Ok(())
        } else {
            Err(result.summary())
        }
    }

    /// Undo the checkout recorded in `ctx.workspace`, at most once.
    ///
    /// Local changes made by the install are discarded before switching back
    /// to the original ref. Does nothing when no checkout happened.
    pub async fn restore(&self, ctx: &mut PipelineContext) -> Result<()> {
        let Some(checkout) = ctx.workspace.take() else {
            return Ok(());
        };
        info!(original_ref = %checkout.original_ref, "restoring workspace");

        let discarded = self.git.discard_changes().await;
        if let Err(e) = &discarded {
            warn!(error = %e, "failed to discard changes before restoring");
        }
        self.git.checkout(&checkout.original_ref).await?;
        discarded
    }
}

fn fail(ctx: &mut PipelineContext, error: WorkspaceError) -> PipelineError {
    ctx.exit_code = error.exit_code();
    PipelineError::Workspace(error)
}
