//! Shared pipeline context threaded through every stage.
//!
//! Each field is produced by exactly one stage. Readers go through the
//! `require_*` accessors, which fail with [`PipelineError::MissingStageOutput`]
//! when a stage runs out of order.

use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::build::Build;
use crate::domain::error::{PipelineError, Result};
use crate::domain::manifest::FileManifest;
use crate::domain::options::Options;
use crate::git::ChangeSet;
use crate::turbosnap::TurboSnapResult;

/// Git facts gathered for this run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GitInfo {
    pub branch: String,
    pub commit: String,
    /// Merge base computed by the workspace preparer or the tracer.
    pub merge_base: Option<String>,
    /// Diff between the merge base and head, once traced.
    pub change_set: Option<ChangeSet>,
}

/// Record of a checkout performed on the caller's repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceCheckout {
    /// Ref to return to when restoring.
    pub original_ref: String,
    pub merge_base: String,
}

/// Where the uploaded build is served from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadPointer {
    pub domain: String,
    pub isolator_url: String,
}

/// Mutable state of one pipeline invocation.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineContext {
    pub run_id: Uuid,
    options: Options,
    pub git: GitInfo,
    /// Build directory, possibly retargeted by the build-log hint.
    pub source_dir: PathBuf,
    pub workspace: Option<WorkspaceCheckout>,
    pub file_info: Option<FileManifest>,
    pub turbo_snap: Option<TurboSnapResult>,
    pub upload: Option<UploadPointer>,
    pub build: Option<Build>,
    pub exit_code: i32,
    pub uploaded_bytes: u64,
    pub skip_snapshots: bool,
}

impl PipelineContext {
    pub fn new(options: Options) -> Self {
        let git = GitInfo {
            branch: options.branch.clone(),
            commit: options.commit.clone(),
            ..GitInfo::default()
        };
        Self {
            run_id: Uuid::new_v4(),
            source_dir: options.build_dir.clone(),
            options,
            git,
            workspace: None,
            file_info: None,
            turbo_snap: None,
            upload: None,
            build: None,
            exit_code: 0,
            uploaded_bytes: 0,
            skip_snapshots: false,
        }
    }

    /// Immutable options supplied by the front end.
    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn require_file_info(&self) -> Result<&FileManifest> {
        self.file_info
            .as_ref()
            .ok_or(PipelineError::MissingStageOutput {
                stage: "verifyBuildOutput",
                field: "fileInfo",
            })
    }

    pub fn require_upload(&self) -> Result<&UploadPointer> {
        self.upload.as_ref().ok_or(PipelineError::MissingStageOutput {
            stage: "upload",
            field: "upload",
        })
    }

    pub fn require_build(&self) -> Result<&Build> {
        self.build.as_ref().ok_or(PipelineError::MissingStageOutput {
            stage: "createBuild",
            field: "build",
        })
    }
}
