//! Error taxonomy for the publishing pipeline.
//!
//! Every failure is classified as a user error (bad workspace, bad build
//! output), a transient error that already exhausted its retry budget, or an
//! internal error. The classification drives the process exit code.

use std::path::PathBuf;

/// Exit code used when no more specific code applies.
pub const GENERIC_FAILURE_EXIT_CODE: i32 = 255;

/// Classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caused by the caller's repository or configuration. Never retried.
    User,
    /// Network or transfer failure that survived every retry.
    Transient,
    /// Anything unexpected.
    Internal,
}

/// Workspace gate failures raised while preparing a patch build.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkspaceError {
    #[error("working directory is not clean; commit or stash your changes first")]
    DirtyWorkingTree,

    #[error("workspace is not up to date with the remote: {hint}")]
    OutOfDate { hint: String },

    #[error("no common ancestor between {head} and {base}")]
    NoMergeBase { head: String, base: String },

    #[error("failed to install dependencies: {reason}")]
    InstallFailed { reason: String },
}

impl WorkspaceError {
    /// Exit code scoped to the workspace preparation task.
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkspaceError::DirtyWorkingTree => 101,
            WorkspaceError::OutOfDate { .. } => 102,
            WorkspaceError::NoMergeBase { .. } => 103,
            WorkspaceError::InstallFailed { .. } => 104,
        }
    }
}

/// Pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("Invalid Storybook build at {}", dir.display())]
    InvalidBuild { dir: PathBuf },

    #[error("invalid patch refs: {0}")]
    InvalidRefs(String),

    #[error("invalid glob {glob:?}: {reason}")]
    InvalidGlob { glob: String, reason: String },

    #[error("upload of {path} failed after {attempts} attempts: {reason}")]
    TransferFailed {
        path: String,
        attempts: u32,
        reason: String,
    },

    #[error("remote request {operation} failed: {reason}")]
    Remote { operation: String, reason: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("{stage} must run before {field} is read")]
    MissingStageOutput {
        stage: &'static str,
        field: &'static str,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Build a remote error for the given operation.
    pub fn remote(operation: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        PipelineError::Remote {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Workspace(_)
            | PipelineError::InvalidBuild { .. }
            | PipelineError::InvalidRefs(_)
            | PipelineError::InvalidGlob { .. } => ErrorKind::User,
            PipelineError::TransferFailed { .. } | PipelineError::Remote { .. } => {
                ErrorKind::Transient
            }
            _ => ErrorKind::Internal,
        }
    }

    /// Whether the failure was caused by the caller rather than a bug.
    pub fn is_user_error(&self) -> bool {
        self.kind() == ErrorKind::User
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Workspace(e) => e.exit_code(),
            _ => GENERIC_FAILURE_EXIT_CODE,
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
