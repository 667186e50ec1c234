//! Storyship Core Library
//!
//! Domain types, collaborator seams and change-impact tracing for the
//! catalog publishing pipeline.
//!
//! ## Key Components
//!
//! - `PipelineContext`: state threaded through the pipeline stages
//! - `GitFacts` / `GitCli`: repository facts and operations
//! - `RemoteClient`: named GraphQL operations against the service
//! - `ChangeImpactTracer`: maps a diff onto affected story files

pub mod domain;
pub mod fakes;
pub mod git;
pub mod glob;
pub mod metrics;
pub mod obs;
pub mod remote;
pub mod telemetry;
pub mod turbosnap;

pub use domain::{
    Account, Build, BuildApp, BuildFeatures, BuildTest, ErrorKind, ExitOnceUploaded, FileLength,
    FileManifest, GitInfo, LimitReason, Options, PipelineContext, PipelineError, Result,
    UploadPointer, WorkspaceCheckout, WorkspaceError, GENERIC_FAILURE_EXIT_CODE,
    REQUIRED_ENTRY_FILES,
};

pub use git::{
    is_package_manifest, ChangeSet, CommitRange, GitCli, GitFacts, PackageManifestChange,
};
pub use glob::GlobSet;
pub use remote::{query_field, RemoteClient};
pub use turbosnap::{
    BailReason, ChangeImpactTracer, DependencyGraph, DependencyQuery, DependencyResolution,
    DependencyResolver, LockfileResolver, TurboSnapResult,
};

pub use metrics::METRICS;
pub use obs::{
    emit_build_created, emit_restore_failed, emit_task_transition, emit_trace_result,
    emit_upload_progress, PipelineSpan,
};
pub use telemetry::init_tracing;

/// Storyship version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
