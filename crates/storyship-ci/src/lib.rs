//! Storyship CI - the publishing pipeline
//!
//! Provides the pipeline orchestrator that:
//! - Guards and prepares the workspace for patch builds
//! - Builds, verifies and uploads the catalog
//! - Registers the build and decides the exit code

pub mod command;
pub mod pipeline;
pub mod registrar;
pub mod runner;
pub mod task;
pub mod workspace;

// Re-export key types
pub use command::{CommandExecutor, CommandResult, CommandSpec, ProcessExecutor};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineOutcome};
pub use registrar::{BuildRegistrar, CREATE_BUILD, CREATE_BUILD_DOCUMENT};
pub use runner::{TaskObserver, TaskOutcome, TaskRunner, TracingObserver};
pub use task::{SkipPredicate, Step, Task, TaskState};
pub use workspace::WorkspacePreparer;
