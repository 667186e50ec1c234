//! Domain models for Storyship.
//!
//! - `Options`: externally supplied configuration
//! - `PipelineContext`: state threaded through the pipeline stages
//! - `FileManifest`: files of a static catalog build
//! - `Build`: the registered build record

pub mod build;
pub mod context;
pub mod error;
pub mod manifest;
pub mod options;

pub use build::{Account, Build, BuildApp, BuildFeatures, BuildTest, LimitReason};
pub use context::{GitInfo, PipelineContext, UploadPointer, WorkspaceCheckout};
pub use error::{ErrorKind, PipelineError, Result, WorkspaceError, GENERIC_FAILURE_EXIT_CODE};
pub use manifest::{FileLength, FileManifest, REQUIRED_ENTRY_FILES};
pub use options::{ExitOnceUploaded, Options};
