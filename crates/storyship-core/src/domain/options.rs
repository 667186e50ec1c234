//! Externally supplied, already-validated pipeline options.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::Result;
use crate::glob::GlobSet;

/// Branch policy for finishing the run as soon as the build is uploaded.
///
/// Deserializes from either a boolean or a branch glob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExitOnceUploaded {
    Flag(bool),
    Branch(String),
}

impl Default for ExitOnceUploaded {
    fn default() -> Self {
        ExitOnceUploaded::Flag(false)
    }
}

impl ExitOnceUploaded {
    /// Whether the policy applies to `branch`. Fails on a malformed glob.
    pub fn applies_to(&self, branch: &str) -> Result<bool> {
        match self {
            ExitOnceUploaded::Flag(enabled) => Ok(*enabled),
            ExitOnceUploaded::Branch(pattern) => {
                Ok(GlobSet::new([pattern.as_str()])?.is_match(branch))
            }
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    /// Static catalog build output directory.
    pub build_dir: PathBuf,

    /// Log file written by the catalog build, scanned for a relocated output directory.
    pub build_log_file: Option<PathBuf>,

    /// Name of the dependency-graph stats artifact inside the build directory.
    pub stats_file: String,

    /// Catalog project directory relative to the repository root, prefixed to
    /// stats module names so they compare against changed file paths.
    pub stats_base_dir: Option<String>,

    /// Head ref of a patch build. Patch preparation runs only when both refs are set.
    pub patch_head_ref: Option<String>,

    /// Base ref of a patch build.
    pub patch_base_ref: Option<String>,

    /// Ref the change-impact tracer diffs against when no patch build ran.
    pub base_ref: String,

    /// Enable change-impact tracing.
    pub only_changed: bool,

    /// Globs for changed files that never affect any story.
    pub untraced: Vec<String>,

    /// Globs for files served outside the module graph (static assets).
    pub externals: Vec<String>,

    /// Upload the build as a single zip archive.
    pub archive: bool,

    /// Register the build for listing only.
    pub list_only: bool,

    pub exit_once_uploaded: ExitOnceUploaded,

    /// Send a SHA-256 content hash with every file.
    pub file_hashing: bool,

    /// Dependency installation command, run after checking out the merge base.
    pub install_command: Option<Vec<String>>,

    /// Catalog build command.
    pub build_command: Option<Vec<String>>,

    /// Timeout for external commands in seconds. Zero disables the timeout.
    pub command_timeout_secs: u64,

    pub branch: String,
    pub commit: String,
    pub committed_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from("storybook-static"),
            build_log_file: Some(PathBuf::from("build-storybook.log")),
            stats_file: "preview-stats.json".to_string(),
            stats_base_dir: None,
            patch_head_ref: None,
            patch_base_ref: None,
            base_ref: "main".to_string(),
            only_changed: false,
            untraced: Vec::new(),
            externals: Vec::new(),
            archive: false,
            list_only: false,
            exit_once_uploaded: ExitOnceUploaded::default(),
            file_hashing: false,
            install_command: None,
            build_command: None,
            command_timeout_secs: 1800,
            branch: "main".to_string(),
            commit: "HEAD".to_string(),
            committed_at: None,
            author: None,
        }
    }
}

impl Options {
    /// Both patch refs, when this is a patch build.
    pub fn patch_refs(&self) -> Option<(&str, &str)> {
        match (&self.patch_head_ref, &self.patch_base_ref) {
            (Some(head), Some(base)) => Some((head.as_str(), base.as_str())),
            _ => None,
        }
    }
}
