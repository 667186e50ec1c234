//! Change-impact tracing ("TurboSnap").
//!
//! Maps the file-level diff between the merge base and head onto the set of
//! story files whose rendering could have changed. Tracing must never produce
//! a false negative: whenever the outcome is uncertain the tracer bails and
//! the build runs unfiltered.
//!
//! Order of decisions:
//! 1. Diff the range and collect manifest-touching commits.
//! 2. Try to resolve exact dependency changes; degrade on any failure.
//! 3. Bail on changed manifests unless resolution proved nothing changed or
//!    the manifest is untraced.
//! 4. Load the dependency graph and project every remaining changed file.

pub mod deps;
pub mod graph;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::context::PipelineContext;
use crate::domain::error::Result;
use crate::git::{is_package_manifest, ChangeSet, CommitRange, GitFacts};
use crate::glob::GlobSet;
use crate::metrics::METRICS;

pub use deps::{DependencyQuery, DependencyResolution, DependencyResolver, LockfileResolver};
pub use graph::{DependencyGraph, GraphError, Projection};

/// Why tracing gave up and requested a full run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum BailReason {
    ChangedPackageFiles { files: Vec<String> },
    ChangedStorybookFiles { files: Vec<String> },
    MissingStatsFile { path: String },
    InvalidStatsFile { error: String },
    NoMergeBase { base_ref: String },
}

impl std::fmt::Display for BailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BailReason::ChangedPackageFiles { files } => {
                write!(f, "changed package files: {}", files.join(", "))
            }
            BailReason::ChangedStorybookFiles { files } => {
                write!(f, "changed catalog configuration: {}", files.join(", "))
            }
            BailReason::MissingStatsFile { path } => write!(f, "stats file missing at {path}"),
            BailReason::InvalidStatsFile { error } => write!(f, "invalid stats file: {error}"),
            BailReason::NoMergeBase { base_ref } => {
                write!(f, "no common ancestor with {base_ref}")
            }
        }
    }
}

/// Outcome of tracing. Exactly one of the two shapes is ever produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TurboSnapResult {
    #[serde(rename_all = "camelCase")]
    Traced {
        affected_story_files: BTreeSet<String>,
    },
    #[serde(rename_all = "camelCase")]
    Bailed { bail_reason: BailReason },
}

impl TurboSnapResult {
    pub fn bailed(reason: BailReason) -> Self {
        TurboSnapResult::Bailed {
            bail_reason: reason,
        }
    }

    pub fn affected_story_files(&self) -> Option<&BTreeSet<String>> {
        match self {
            TurboSnapResult::Traced {
                affected_story_files,
            } => Some(affected_story_files),
            TurboSnapResult::Bailed { .. } => None,
        }
    }

    pub fn bail_reason(&self) -> Option<&BailReason> {
        match self {
            TurboSnapResult::Bailed { bail_reason } => Some(bail_reason),
            TurboSnapResult::Traced { .. } => None,
        }
    }
}

/// Traces a diff onto affected story files.
pub struct ChangeImpactTracer {
    git: Arc<dyn GitFacts>,
    resolver: Arc<dyn DependencyResolver>,
}

impl ChangeImpactTracer {
    pub fn new(git: Arc<dyn GitFacts>, resolver: Arc<dyn DependencyResolver>) -> Self {
        Self { git, resolver }
    }

    /// Trace the changes of this run and store the result in `ctx.turbo_snap`.
    ///
    /// Reads `ctx.git` and `ctx.source_dir`; writes `ctx.git.merge_base`,
    /// `ctx.git.change_set` and `ctx.turbo_snap`.
    pub async fn trace_changed_files(&self, ctx: &mut PipelineContext) -> Result<TurboSnapResult> {
        let result = self.trace(ctx).await?;
        crate::obs::emit_trace_result(&result);
        ctx.turbo_snap = Some(result.clone());
        Ok(result)
    }

    async fn trace(&self, ctx: &mut PipelineContext) -> Result<TurboSnapResult> {
        let options = ctx.options().clone();
        let untraced = GlobSet::new(&options.untraced)?;
        let externals = GlobSet::new(&options.externals)?;

        let merge_base = match ctx.git.merge_base.clone() {
            Some(sha) => sha,
            None => match self
                .git
                .find_merge_base(&ctx.git.commit, &options.base_ref)
                .await?
            {
                Some(sha) => {
                    ctx.git.merge_base = Some(sha.clone());
                    sha
                }
                None => {
                    return Ok(TurboSnapResult::bailed(BailReason::NoMergeBase {
                        base_ref: options.base_ref.clone(),
                    }))
                }
            },
        };

        let range = CommitRange::new(merge_base, ctx.git.commit.clone());
        let changed_files = self.git.changed_files(&range).await?;
        let package_manifest_changes = self.git.package_manifest_changes(&range).await?;
        debug!(
            range = %range,
            changed = changed_files.len(),
            manifest_commits = package_manifest_changes.len(),
            "collected change set"
        );

        let changed_manifests: BTreeSet<String> = changed_files
            .iter()
            .filter(|f| is_package_manifest(f))
            .cloned()
            .collect();
        let manifest_paths: BTreeSet<String> = package_manifest_changes
            .iter()
            .flat_map(|c| c.changed_files.iter().cloned())
            .chain(changed_manifests.iter().cloned())
            .collect();

        ctx.git.change_set = Some(ChangeSet {
            changed_files: changed_files.clone(),
            package_manifest_changes,
        });

        let manifests_unchanged = if manifest_paths.is_empty() {
            true
        } else {
            let query = DependencyQuery {
                range: range.clone(),
                manifest_paths: manifest_paths.into_iter().collect(),
            };
            match self.resolver.resolve(&query).await {
                DependencyResolution::Changed(deps) if deps.is_empty() => true,
                DependencyResolution::Changed(deps) => {
                    info!(dependencies = ?deps, "dependency versions changed");
                    false
                }
                DependencyResolution::Unsupported(reason) | DependencyResolution::Failed(reason) => {
                    warn!(
                        reason = %reason,
                        "dependency resolution unavailable, checking manifest files instead"
                    );
                    false
                }
            }
        };

        if !manifests_unchanged {
            let files: Vec<String> = changed_manifests
                .iter()
                .filter(|f| !untraced.is_match(f))
                .cloned()
                .collect();
            if !files.is_empty() {
                return Ok(TurboSnapResult::bailed(BailReason::ChangedPackageFiles {
                    files,
                }));
            }
        }

        let stats_path = ctx.source_dir.join(&options.stats_file);
        let base_dir = options.stats_base_dir.as_deref();
        let graph = match DependencyGraph::load(&stats_path, base_dir).await {
            Ok(graph) => graph,
            Err(GraphError::Missing(path)) => {
                return Ok(TurboSnapResult::bailed(BailReason::MissingStatsFile { path }))
            }
            Err(e) => {
                return Ok(TurboSnapResult::bailed(BailReason::InvalidStatsFile {
                    error: e.to_string(),
                }))
            }
        };

        let mut affected_story_files = BTreeSet::new();
        let mut storybook_files = Vec::new();

        for file in changed_files.iter().filter(|f| !is_package_manifest(f)) {
            if untraced.is_match(file) || externals.is_match(file) {
                debug!(file = %file, "skipping excluded file");
                continue;
            }
            METRICS.inc_traced_files();
            let projection = graph.project(file);
            if projection.reaches_config {
                storybook_files.push(file.clone());
            } else {
                affected_story_files.extend(projection.story_files);
            }
        }

        if !storybook_files.is_empty() {
            return Ok(TurboSnapResult::bailed(BailReason::ChangedStorybookFiles {
                files: storybook_files,
            }));
        }

        Ok(TurboSnapResult::Traced {
            affected_story_files,
        })
    }
}
