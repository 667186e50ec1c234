//! Exact dependency-change resolution between the merge base and head.
//!
//! Resolution never fails the trace. Anything the resolver cannot handle is
//! reported as [`DependencyResolution::Unsupported`] or
//! [`DependencyResolution::Failed`] and the tracer falls back to the coarse
//! manifest-file check.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::git::{CommitRange, GitFacts};

/// Outcome of resolving dependency changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyResolution {
    /// Dependencies whose declared or locked version changed: package names
    /// for manifests, install paths for lockfiles.
    Changed(BTreeSet<String>),
    /// The manifests involved cannot be resolved by this resolver.
    Unsupported(String),
    /// Resolution was attempted and failed.
    Failed(String),
}

impl DependencyResolution {
    /// Resolution succeeded and found nothing that changed.
    pub fn is_unchanged(&self) -> bool {
        matches!(self, DependencyResolution::Changed(deps) if deps.is_empty())
    }
}

/// Input to a resolver call; manifest paths are deduplicated and sorted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyQuery {
    pub range: CommitRange,
    pub manifest_paths: Vec<String>,
}

/// Resolves which dependencies changed across a commit range.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    async fn resolve(&self, query: &DependencyQuery) -> DependencyResolution;
}

const DEPENDENCY_SECTIONS: [&str; 4] = [
    "dependencies",
    "devDependencies",
    "peerDependencies",
    "optionalDependencies",
];

/// Resolver for `package.json` and npm lockfiles, reading both sides from git.
pub struct LockfileResolver {
    git: Arc<dyn GitFacts>,
}

impl LockfileResolver {
    pub fn new(git: Arc<dyn GitFacts>) -> Self {
        Self { git }
    }

    async fn load_pair(&self, range: &CommitRange, path: &str) -> Result<(Value, Value), String> {
        let base = self
            .git
            .file_at(&range.base, path)
            .await
            .map_err(|e| e.to_string())?;
        let head = self
            .git
            .file_at(&range.head, path)
            .await
            .map_err(|e| e.to_string())?;
        Ok((parse_json(path, base)?, parse_json(path, head)?))
    }
}

fn parse_json(path: &str, content: Option<String>) -> Result<Value, String> {
    match content {
        None => Ok(Value::Object(Default::default())),
        Some(raw) => serde_json::from_str(&raw).map_err(|e| format!("{path}: {e}")),
    }
}

/// Declared dependency specs of a `package.json`, keyed by name.
fn declared_dependencies(manifest: &Value) -> BTreeMap<String, String> {
    DEPENDENCY_SECTIONS
        .iter()
        .filter_map(|section| manifest.get(section).and_then(Value::as_object))
        .flat_map(|deps| deps.iter())
        .map(|(name, spec)| (name.clone(), spec.to_string()))
        .collect()
}

/// Locked versions of an npm lockfile, keyed by install path.
///
/// v2+ lockfiles list every install under `packages` with its full
/// `node_modules/...` path. v1 lockfiles nest duplicates under each entry's
/// own `dependencies`; those are flattened into the same path form so a
/// nested copy never shadows the top-level one.
fn locked_versions(lockfile: &Value) -> BTreeMap<String, String> {
    let mut versions = BTreeMap::new();
    if let Some(packages) = lockfile.get("packages").and_then(Value::as_object) {
        for (path, entry) in packages.iter().filter(|(path, _)| !path.is_empty()) {
            versions.insert(path.clone(), locked_version(entry));
        }
    } else if let Some(deps) = lockfile.get("dependencies").and_then(Value::as_object) {
        collect_v1(deps, "", &mut versions);
    }
    versions
}

fn collect_v1(deps: &Map<String, Value>, prefix: &str, versions: &mut BTreeMap<String, String>) {
    for (name, entry) in deps {
        let path = format!("{prefix}node_modules/{name}");
        versions.insert(path.clone(), locked_version(entry));
        if let Some(nested) = entry.get("dependencies").and_then(Value::as_object) {
            collect_v1(nested, &format!("{path}/"), versions);
        }
    }
}

fn locked_version(entry: &Value) -> String {
    entry.get("version").map(Value::to_string).unwrap_or_default()
}

fn diff_maps(base: &BTreeMap<String, String>, head: &BTreeMap<String, String>) -> BTreeSet<String> {
    base.keys()
        .chain(head.keys())
        .filter(|name| base.get(*name) != head.get(*name))
        .cloned()
        .collect()
}

#[async_trait]
impl DependencyResolver for LockfileResolver {
    async fn resolve(&self, query: &DependencyQuery) -> DependencyResolution {
        let mut changed = BTreeSet::new();

        for path in &query.manifest_paths {
            let name = path.rsplit('/').next().unwrap_or(path);
            let extract: fn(&Value) -> BTreeMap<String, String> = match name {
                "package.json" => declared_dependencies,
                "package-lock.json" | "npm-shrinkwrap.json" => locked_versions,
                other => {
                    return DependencyResolution::Unsupported(format!(
                        "no resolver for {other}"
                    ))
                }
            };

            let (base, head) = match self.load_pair(&query.range, path).await {
                Ok(pair) => pair,
                Err(reason) => return DependencyResolution::Failed(reason),
            };
            let diff = diff_maps(&extract(&base), &extract(&head));
            debug!(path = %path, changed = diff.len(), "resolved dependency changes");
            changed.extend(diff);
        }

        DependencyResolution::Changed(changed)
    }
}
