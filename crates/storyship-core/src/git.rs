//! Git facts consumed by the pipeline.
//!
//! [`GitFacts`] is the seam between the pipeline and the repository. The
//! pipeline never shells out itself; [`GitCli`] implements the trait on top
//! of the `git` executable.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::error::{PipelineError, Result};

/// File names that declare or pin dependencies.
pub const PACKAGE_MANIFEST_FILES: [&str; 5] = [
    "package.json",
    "package-lock.json",
    "npm-shrinkwrap.json",
    "yarn.lock",
    "pnpm-lock.yaml",
];

/// Whether `path` names a dependency manifest or lockfile.
pub fn is_package_manifest(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    PACKAGE_MANIFEST_FILES.contains(&name)
}

/// A `base..head` commit range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRange {
    pub base: String,
    pub head: String,
}

impl CommitRange {
    pub fn new(base: impl Into<String>, head: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            head: head.into(),
        }
    }
}

impl std::fmt::Display for CommitRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.base, self.head)
    }
}

/// A commit in range that touched dependency manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifestChange {
    pub commit: String,
    pub changed_files: Vec<String>,
}

/// Diff between the merge base and head.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub changed_files: BTreeSet<String>,
    pub package_manifest_changes: Vec<PackageManifestChange>,
}

/// Repository facts and operations used by the pipeline.
#[async_trait]
pub trait GitFacts: Send + Sync {
    /// No staged, unstaged or untracked changes.
    async fn is_clean(&self) -> Result<bool>;

    /// Branch name checked out right now, or the commit sha when detached.
    async fn current_ref(&self) -> Result<String>;

    /// Local head matches its upstream, and `base_ref` matches its
    /// remote-tracking ref when it has one. A head without an upstream is
    /// never up to date.
    async fn is_up_to_date(&self, base_ref: &str) -> Result<bool>;

    /// Human hint explaining how to bring the workspace up to date.
    async fn update_message(&self) -> Result<String>;

    /// Nearest common ancestor of two refs, `None` when unrelated.
    async fn find_merge_base(&self, head: &str, base: &str) -> Result<Option<String>>;

    async fn checkout(&self, commit: &str) -> Result<()>;

    /// Throw away modifications to tracked files.
    async fn discard_changes(&self) -> Result<()>;

    async fn changed_files(&self, range: &CommitRange) -> Result<BTreeSet<String>>;

    /// Commits in range touching manifests, oldest last as reported by git.
    async fn package_manifest_changes(
        &self,
        range: &CommitRange,
    ) -> Result<Vec<PackageManifestChange>>;

    /// Content of `path` at `commit`, `None` if it did not exist there.
    async fn file_at(&self, commit: &str, path: &str) -> Result<Option<String>>;
}

/// [`GitFacts`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_dir: PathBuf,
}

impl GitCli {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn output(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!(args = ?args, "running git");
        Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .map_err(|e| PipelineError::Git(format!("failed to run git: {e}")))
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitFacts for GitCli {
    async fn is_clean(&self) -> Result<bool> {
        let status = self.run(&["status", "--porcelain"]).await?;
        Ok(status.is_empty())
    }

    async fn current_ref(&self) -> Result<String> {
        let name = self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        if name == "HEAD" {
            return self.run(&["rev-parse", "HEAD"]).await;
        }
        Ok(name)
    }

    async fn is_up_to_date(&self, base_ref: &str) -> Result<bool> {
        if let Err(e) = self.run(&["remote", "update"]).await {
            warn!(error = %e, "could not update remotes");
        }

        let local = self.run(&["rev-parse", "HEAD"]).await?;
        let Ok(upstream) = self.run(&["rev-parse", "@{upstream}"]).await else {
            warn!("no upstream configured for the current branch");
            return Ok(false);
        };
        if local != upstream {
            return Ok(false);
        }

        let tracking = format!("{base_ref}@{{upstream}}");
        match self.run(&["rev-parse", &tracking]).await {
            Ok(remote_base) => {
                let local_base = self.run(&["rev-parse", base_ref]).await?;
                Ok(local_base == remote_base)
            }
            Err(_) => {
                debug!(base_ref, "base ref has no remote-tracking ref");
                Ok(true)
            }
        }
    }

    async fn update_message(&self) -> Result<String> {
        let status = self.run(&["status"]).await?;
        let hint = status
            .lines()
            .find(|line| line.starts_with("Your branch"))
            .map(str::to_string);
        Ok(hint.unwrap_or_else(|| {
            "Your branch is out of date with its remote; run `git pull` to update.".to_string()
        }))
    }

    async fn find_merge_base(&self, head: &str, base: &str) -> Result<Option<String>> {
        let output = self.output(&["merge-base", head, base]).await?;
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        match output.status.code() {
            Some(0) if !sha.is_empty() => Ok(Some(sha)),
            Some(1) => Ok(None),
            _ => Err(PipelineError::Git(format!(
                "git merge-base {head} {base} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    async fn checkout(&self, commit: &str) -> Result<()> {
        self.run(&["checkout", commit]).await.map(|_| ())
    }

    async fn discard_changes(&self) -> Result<()> {
        self.run(&["reset", "--hard"]).await.map(|_| ())
    }

    async fn changed_files(&self, range: &CommitRange) -> Result<BTreeSet<String>> {
        let diff = self
            .run(&["diff", "--name-only", &range.base, &range.head])
            .await?;
        Ok(diff
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn package_manifest_changes(
        &self,
        range: &CommitRange,
    ) -> Result<Vec<PackageManifestChange>> {
        let range_arg = range.to_string();
        let pathspecs: Vec<String> = PACKAGE_MANIFEST_FILES
            .iter()
            .map(|name| format!("*{name}"))
            .collect();
        let mut args = vec!["log", "--format=%H", "--name-only", range_arg.as_str(), "--"];
        args.extend(pathspecs.iter().map(String::as_str));
        let log = self.run(&args).await?;
        Ok(parse_manifest_log(&log))
    }

    async fn file_at(&self, commit: &str, path: &str) -> Result<Option<String>> {
        let spec = format!("{commit}:{path}");
        let output = self.output(&["show", &spec]).await?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
        } else {
            Ok(None)
        }
    }
}

/// Parse `git log --format=%H --name-only` output.
fn parse_manifest_log(log: &str) -> Vec<PackageManifestChange> {
    let mut changes: Vec<PackageManifestChange> = Vec::new();
    for line in log.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let is_sha = line.len() == 40 && line.chars().all(|c| c.is_ascii_hexdigit());
        if is_sha {
            changes.push(PackageManifestChange {
                commit: line.to_string(),
                changed_files: Vec::new(),
            });
        } else if let Some(current) = changes.last_mut() {
            if is_package_manifest(line) {
                current.changed_files.push(line.to_string());
            }
        }
    }
    changes.retain(|c| !c.changed_files.is_empty());
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["checkout", "-b", "main"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }

    fn commit_file(repo: &Path, path: &str, content: &str) -> String {
        let full = repo.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&full, content).unwrap();
        run_git(repo, &["add", path]);
        run_git(repo, &["commit", "-m", &format!("update {path}")]);
        run_git(repo, &["rev-parse", "HEAD"])
    }

    #[test]
    fn test_is_package_manifest() {
        assert!(is_package_manifest("package.json"));
        assert!(is_package_manifest("packages/ui/yarn.lock"));
        assert!(!is_package_manifest("src/package.json.bak"));
        assert!(!is_package_manifest("src/Button.tsx"));
    }

    #[test]
    fn test_parse_manifest_log() {
        let a = "a".repeat(40);
        let b = "b".repeat(40);
        let log = format!("{a}\n\npackage.json\nyarn.lock\n{b}\n\nREADME.md\n");
        let changes = parse_manifest_log(&log);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].commit, a);
        assert_eq!(changes[0].changed_files, vec!["package.json", "yarn.lock"]);
    }

    #[tokio::test]
    async fn test_clean_and_dirty_tree() {
        let repo = make_git_repo();
        let git = GitCli::new(repo.path());
        assert!(git.is_clean().await.unwrap());

        std::fs::write(repo.path().join("untracked.txt"), "x").unwrap();
        assert!(!git.is_clean().await.unwrap());
    }

    #[tokio::test]
    async fn test_merge_base_and_diff() {
        let repo = make_git_repo();
        let base = run_git(repo.path(), &["rev-parse", "HEAD"]);
        run_git(repo.path(), &["checkout", "-b", "feature"]);
        commit_file(repo.path(), "src/Button.js", "export default 1");
        let head = commit_file(repo.path(), "package.json", "{}");

        let git = GitCli::new(repo.path());
        let merge_base = git.find_merge_base("feature", "main").await.unwrap();
        assert_eq!(merge_base.as_deref(), Some(base.as_str()));

        let range = CommitRange::new(&base, &head);
        let changed = git.changed_files(&range).await.unwrap();
        assert!(changed.contains("src/Button.js"));
        assert!(changed.contains("package.json"));

        let manifest_changes = git.package_manifest_changes(&range).await.unwrap();
        assert_eq!(manifest_changes.len(), 1);
        assert_eq!(manifest_changes[0].commit, head);

        assert_eq!(
            git.file_at(&head, "package.json").await.unwrap().as_deref(),
            Some("{}")
        );
        assert!(git.file_at(&base, "package.json").await.unwrap().is_none());
    }

    fn clone_repo(origin: &Path) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let origin = origin.to_str().unwrap();
        let dest = dir.path().to_str().unwrap();
        run_git(dir.path(), &["clone", "-q", origin, dest]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        dir
    }

    #[tokio::test]
    async fn test_current_ref_names_branch_or_detached_sha() {
        let repo = make_git_repo();
        let git = GitCli::new(repo.path());
        assert_eq!(git.current_ref().await.unwrap(), "main");

        let sha = run_git(repo.path(), &["rev-parse", "HEAD"]);
        run_git(repo.path(), &["checkout", "-q", "--detach"]);
        assert_eq!(git.current_ref().await.unwrap(), sha);
    }

    #[tokio::test]
    async fn test_branch_without_upstream_is_not_up_to_date() {
        let repo = make_git_repo();
        let git = GitCli::new(repo.path());
        assert!(!git.is_up_to_date("main").await.unwrap());
    }

    #[tokio::test]
    async fn test_up_to_date_follows_head_and_base_tracking_refs() {
        let origin = make_git_repo();
        let clone = clone_repo(origin.path());
        let git = GitCli::new(clone.path());
        assert!(git.is_up_to_date("main").await.unwrap());

        run_git(clone.path(), &["checkout", "-q", "-b", "feature"]);
        commit_file(clone.path(), "src/Card.js", "export default 2");
        run_git(clone.path(), &["push", "-q", "-u", "origin", "feature"]);
        assert!(git.is_up_to_date("main").await.unwrap());

        // Head still matches origin/feature, but main moved on the remote.
        run_git(origin.path(), &["commit", "--allow-empty", "-m", "remote work"]);
        assert!(!git.is_up_to_date("main").await.unwrap());
    }

    #[tokio::test]
    async fn test_unrelated_histories_have_no_merge_base() {
        let repo = make_git_repo();
        run_git(repo.path(), &["checkout", "--orphan", "island"]);
        run_git(repo.path(), &["commit", "--allow-empty", "-m", "island"]);

        let git = GitCli::new(repo.path());
        assert!(git.find_merge_base("island", "main").await.unwrap().is_none());
    }
}
