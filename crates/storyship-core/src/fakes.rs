//! In-memory fakes for the collaborator traits (testing only)
//!
//! `FakeGit` and `FakeRemote` satisfy the trait contracts without a
//! repository or a network, and record every call so tests can assert
//! ordering and counts.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::error::{PipelineError, Result};
use crate::git::{CommitRange, GitFacts, PackageManifestChange};
use crate::remote::RemoteClient;

// ---------------------------------------------------------------------------
// FakeGit
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct GitState {
    current_ref: String,
    clean: bool,
    up_to_date: bool,
    update_message: String,
    merge_base: Option<String>,
    changed_files: BTreeSet<String>,
    manifest_changes: Vec<PackageManifestChange>,
    files: HashMap<(String, String), String>,
    failing_checkouts: BTreeSet<String>,
    calls: Vec<String>,
}

impl Default for GitState {
    fn default() -> Self {
        Self {
            current_ref: "work".to_string(),
            clean: true,
            up_to_date: true,
            update_message: "Your branch is behind 'origin/main' by 1 commit.".to_string(),
            merge_base: Some("base".to_string()),
            changed_files: BTreeSet::new(),
            manifest_changes: Vec::new(),
            files: HashMap::new(),
            failing_checkouts: BTreeSet::new(),
            calls: Vec::new(),
        }
    }
}

/// Scriptable [`GitFacts`] implementation.
#[derive(Debug, Default)]
pub struct FakeGit {
    state: Mutex<GitState>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ref checked out before the run starts; defaults to `work`.
    pub fn on_ref(self, current_ref: &str) -> Self {
        self.state.lock().unwrap().current_ref = current_ref.to_string();
        self
    }

    pub fn dirty(self) -> Self {
        self.state.lock().unwrap().clean = false;
        self
    }

    pub fn stale(self) -> Self {
        self.state.lock().unwrap().up_to_date = false;
        self
    }

    pub fn with_merge_base(self, merge_base: Option<&str>) -> Self {
        self.state.lock().unwrap().merge_base = merge_base.map(str::to_string);
        self
    }

    pub fn with_changed_files<I, S>(self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .lock()
            .unwrap()
            .changed_files
            .extend(files.into_iter().map(Into::into));
        self
    }

    pub fn with_manifest_change(self, commit: &str, files: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .manifest_changes
            .push(PackageManifestChange {
                commit: commit.to_string(),
                changed_files: files.iter().map(|f| f.to_string()).collect(),
            });
        self
    }

    /// Make `checkout(target)` fail.
    pub fn failing_checkout(self, target: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_checkouts
            .insert(target.to_string());
        self
    }

    pub fn set_file(&self, commit: &str, path: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert((commit.to_string(), path.to_string()), content.to_string());
    }

    /// Every call as `name` or `name:arg`, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of calls whose name starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl GitFacts for FakeGit {
    async fn is_clean(&self) -> Result<bool> {
        self.record("is_clean".to_string());
        Ok(self.state.lock().unwrap().clean)
    }

    async fn current_ref(&self) -> Result<String> {
        self.record("current_ref".to_string());
        Ok(self.state.lock().unwrap().current_ref.clone())
    }

    async fn is_up_to_date(&self, base_ref: &str) -> Result<bool> {
        self.record(format!("is_up_to_date:{base_ref}"));
        Ok(self.state.lock().unwrap().up_to_date)
    }

    async fn update_message(&self) -> Result<String> {
        self.record("update_message".to_string());
        Ok(self.state.lock().unwrap().update_message.clone())
    }

    async fn find_merge_base(&self, head: &str, base: &str) -> Result<Option<String>> {
        self.record(format!("find_merge_base:{head}..{base}"));
        Ok(self.state.lock().unwrap().merge_base.clone())
    }

    async fn checkout(&self, commit: &str) -> Result<()> {
        self.record(format!("checkout:{commit}"));
        let mut state = self.state.lock().unwrap();
        if state.failing_checkouts.contains(commit) {
            return Err(PipelineError::Git(format!("cannot checkout {commit}")));
        }
        state.current_ref = commit.to_string();
        Ok(())
    }

    async fn discard_changes(&self) -> Result<()> {
        self.record("discard_changes".to_string());
        Ok(())
    }

    async fn changed_files(&self, range: &CommitRange) -> Result<BTreeSet<String>> {
        self.record(format!("changed_files:{range}"));
        Ok(self.state.lock().unwrap().changed_files.clone())
    }

    async fn package_manifest_changes(
        &self,
        range: &CommitRange,
    ) -> Result<Vec<PackageManifestChange>> {
        self.record(format!("package_manifest_changes:{range}"));
        Ok(self.state.lock().unwrap().manifest_changes.clone())
    }

    async fn file_at(&self, commit: &str, path: &str) -> Result<Option<String>> {
        self.record(format!("file_at:{commit}:{path}"));
        let state = self.state.lock().unwrap();
        Ok(state
            .files
            .get(&(commit.to_string(), path.to_string()))
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// FakeRemote
// ---------------------------------------------------------------------------

/// Scriptable [`RemoteClient`] keyed by operation name.
///
/// Queued responses (`respond_once`, `fail_once`) are consumed first; the
/// standing response set with `respond` answers every later call.
#[derive(Debug, Default)]
pub struct FakeRemote {
    queued: Mutex<HashMap<String, VecDeque<std::result::Result<Value, String>>>>,
    standing: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, operation: &str, data: Value) {
        self.standing
            .lock()
            .unwrap()
            .insert(operation.to_string(), data);
    }

    pub fn respond_once(&self, operation: &str, data: Value) {
        self.queued
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_default()
            .push_back(Ok(data));
    }

    pub fn fail_once(&self, operation: &str, reason: &str) {
        self.queued
            .lock()
            .unwrap()
            .entry(operation.to_string())
            .or_default()
            .push_back(Err(reason.to_string()));
    }

    /// Variables of every call to `operation`, in order.
    pub fn calls_for(&self, operation: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| op == operation)
            .map(|(_, vars)| vars.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn run_query(&self, operation: &str, variables: Value) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((operation.to_string(), variables));

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        match queued {
            Some(Ok(data)) => Ok(data),
            Some(Err(reason)) => Err(PipelineError::remote(operation, reason)),
            None => self
                .standing
                .lock()
                .unwrap()
                .get(operation)
                .cloned()
                .ok_or_else(|| PipelineError::remote(operation, "no response configured")),
        }
    }
}
