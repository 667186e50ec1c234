//! Integration tests for the publishing pipeline with in-memory collaborators.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use storyship_ci::{
    CommandExecutor, CommandResult, CommandSpec, Pipeline, PipelineOutcome, TaskObserver,
    TaskState, CREATE_BUILD,
};
use storyship_core::fakes::{FakeGit, FakeRemote};
use storyship_core::{Options, PipelineContext, Result};
use storyship_upload::{ProgressSink, PutRequest, TransferError, UploadTransport, GET_UPLOAD_URLS};
use tempfile::TempDir;

/// Executor answering by command name; unknown commands pass.
#[derive(Default)]
struct ScriptedExecutor {
    exit_codes: HashMap<String, i32>,
    ran: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn failing(name: &str) -> Self {
        Self {
            exit_codes: HashMap::from([(name.to_string(), 1)]),
            ..Self::default()
        }
    }

    fn ran(&self) -> Vec<String> {
        self.ran.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, spec: &CommandSpec) -> Result<CommandResult> {
        self.ran.lock().unwrap().push(spec.name.clone());
        let exit_code = self.exit_codes.get(&spec.name).copied().unwrap_or(0);
        Ok(CommandResult {
            name: spec.name.clone(),
            exit_code,
            stdout: String::new(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "ERR! lockfile is corrupt".to_string()
            },
            duration_ms: 5,
            success: exit_code == 0,
        })
    }
}

/// Transport accepting every transfer.
#[derive(Default)]
struct AcceptingTransport {
    urls: Mutex<Vec<String>>,
}

#[async_trait]
impl UploadTransport for AcceptingTransport {
    async fn put_file(
        &self,
        request: &PutRequest,
        progress: ProgressSink,
    ) -> std::result::Result<(), TransferError> {
        progress.report(request.content_length);
        self.urls.lock().unwrap().push(request.url.clone());
        Ok(())
    }

    async fn check(&self, _url: &str) -> std::result::Result<bool, TransferError> {
        Ok(true)
    }
}

#[derive(Default)]
struct RecordingObserver {
    transitions: Mutex<Vec<(String, TaskState)>>,
}

impl TaskObserver for RecordingObserver {
    fn on_transition(&self, task: &str, state: &TaskState) {
        self.transitions
            .lock()
            .unwrap()
            .push((task.to_string(), state.clone()));
    }
}

impl RecordingObserver {
    /// Terminal state label of each task, in order.
    fn terminal(&self) -> Vec<(String, &'static str)> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, state)| state.is_terminal())
            .map(|(task, state)| (task.clone(), state.label()))
            .collect()
    }
}

const STATS: &str = r#"{
    "modules": [
        {"name": "./generated-stories-entry.js", "reasons": []},
        {"name": "./src/Button.stories.js",
         "reasons": [{"moduleName": "./generated-stories-entry.js"}]},
        {"name": "./src/Button.js",
         "reasons": [{"moduleName": "./src/Button.stories.js"}]}
    ]
}"#;

fn build_output() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), vec![b'i'; 42]).unwrap();
    std::fs::write(dir.path().join("iframe.html"), vec![b'f'; 42]).unwrap();
    std::fs::write(dir.path().join("preview-stats.json"), STATS).unwrap();
    dir
}

fn remote_with_build(build: Value) -> Arc<FakeRemote> {
    let remote = Arc::new(FakeRemote::new());
    remote.respond(
        GET_UPLOAD_URLS,
        json!({
            "getUploadUrls": {
                "domain": "https://cdn.example/b1",
                "urls": [
                    {"path": "iframe.html", "url": "https://s3/iframe", "contentType": "text/html"},
                    {"path": "index.html", "url": "https://s3/index", "contentType": "text/html"},
                    {"path": "preview-stats.json", "url": "https://s3/stats", "contentType": "application/json"}
                ]
            }
        }),
    );
    remote.respond(CREATE_BUILD, json!({ "createBuild": build }));
    remote
}

fn visual_build() -> Value {
    json!({
        "id": "build-1",
        "number": 12,
        "specCount": 3,
        "features": {"uiTests": true, "uiReview": false}
    })
}

fn options(build_dir: &Path) -> Options {
    Options {
        build_dir: build_dir.to_path_buf(),
        build_log_file: None,
        commit: "head".to_string(),
        branch: "feature/button".to_string(),
        ..Options::default()
    }
}

fn patch_options(build_dir: &Path) -> Options {
    Options {
        patch_head_ref: Some("feature".to_string()),
        patch_base_ref: Some("main".to_string()),
        install_command: Some(vec!["npm".to_string(), "ci".to_string()]),
        ..options(build_dir)
    }
}

struct Harness {
    git: Arc<FakeGit>,
    remote: Arc<FakeRemote>,
    executor: Arc<ScriptedExecutor>,
    transport: Arc<AcceptingTransport>,
    observer: Arc<RecordingObserver>,
}

impl Harness {
    fn new(git: FakeGit, remote: Arc<FakeRemote>, executor: ScriptedExecutor) -> Self {
        Self {
            git: Arc::new(git),
            remote,
            executor: Arc::new(executor),
            transport: Arc::new(AcceptingTransport::default()),
            observer: Arc::new(RecordingObserver::default()),
        }
    }

    async fn run(&self, options: Options) -> PipelineOutcome {
        let pipeline = Pipeline::builder(
            self.git.clone(),
            self.remote.clone(),
            self.transport.clone(),
            self.executor.clone(),
        )
        .observer(self.observer.clone())
        .build();
        pipeline.run(PipelineContext::new(options)).await
    }
}

#[tokio::test]
async fn test_pipeline_task_order() {
    let harness = Harness::new(
        FakeGit::new(),
        remote_with_build(visual_build()),
        ScriptedExecutor::default(),
    );
    let pipeline = Pipeline::builder(
        harness.git.clone(),
        harness.remote.clone(),
        harness.transport.clone(),
        harness.executor.clone(),
    )
    .build();

    assert_eq!(
        pipeline.task_names(),
        vec![
            "prepareWorkspace",
            "build",
            "verifyBuildOutput",
            "traceChangedFiles",
            "upload",
            "createBuild",
            "restoreWorkspace",
        ]
    );
}

#[tokio::test]
async fn test_successful_traced_run() {
    let dir = build_output();
    let harness = Harness::new(
        FakeGit::new().with_changed_files(["src/Button.js"]),
        remote_with_build(visual_build()),
        ScriptedExecutor::default(),
    );

    let outcome = harness
        .run(Options {
            only_changed: true,
            ..options(dir.path())
        })
        .await;

    assert!(outcome.succeeded(), "unexpected failure: {:?}", outcome.error);
    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.uploaded_bytes, 84 + STATS.len() as u64);
    assert_eq!(outcome.build.as_ref().map(|b| b.number), Some(12));
    assert!(!outcome.skip_snapshots);

    let create = harness.remote.calls_for(CREATE_BUILD);
    assert_eq!(create.len(), 1);
    let input = &create[0]["input"];
    assert_eq!(input["onlyStoryFiles"], json!(["src/Button.stories.js"]));
    assert_eq!(input["isolatorUrl"], "https://cdn.example/b1/index.html");
    assert_eq!(input["branch"], "feature/button");

    assert_eq!(
        harness.observer.terminal(),
        vec![
            ("prepareWorkspace".to_string(), "skipped"),
            ("build".to_string(), "skipped"),
            ("verifyBuildOutput".to_string(), "success"),
            ("traceChangedFiles".to_string(), "success"),
            ("upload".to_string(), "success"),
            ("createBuild".to_string(), "success"),
            ("restoreWorkspace".to_string(), "skipped"),
        ]
    );
}

#[tokio::test]
async fn test_dirty_tree_exits_101_before_merge_base_lookup() {
    let dir = build_output();
    let harness = Harness::new(
        FakeGit::new().dirty(),
        remote_with_build(visual_build()),
        ScriptedExecutor::default(),
    );

    let outcome = harness.run(patch_options(dir.path())).await;

    assert_eq!(outcome.exit_code, 101);
    assert!(!outcome.succeeded());
    assert_eq!(harness.git.count("find_merge_base"), 0);
    assert_eq!(harness.git.count("checkout"), 0);
    assert_eq!(harness.remote.call_count(), 0);
}

#[tokio::test]
async fn test_stale_tree_exits_102() {
    let dir = build_output();
    let harness = Harness::new(
        FakeGit::new().stale(),
        remote_with_build(visual_build()),
        ScriptedExecutor::default(),
    );

    let outcome = harness.run(patch_options(dir.path())).await;

    assert_eq!(outcome.exit_code, 102);
    let error = outcome.error.unwrap();
    assert!(error.contains("behind 'origin/main'"), "{error}");
}

#[tokio::test]
async fn test_missing_merge_base_exits_103() {
    let dir = build_output();
    let harness = Harness::new(
        FakeGit::new().with_merge_base(None),
        remote_with_build(visual_build()),
        ScriptedExecutor::default(),
    );

    let outcome = harness.run(patch_options(dir.path())).await;

    assert_eq!(outcome.exit_code, 103);
    assert_eq!(harness.git.count("checkout"), 0);
}

#[tokio::test]
async fn test_install_failure_exits_104_and_restores_once() {
    let dir = build_output();
    let harness = Harness::new(
        FakeGit::new().on_ref("release-train"),
        remote_with_build(visual_build()),
        ScriptedExecutor::failing("install"),
    );

    let outcome = harness.run(patch_options(dir.path())).await;

    assert_eq!(outcome.exit_code, 104);
    assert!(outcome.error.unwrap().contains("lockfile is corrupt"));
    assert_eq!(harness.git.count("checkout:base"), 1);
    assert_eq!(harness.git.count("discard_changes"), 1);
    assert_eq!(harness.git.count("checkout:release-train"), 1);
    assert_eq!(harness.git.count("checkout:feature"), 0);
    assert_eq!(harness.executor.ran(), vec!["install"]);
}

#[tokio::test]
async fn test_failing_restore_keeps_original_error() {
    let dir = build_output();
    let harness = Harness::new(
        FakeGit::new().failing_checkout("work"),
        remote_with_build(visual_build()),
        ScriptedExecutor::failing("install"),
    );

    let outcome = harness.run(patch_options(dir.path())).await;

    assert_eq!(outcome.exit_code, 104);
    assert!(outcome.error.unwrap().contains("install"));
    assert_eq!(harness.git.count("checkout:work"), 1);
}

#[tokio::test]
async fn test_patch_build_restores_workspace_at_the_end() {
    let dir = build_output();
    let harness = Harness::new(
        FakeGit::new(),
        remote_with_build(visual_build()),
        ScriptedExecutor::default(),
    );

    let outcome = harness
        .run(Options {
            build_command: Some(vec!["npm".to_string(), "run".to_string(), "build".to_string()]),
            ..patch_options(dir.path())
        })
        .await;

    assert!(outcome.succeeded(), "unexpected failure: {:?}", outcome.error);
    assert_eq!(harness.executor.ran(), vec!["install", "build"]);
    let calls = harness.git.calls();
    let checkout_base = calls.iter().position(|c| c == "checkout:base").unwrap();
    let restore = calls.iter().position(|c| c == "checkout:work").unwrap();
    assert!(checkout_base < restore);
    assert_eq!(harness.git.count("checkout:work"), 1);
}

#[tokio::test]
async fn test_failure_after_checkout_restores_workspace() {
    let empty = tempfile::tempdir().unwrap();
    let harness = Harness::new(
        FakeGit::new(),
        remote_with_build(visual_build()),
        ScriptedExecutor::default(),
    );

    let outcome = harness.run(patch_options(empty.path())).await;

    assert_eq!(outcome.exit_code, storyship_core::GENERIC_FAILURE_EXIT_CODE);
    assert!(outcome.error.unwrap().starts_with("Invalid Storybook build at"));
    assert_eq!(harness.git.count("checkout:work"), 1);
    assert_eq!(
        harness.observer.terminal().last(),
        Some(&("verifyBuildOutput".to_string(), "failed"))
    );
}

#[tokio::test]
async fn test_failed_build_command_stops_the_run() {
    let dir = build_output();
    let harness = Harness::new(
        FakeGit::new(),
        remote_with_build(visual_build()),
        ScriptedExecutor::failing("build"),
    );

    let outcome = harness
        .run(Options {
            build_command: Some(vec!["npm".to_string(), "run".to_string(), "build".to_string()]),
            ..options(dir.path())
        })
        .await;

    assert_eq!(outcome.exit_code, storyship_core::GENERIC_FAILURE_EXIT_CODE);
    assert_eq!(harness.remote.call_count(), 0);
}

async fn limited_run(account: Value) -> PipelineOutcome {
    let dir = build_output();
    let mut build = visual_build();
    build["wasLimited"] = json!(true);
    build["app"] = json!({ "account": account });
    let harness = Harness::new(
        FakeGit::new(),
        remote_with_build(build),
        ScriptedExecutor::default(),
    );
    harness.run(options(dir.path())).await
}

#[tokio::test]
async fn test_limited_build_exit_codes() {
    let exceeded = limited_run(json!({"exceededThreshold": true})).await;
    assert_eq!(exceeded.exit_code, 101);
    assert!(exceeded.succeeded());

    let payment = limited_run(json!({"paymentRequired": true})).await;
    assert_eq!(payment.exit_code, 102);

    let unknown = limited_run(json!({})).await;
    assert_eq!(unknown.exit_code, 100);
}

#[tokio::test]
async fn test_publish_only_project_exits_early() {
    let dir = build_output();
    let harness = Harness::new(
        FakeGit::new(),
        remote_with_build(json!({"id": "b", "number": 1})),
        ScriptedExecutor::default(),
    );

    let outcome = harness.run(options(dir.path())).await;

    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.skip_snapshots);
}

#[tokio::test]
async fn test_exit_once_uploaded_branch_glob() {
    let dir = build_output();
    let harness = Harness::new(
        FakeGit::new(),
        remote_with_build(visual_build()),
        ScriptedExecutor::default(),
    );

    let outcome = harness
        .run(Options {
            exit_once_uploaded: storyship_core::ExitOnceUploaded::Branch("feature/*".to_string()),
            ..options(dir.path())
        })
        .await;

    assert!(outcome.skip_snapshots);
}

#[tokio::test]
async fn test_list_only_skips_upload() {
    let dir = build_output();
    let harness = Harness::new(
        FakeGit::new(),
        remote_with_build(visual_build()),
        ScriptedExecutor::default(),
    );

    let outcome = harness
        .run(Options {
            list_only: true,
            ..options(dir.path())
        })
        .await;

    assert!(outcome.succeeded(), "unexpected failure: {:?}", outcome.error);
    assert!(outcome.skip_snapshots);
    assert_eq!(outcome.uploaded_bytes, 0);
    assert!(harness.remote.calls_for(GET_UPLOAD_URLS).is_empty());
    assert!(harness.transport.urls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_url_failure_stops_before_registration() {
    let dir = build_output();
    let remote = Arc::new(FakeRemote::new());
    remote.fail_once(GET_UPLOAD_URLS, "502 Bad Gateway");
    let harness = Harness::new(FakeGit::new(), remote, ScriptedExecutor::default());

    let outcome = harness.run(options(dir.path())).await;

    assert_eq!(outcome.exit_code, storyship_core::GENERIC_FAILURE_EXIT_CODE);
    let error = outcome.error.unwrap();
    assert!(error.contains("502 Bad Gateway"), "{error}");
    assert!(harness.remote.calls_for(CREATE_BUILD).is_empty());
    assert!(outcome.build.is_none());
}
