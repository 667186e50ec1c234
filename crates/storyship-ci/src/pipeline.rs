//! End-to-end publishing pipeline.
//!
//! Tasks run strictly in order over one [`PipelineContext`]:
//! `prepareWorkspace`, `build`, `verifyBuildOutput`, `traceChangedFiles`,
//! `upload`, `createBuild`, `restoreWorkspace`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use storyship_core::{
    emit_restore_failed, Build, ChangeImpactTracer, DependencyResolver, GitFacts, LockfileResolver,
    PipelineContext, PipelineError, RemoteClient, Result, TurboSnapResult, METRICS,
};
use storyship_upload::{UploadConfig, UploadEngine, UploadTransport};
use tracing::{error, info};

use crate::command::{CommandExecutor, CommandSpec};
use crate::registrar::BuildRegistrar;
use crate::runner::{TaskObserver, TaskRunner, TracingObserver};
use crate::task::{Step, Task};
use crate::workspace::WorkspacePreparer;

/// Result of a complete pipeline run.
#[derive(Debug, Serialize)]
pub struct PipelineOutcome {
    /// Process exit code.
    pub exit_code: i32,

    /// Registered build, when registration happened.
    pub build: Option<Build>,

    pub uploaded_bytes: u64,

    pub turbo_snap: Option<TurboSnapResult>,

    /// Whether waiting for snapshots can be skipped.
    pub skip_snapshots: bool,

    /// Message of the error that stopped the run.
    pub error: Option<String>,
}

impl PipelineOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

struct PrepareWorkspace(Arc<WorkspacePreparer>);

#[async_trait]
impl Step<PipelineContext> for PrepareWorkspace {
    fn phase(&self) -> &str {
        "preparing workspace"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        self.0.prepare(ctx).await
    }
}

struct BuildCatalog(Arc<dyn CommandExecutor>);

#[async_trait]
impl Step<PipelineContext> for BuildCatalog {
    fn phase(&self) -> &str {
        "building"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        let options = ctx.options();
        let Some(command) = options.build_command.clone() else {
            return Ok(());
        };
        let mut spec = CommandSpec::new("build", command, options.command_timeout_secs);
        if let Some(log_file) = &options.build_log_file {
            spec = spec.with_log_file(log_file);
        }

        let result = self.0.execute(&spec).await?;
        if !result.passed() {
            return Err(PipelineError::Command(result.summary()));
        }
        info!(duration_ms = result.duration_ms, "catalog built");
        Ok(())
    }
}

struct VerifyBuildOutput(Arc<UploadEngine>);

#[async_trait]
impl Step<PipelineContext> for VerifyBuildOutput {
    fn phase(&self) -> &str {
        "validating build output"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        self.0.validate_files(ctx).await
    }
}

struct TraceChangedFiles(Arc<ChangeImpactTracer>);

#[async_trait]
impl Step<PipelineContext> for TraceChangedFiles {
    fn phase(&self) -> &str {
        "tracing changed files"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        self.0.trace_changed_files(ctx).await.map(|_| ())
    }
}

struct Upload(Arc<UploadEngine>);

#[async_trait]
impl Step<PipelineContext> for Upload {
    fn phase(&self) -> &str {
        "uploading"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        self.0.upload(ctx).await.map(|_| ())
    }
}

struct CreateBuild(Arc<BuildRegistrar>);

#[async_trait]
impl Step<PipelineContext> for CreateBuild {
    fn phase(&self) -> &str {
        "creating build"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        self.0.create_build(ctx).await.map(|_| ())
    }
}

struct RestoreWorkspace(Arc<WorkspacePreparer>);

#[async_trait]
impl Step<PipelineContext> for RestoreWorkspace {
    fn phase(&self) -> &str {
        "restoring workspace"
    }

    async fn run(&self, ctx: &mut PipelineContext) -> Result<()> {
        self.0.restore(ctx).await
    }
}

/// Collaborators of a pipeline run.
pub struct Pipeline {
    preparer: Arc<WorkspacePreparer>,
    tasks: Vec<Task<PipelineContext>>,
    runner: TaskRunner,
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    git: Arc<dyn GitFacts>,
    remote: Arc<dyn RemoteClient>,
    transport: Arc<dyn UploadTransport>,
    executor: Arc<dyn CommandExecutor>,
    resolver: Option<Arc<dyn DependencyResolver>>,
    observer: Arc<dyn TaskObserver>,
    upload_config: UploadConfig,
}

impl PipelineBuilder {
    pub fn resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn TaskObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn upload_config(mut self, config: UploadConfig) -> Self {
        self.upload_config = config;
        self
    }

    pub fn build(self) -> Pipeline {
        let resolver: Arc<dyn DependencyResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(LockfileResolver::new(self.git.clone())),
        };
        let preparer = Arc::new(WorkspacePreparer::new(
            self.git.clone(),
            self.executor.clone(),
        ));
        let engine = Arc::new(UploadEngine::new(
            self.remote.clone(),
            self.transport,
            self.upload_config,
        ));
        let tracer = Arc::new(ChangeImpactTracer::new(self.git, resolver));
        let registrar = Arc::new(BuildRegistrar::new(self.remote));

        let tasks = vec![
            Task::new("prepareWorkspace", "Prepare workspace")
                .skip_when(|ctx: &PipelineContext| {
                    ctx.options()
                        .patch_refs()
                        .is_none()
                        .then(|| "not a patch build".to_string())
                })
                .step(PrepareWorkspace(preparer.clone())),
            Task::new("build", "Build catalog")
                .skip_when(|ctx: &PipelineContext| {
                    ctx.options()
                        .build_command
                        .is_none()
                        .then(|| "using existing build output".to_string())
                })
                .step(BuildCatalog(self.executor)),
            Task::new("verifyBuildOutput", "Verify build output")
                .step(VerifyBuildOutput(engine.clone())),
            Task::new("traceChangedFiles", "Trace changed files")
                .skip_when(|ctx: &PipelineContext| {
                    (!ctx.options().only_changed)
                        .then(|| "tracing changed files is disabled".to_string())
                })
                .step(TraceChangedFiles(tracer)),
            Task::new("upload", "Publish build")
                .skip_when(|ctx: &PipelineContext| {
                    ctx.options().list_only.then(|| "list-only run".to_string())
                })
                .step(Upload(engine)),
            Task::new("createBuild", "Register build")
                .step(CreateBuild(registrar))
                .final_on_success(),
            Task::new("restoreWorkspace", "Restore workspace")
                .skip_when(|ctx: &PipelineContext| {
                    ctx.workspace
                        .is_none()
                        .then(|| "workspace was not changed".to_string())
                })
                .step(RestoreWorkspace(preparer.clone())),
        ];

        Pipeline {
            preparer,
            tasks,
            runner: TaskRunner::new(self.observer),
        }
    }
}

impl Pipeline {
    pub fn builder(
        git: Arc<dyn GitFacts>,
        remote: Arc<dyn RemoteClient>,
        transport: Arc<dyn UploadTransport>,
        executor: Arc<dyn CommandExecutor>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            git,
            remote,
            transport,
            executor,
            resolver: None,
            observer: Arc::new(TracingObserver),
            upload_config: UploadConfig::default(),
        }
    }

    /// Task names in execution order.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Run every task. Failures are folded into the outcome.
    ///
    /// If a task fails after the workspace was checked out, the workspace is
    /// restored before returning; a failing restore is logged and the
    /// original error is kept.
    pub async fn run(&self, mut ctx: PipelineContext) -> PipelineOutcome {
        info!(run_id = %ctx.run_id, "starting pipeline");
        let result = self.run_tasks(&mut ctx).await;

        let error = match result {
            Ok(()) => None,
            Err(e) => {
                if let Err(restore_error) = self.preparer.restore(&mut ctx).await {
                    emit_restore_failed(&restore_error);
                }
                if ctx.exit_code == 0 {
                    ctx.exit_code = e.exit_code();
                }
                error!(
                    exit_code = ctx.exit_code,
                    user_error = e.is_user_error(),
                    error = %e,
                    "pipeline failed"
                );
                Some(e.to_string())
            }
        };

        METRICS.flush();
        PipelineOutcome {
            exit_code: ctx.exit_code,
            build: ctx.build,
            uploaded_bytes: ctx.uploaded_bytes,
            turbo_snap: ctx.turbo_snap,
            skip_snapshots: ctx.skip_snapshots,
            error,
        }
    }

    async fn run_tasks(&self, ctx: &mut PipelineContext) -> Result<()> {
        for task in &self.tasks {
            self.runner.run(task, ctx).await?;
        }
        Ok(())
    }
}
