//! Build registration and exit-code policy.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use storyship_core::{
    emit_build_created, query_field, Build, PipelineContext, RemoteClient, Result, TurboSnapResult,
};
use tracing::{info, warn};

pub const CREATE_BUILD: &str = "CreateBuildMutation";
pub const CREATE_BUILD_DOCUMENT: &str = r#"
mutation CreateBuildMutation($input: CreateBuildInput!) {
  createBuild(input: $input) {
    id
    number
    specCount
    tests { id status }
    wasLimited
    app { account { exceededThreshold paymentRequired } }
    features { uiTests uiReview }
    webUrl
  }
}"#;

/// Registers the uploaded build with the service.
pub struct BuildRegistrar {
    remote: Arc<dyn RemoteClient>,
}

impl BuildRegistrar {
    pub fn new(remote: Arc<dyn RemoteClient>) -> Self {
        Self { remote }
    }

    /// Create the build record and decide the exit code.
    ///
    /// Requires `ctx.upload` unless the run is list-only. Writes `ctx.build`,
    /// `ctx.exit_code` and `ctx.skip_snapshots`.
    pub async fn create_build(&self, ctx: &mut PipelineContext) -> Result<Build> {
        let input = build_input(ctx)?;
        let build: Build = query_field(
            self.remote.as_ref(),
            CREATE_BUILD,
            "createBuild",
            json!({ "input": input }),
        )
        .await?;
        emit_build_created(&build.id, build.number, build.spec_count);

        if let Some(reason) = build.limit_reason() {
            warn!(build = build.number, reason = ?reason, "{}", reason.message());
            ctx.exit_code = reason.exit_code();
        }

        let options = ctx.options();
        let early_exit = if options.list_only {
            Some("list-only run")
        } else if !build.has_visual_features() {
            Some("publish-only project")
        } else if options.exit_once_uploaded.applies_to(&ctx.git.branch)? {
            Some("exit once uploaded")
        } else {
            None
        };
        if let Some(why) = early_exit {
            info!(build = build.number, reason = why, "not waiting for snapshots");
            ctx.exit_code = 0;
            ctx.skip_snapshots = true;
        }

        ctx.build = Some(build.clone());
        Ok(build)
    }
}

fn build_input(ctx: &PipelineContext) -> Result<Value> {
    let options = ctx.options();
    let mut input = Map::new();
    input.insert("branch".into(), json!(ctx.git.branch));
    input.insert("commit".into(), json!(ctx.git.commit));
    if let Some(committed_at) = options.committed_at {
        input.insert("committedAt".into(), json!(committed_at.timestamp_millis()));
    }
    if let Some(author) = &options.author {
        input.insert("author".into(), json!(author));
    }
    if let Some((head, base)) = options.patch_refs() {
        input.insert("patchHeadRef".into(), json!(head));
        input.insert("patchBaseRef".into(), json!(base));
    }
    input.insert("listOnly".into(), json!(options.list_only));

    match &ctx.turbo_snap {
        Some(TurboSnapResult::Traced {
            affected_story_files,
        }) => {
            input.insert("onlyStoryFiles".into(), json!(affected_story_files));
        }
        Some(TurboSnapResult::Bailed { bail_reason }) => {
            input.insert("turboSnapBailReason".into(), json!(bail_reason.to_string()));
        }
        None => {}
    }

    let upload = if options.list_only {
        ctx.upload.as_ref()
    } else {
        Some(ctx.require_upload()?)
    };
    if let Some(upload) = upload {
        input.insert("isolatorUrl".into(), json!(upload.isolator_url));
        input.insert("uploadedBytes".into(), json!(ctx.uploaded_bytes));
    }

    Ok(Value::Object(input))
}
