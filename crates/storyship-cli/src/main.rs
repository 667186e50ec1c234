//! Storyship CLI - publish a catalog build for visual testing
//!
//! The `storyship` command turns flags and environment variables into
//! pipeline options, wires the real collaborators and exits with the code
//! the pipeline decided.
//!
//! ## Commands
//!
//! - `publish`: prepare, build, trace, upload and register a build
//! - `options`: print the resolved options as JSON

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};

use storyship_ci::{Pipeline, PipelineOutcome, ProcessExecutor, CREATE_BUILD, CREATE_BUILD_DOCUMENT};
use storyship_core::{ExitOnceUploaded, GitCli, Options, PipelineContext, PipelineSpan};
use storyship_upload::{
    HttpRemoteClient, HttpTransport, RemoteConfig, UploadConfig, GET_UPLOAD_URLS,
    GET_UPLOAD_URLS_DOCUMENT, GET_ZIP_UPLOAD_URL, GET_ZIP_UPLOAD_URL_DOCUMENT,
};

#[derive(Parser)]
#[command(name = "storyship")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Publish Storybook builds for visual testing", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, upload and register a catalog build
    Publish(PublishArgs),

    /// Print the options a publish run would use, as JSON
    Options(PublishArgs),
}

#[derive(Args, Debug)]
struct PublishArgs {
    /// JSON options file; flags override its values
    #[arg(long, env = "STORYSHIP_CONFIG")]
    config: Option<PathBuf>,

    /// Repository git facts are read from
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Static build output directory
    #[arg(short = 'd', long, env = "STORYSHIP_BUILD_DIR")]
    build_dir: Option<PathBuf>,

    /// Log file of the catalog build
    #[arg(long, env = "STORYSHIP_BUILD_LOG_FILE")]
    build_log_file: Option<PathBuf>,

    /// Catalog build command, e.g. "npm run build-storybook"
    #[arg(long, env = "STORYSHIP_BUILD_COMMAND")]
    build_command: Option<String>,

    /// Dependency install command run after checking out the merge base
    #[arg(long, env = "STORYSHIP_INSTALL_COMMAND")]
    install_command: Option<String>,

    /// Head ref of a patch build
    #[arg(long, env = "STORYSHIP_PATCH_HEAD_REF", requires = "patch_base_ref")]
    patch_head_ref: Option<String>,

    /// Base ref of a patch build
    #[arg(long, env = "STORYSHIP_PATCH_BASE_REF", requires = "patch_head_ref")]
    patch_base_ref: Option<String>,

    /// Ref changed files are compared against
    #[arg(long, env = "STORYSHIP_BASE_REF")]
    base_ref: Option<String>,

    /// Only test stories affected by changed files
    #[arg(long, env = "STORYSHIP_ONLY_CHANGED")]
    only_changed: bool,

    /// Name of the dependency stats file in the build directory
    #[arg(long, env = "STORYSHIP_STATS_FILE")]
    stats_file: Option<String>,

    /// Catalog project directory relative to the repository root
    #[arg(long, env = "STORYSHIP_STATS_BASE_DIR")]
    stats_base_dir: Option<String>,

    /// Glob of changed files to ignore (repeatable)
    #[arg(long = "untraced", value_name = "GLOB")]
    untraced: Vec<String>,

    /// Glob of static files outside the module graph (repeatable)
    #[arg(long = "externals", value_name = "GLOB")]
    externals: Vec<String>,

    /// Upload the build as a single zip archive
    #[arg(long, env = "STORYSHIP_ARCHIVE")]
    archive: bool,

    /// Register the build for listing only
    #[arg(long, env = "STORYSHIP_LIST")]
    list: bool,

    /// Finish once uploaded, optionally only on branches matching a glob
    #[arg(long, value_name = "BRANCH_GLOB", num_args = 0..=1)]
    exit_once_uploaded: Option<Option<String>>,

    /// Send a content hash with every file
    #[arg(long, env = "STORYSHIP_FILE_HASHING")]
    file_hashing: bool,

    /// Timeout for install and build commands in seconds
    #[arg(long, env = "STORYSHIP_COMMAND_TIMEOUT")]
    command_timeout: Option<u64>,

    /// Branch being published
    #[arg(long, env = "STORYSHIP_BRANCH")]
    branch: Option<String>,

    /// Commit being published
    #[arg(long, env = "STORYSHIP_COMMIT")]
    commit: Option<String>,

    /// Commit timestamp (RFC 3339)
    #[arg(long, env = "STORYSHIP_COMMITTED_AT", value_parser = parse_timestamp)]
    committed_at: Option<DateTime<Utc>>,

    /// Commit author
    #[arg(long, env = "STORYSHIP_AUTHOR")]
    author: Option<String>,
}

fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{value}': {e}"))
}

fn split_command(command: &str) -> Option<Vec<String>> {
    let words: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    (!words.is_empty()).then_some(words)
}

impl PublishArgs {
    /// Resolve options: defaults, then the config file, then flags.
    fn resolve(&self) -> Result<Options> {
        let mut options = match &self.config {
            Some(path) => load_options(path)?,
            None => Options::default(),
        };

        if let Some(dir) = &self.build_dir {
            options.build_dir = dir.clone();
        }
        if let Some(log) = &self.build_log_file {
            options.build_log_file = Some(log.clone());
        }
        if let Some(command) = &self.build_command {
            options.build_command = split_command(command);
        }
        if let Some(command) = &self.install_command {
            options.install_command = split_command(command);
        }
        if self.patch_head_ref.is_some() {
            options.patch_head_ref = self.patch_head_ref.clone();
            options.patch_base_ref = self.patch_base_ref.clone();
        }
        if let Some(base_ref) = &self.base_ref {
            options.base_ref = base_ref.clone();
        }
        if let Some(stats_file) = &self.stats_file {
            options.stats_file = stats_file.clone();
        }
        if self.stats_base_dir.is_some() {
            options.stats_base_dir = self.stats_base_dir.clone();
        }
        options.untraced.extend(self.untraced.iter().cloned());
        options.externals.extend(self.externals.iter().cloned());
        options.only_changed |= self.only_changed;
        options.archive |= self.archive;
        options.list_only |= self.list;
        options.file_hashing |= self.file_hashing;
        match &self.exit_once_uploaded {
            Some(Some(glob)) => options.exit_once_uploaded = ExitOnceUploaded::Branch(glob.clone()),
            Some(None) => options.exit_once_uploaded = ExitOnceUploaded::Flag(true),
            None => {}
        }
        if let Some(timeout) = self.command_timeout {
            options.command_timeout_secs = timeout;
        }
        if let Some(branch) = &self.branch {
            options.branch = branch.clone();
        }
        if let Some(commit) = &self.commit {
            options.commit = commit.clone();
        }
        if self.committed_at.is_some() {
            options.committed_at = self.committed_at;
        }
        if self.author.is_some() {
            options.author = self.author.clone();
        }

        Ok(options)
    }
}

fn load_options(path: &Path) -> Result<Options> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read options file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse options file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    storyship_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Publish(args) => {
            let outcome = cmd_publish(&args).await?;
            std::process::exit(outcome.exit_code);
        }
        Commands::Options(args) => cmd_options(&args),
    }
}

/// Run the publishing pipeline with real collaborators
async fn cmd_publish(args: &PublishArgs) -> Result<PipelineOutcome> {
    let options = args.resolve()?;
    let upload_config = UploadConfig::from_env();
    let remote_config = RemoteConfig::from_env();
    if remote_config.project_token.is_none() {
        anyhow::bail!("STORYSHIP_PROJECT_TOKEN is not set");
    }
    let timeout = remote_config.timeout;

    let git = Arc::new(GitCli::new(&args.repo));
    let remote = Arc::new(
        HttpRemoteClient::new(remote_config)
            .context("Failed to create API client")?
            .with_operation(GET_UPLOAD_URLS, GET_UPLOAD_URLS_DOCUMENT)
            .with_operation(GET_ZIP_UPLOAD_URL, GET_ZIP_UPLOAD_URL_DOCUMENT)
            .with_operation(CREATE_BUILD, CREATE_BUILD_DOCUMENT),
    );
    let transport = Arc::new(
        HttpTransport::new(upload_config.chunk_size, upload_timeout(timeout))
            .context("Failed to create upload client")?,
    );
    let executor = Arc::new(ProcessExecutor);

    let pipeline = Pipeline::builder(git, remote, transport, executor)
        .upload_config(upload_config)
        .build();

    let ctx = PipelineContext::new(options);
    let run_id = ctx.run_id.to_string();
    let outcome = {
        let _span = PipelineSpan::enter(&run_id);
        pipeline.run(ctx).await
    };

    print_outcome(&outcome);
    Ok(outcome)
}

/// Timeout for one streamed file transfer.
fn upload_timeout(api_timeout: Duration) -> Duration {
    api_timeout * 10
}

fn print_outcome(outcome: &PipelineOutcome) {
    if let Some(build) = &outcome.build {
        println!("Build {} ({} stories)", build.number, build.spec_count);
        if let Some(url) = &build.web_url {
            println!("View it at {url}");
        }
    }
    if outcome.uploaded_bytes > 0 {
        println!("Uploaded {} bytes", outcome.uploaded_bytes);
    }
    if outcome.skip_snapshots {
        println!("Not waiting for snapshots");
    }
    match &outcome.error {
        Some(error) => eprintln!("✗ {error}"),
        None => info!(exit_code = outcome.exit_code, "publish finished"),
    }
}

/// Print the resolved options
fn cmd_options(args: &PublishArgs) -> Result<()> {
    let options = args.resolve()?;
    println!("{}", serde_json::to_string_pretty(&options)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> PublishArgs {
        let mut argv = vec!["storyship", "publish"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Publish(args) => args,
            Commands::Options(_) => panic!("expected publish"),
        }
    }

    #[test]
    fn test_flags_override_defaults() {
        let options = parse(&[
            "--build-dir",
            "out",
            "--build-command",
            "npm run build-storybook",
            "--only-changed",
            "--untraced",
            "docs/**",
            "--branch",
            "feature/x",
        ])
        .resolve()
        .unwrap();

        assert_eq!(options.build_dir, PathBuf::from("out"));
        assert_eq!(
            options.build_command,
            Some(vec![
                "npm".to_string(),
                "run".to_string(),
                "build-storybook".to_string()
            ])
        );
        assert!(options.only_changed);
        assert_eq!(options.untraced, vec!["docs/**"]);
        assert_eq!(options.branch, "feature/x");
        assert_eq!(options.stats_file, "preview-stats.json");
    }

    #[test]
    fn test_exit_once_uploaded_forms() {
        let bare = parse(&["--exit-once-uploaded"]).resolve().unwrap();
        assert_eq!(bare.exit_once_uploaded, ExitOnceUploaded::Flag(true));

        let glob = parse(&["--exit-once-uploaded", "release/*"])
            .resolve()
            .unwrap();
        assert_eq!(
            glob.exit_once_uploaded,
            ExitOnceUploaded::Branch("release/*".to_string())
        );

        let absent = parse(&[]).resolve().unwrap();
        assert_eq!(absent.exit_once_uploaded, ExitOnceUploaded::Flag(false));
    }

    #[test]
    fn test_patch_refs_require_each_other() {
        let result = Cli::try_parse_from(["storyship", "publish", "--patch-head-ref", "feature"]);
        assert!(result.is_err());

        let options = parse(&["--patch-head-ref", "feature", "--patch-base-ref", "main"])
            .resolve()
            .unwrap();
        assert_eq!(options.patch_refs(), Some(("feature", "main")));
    }

    #[test]
    fn test_config_file_is_overridden_by_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storyship.json");
        std::fs::write(
            &path,
            r#"{"buildDir": "from-file", "archive": true, "exitOnceUploaded": "main"}"#,
        )
        .unwrap();

        let options = parse(&["--config", path.to_str().unwrap(), "--build-dir", "from-flag"])
            .resolve()
            .unwrap();

        assert_eq!(options.build_dir, PathBuf::from("from-flag"));
        assert!(options.archive);
        assert_eq!(
            options.exit_once_uploaded,
            ExitOnceUploaded::Branch("main".to_string())
        );
    }

    #[test]
    fn test_invalid_timestamp_is_rejected() {
        assert!(parse_timestamp("yesterday").is_err());
        let parsed = parse_timestamp("2024-03-01T12:00:00Z").unwrap();
        assert_eq!(parsed.timestamp(), 1_709_294_400);
    }

    #[test]
    fn test_blank_command_is_ignored() {
        assert_eq!(split_command("   "), None);
    }
}
