//! Upload engine: direct per-file uploads or a single archive.
//!
//! Both modes request their targets from the service, stream bytes to the
//! returned signed URLs and record where the build is served from.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use storyship_core::{
    emit_upload_progress, query_field, FileManifest, PipelineContext, PipelineError,
    RemoteClient, Result, UploadPointer, METRICS,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::archive::create_archive;
use crate::config::UploadConfig;
use crate::error::TransferError;
use crate::files;
use crate::transport::{ProgressSink, PutRequest, UploadTransport, IMMUTABLE_CACHE_CONTROL};

pub const GET_UPLOAD_URLS: &str = "GetUploadUrlsMutation";
pub const GET_UPLOAD_URLS_DOCUMENT: &str = r#"
mutation GetUploadUrlsMutation($paths: [String!]!, $hashes: [String]) {
  getUploadUrls(paths: $paths, hashes: $hashes) {
    domain
    urls { path url contentType }
  }
}"#;

pub const GET_ZIP_UPLOAD_URL: &str = "GetZipUploadUrlMutation";
pub const GET_ZIP_UPLOAD_URL_DOCUMENT: &str = r#"
mutation GetZipUploadUrlMutation {
  getZipUploadUrl {
    domain
    url
    sentinelUrl
  }
}"#;

const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Called with `(uploaded, total)` every time cumulative progress grows.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrl {
    path: String,
    url: String,
    content_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UploadUrls {
    domain: String,
    urls: Vec<UploadUrl>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZipUploadUrl {
    domain: String,
    url: String,
    sentinel_url: String,
}

/// Sums per-file progress into one monotonic counter.
///
/// Each file keeps a high-water mark, so a retried file does not count its
/// bytes twice and the total never exceeds the sum of the file sizes.
struct ProgressAggregator {
    marks: Vec<u64>,
    limits: Vec<u64>,
    uploaded: u64,
    total: u64,
    interval: Duration,
    last_log: Option<Instant>,
    on_progress: Option<ProgressCallback>,
}

impl ProgressAggregator {
    fn new(limits: Vec<u64>, interval: Duration, on_progress: Option<ProgressCallback>) -> Self {
        let total = limits.iter().sum();
        Self {
            marks: vec![0; limits.len()],
            limits,
            uploaded: 0,
            total,
            interval,
            last_log: None,
            on_progress,
        }
    }

    fn record(&mut self, index: usize, sent: u64) {
        let (Some(mark), Some(limit)) = (self.marks.get_mut(index), self.limits.get(index)) else {
            return;
        };
        let sent = sent.min(*limit);
        if sent <= *mark {
            return;
        }
        self.uploaded = (self.uploaded + (sent - *mark)).min(self.total);
        *mark = sent;

        if let Some(callback) = &self.on_progress {
            callback(self.uploaded, self.total);
        }
        if self.last_log.map_or(true, |at| at.elapsed() >= self.interval) {
            emit_upload_progress(self.uploaded, self.total);
            self.last_log = Some(Instant::now());
        }
    }

    fn spawn(mut self, mut rx: mpsc::UnboundedReceiver<(usize, u64)>) -> JoinHandle<u64> {
        tokio::spawn(async move {
            while let Some((index, sent)) = rx.recv().await {
                self.record(index, sent);
            }
            self.uploaded
        })
    }
}

/// Validates and uploads a catalog build.
pub struct UploadEngine {
    remote: Arc<dyn RemoteClient>,
    transport: Arc<dyn UploadTransport>,
    config: UploadConfig,
    on_progress: Option<ProgressCallback>,
}

impl UploadEngine {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        transport: Arc<dyn UploadTransport>,
        config: UploadConfig,
    ) -> Self {
        Self {
            remote,
            transport,
            config,
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// See [`files::validate_files`].
    pub async fn validate_files(&self, ctx: &mut PipelineContext) -> Result<()> {
        files::validate_files(ctx).await
    }

    /// Upload the validated build.
    ///
    /// Requires `ctx.file_info`; writes `ctx.upload` and `ctx.uploaded_bytes`.
    pub async fn upload(&self, ctx: &mut PipelineContext) -> Result<u64> {
        let manifest = ctx.require_file_info()?.clone();
        let (pointer, uploaded) = if ctx.options().archive {
            self.upload_archive(&manifest).await?
        } else {
            self.upload_direct(&manifest).await?
        };

        info!(
            isolator_url = %pointer.isolator_url,
            uploaded_bytes = uploaded,
            "upload complete"
        );
        ctx.upload = Some(pointer);
        ctx.uploaded_bytes = uploaded;
        Ok(uploaded)
    }

    async fn upload_direct(&self, manifest: &FileManifest) -> Result<(UploadPointer, u64)> {
        let hashes = manifest.hashes.as_ref().map(|hashes| {
            manifest
                .paths
                .iter()
                .map(|p| hashes.get(p).cloned())
                .collect::<Vec<_>>()
        });
        let targets: UploadUrls = query_field(
            self.remote.as_ref(),
            GET_UPLOAD_URLS,
            "getUploadUrls",
            json!({ "paths": manifest.paths, "hashes": hashes }),
        )
        .await?;

        let mut requests = Vec::with_capacity(targets.urls.len());
        let mut seen = HashSet::with_capacity(targets.urls.len());
        for target in targets.urls {
            if !seen.insert(target.path.clone()) {
                return Err(PipelineError::remote(
                    GET_UPLOAD_URLS,
                    format!("duplicate upload URL for {}", target.path),
                ));
            }
            let content_length = manifest.content_length(&target.path).ok_or_else(|| {
                PipelineError::remote(
                    GET_UPLOAD_URLS,
                    format!("upload URL for unknown path {}", target.path),
                )
            })?;
            requests.push((
                target.path.clone(),
                PutRequest {
                    url: target.url,
                    local_path: manifest.local_path(&target.path),
                    content_type: target.content_type,
                    content_length,
                    cache_control: Some(IMMUTABLE_CACHE_CONTROL.to_string()),
                },
            ));
        }
        if let Some(missing) = manifest.paths.iter().find(|p| !seen.contains(*p)) {
            return Err(PipelineError::remote(
                GET_UPLOAD_URLS,
                format!("no upload URL for {missing}"),
            ));
        }

        let limits = requests.iter().map(|(_, r)| r.content_length).collect();
        let (tx, rx) = mpsc::unbounded_channel();
        let aggregator =
            ProgressAggregator::new(limits, self.config.output_interval, self.on_progress.clone())
                .spawn(rx);

        info!(
            files = requests.len(),
            total_bytes = manifest.total,
            concurrency = self.config.concurrency,
            "uploading build"
        );

        let pending: Vec<_> = requests
            .iter()
            .enumerate()
            .map(|(index, (path, request))| {
                let sink = ProgressSink::new(index, tx.clone());
                self.transfer_with_retry(path, request, sink)
            })
            .collect();
        let mut transfers =
            futures::stream::iter(pending).buffer_unordered(self.config.concurrency.max(1));
        let mut failure = None;
        while let Some(result) = transfers.next().await {
            if let Err(e) = result {
                failure = Some(e);
                break;
            }
        }
        drop(transfers);
        drop(tx);

        let uploaded = aggregator
            .await
            .map_err(|e| PipelineError::Internal(format!("progress aggregator failed: {e}")))?;
        if let Some(e) = failure {
            return Err(e);
        }
        if uploaded != manifest.total {
            return Err(PipelineError::Internal(format!(
                "uploaded {uploaded} of {} bytes",
                manifest.total
            )));
        }

        let entry = manifest.entry_path().unwrap_or("index.html");
        let pointer = UploadPointer {
            isolator_url: join_url(&targets.domain, entry),
            domain: targets.domain,
        };
        Ok((pointer, uploaded))
    }

    async fn upload_archive(&self, manifest: &FileManifest) -> Result<(UploadPointer, u64)> {
        let archive = create_archive(manifest)
            .await
            .map_err(|e| transfer_failed("archive", 1, e))?;
        debug!(
            files = manifest.len(),
            original_bytes = manifest.total,
            archive_bytes = archive.size,
            "created archive"
        );

        let target: ZipUploadUrl = query_field(
            self.remote.as_ref(),
            GET_ZIP_UPLOAD_URL,
            "getZipUploadUrl",
            json!({}),
        )
        .await?;

        let request = PutRequest {
            url: target.url,
            local_path: archive.path().to_path_buf(),
            content_type: ZIP_CONTENT_TYPE.to_string(),
            content_length: archive.size,
            cache_control: None,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let aggregator = ProgressAggregator::new(
            vec![archive.size],
            self.config.output_interval,
            self.on_progress.clone(),
        )
        .spawn(rx);
        let sink = ProgressSink::new(0, tx);
        let transferred = self.transfer_with_retry("archive", &request, sink).await;
        let uploaded = aggregator
            .await
            .map_err(|e| PipelineError::Internal(format!("progress aggregator failed: {e}")))?;
        transferred?;

        self.await_sentinel(&target.sentinel_url).await?;

        let entry = manifest.entry_path().unwrap_or("index.html");
        let pointer = UploadPointer {
            isolator_url: join_url(&target.domain, entry),
            domain: target.domain,
        };
        Ok((pointer, uploaded))
    }

    /// Transfer one file, retrying up to the configured budget.
    async fn transfer_with_retry(
        &self,
        path: &str,
        request: &PutRequest,
        sink: ProgressSink,
    ) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.transport.put_file(request, sink.clone()).await {
                Ok(()) => {
                    sink.report(request.content_length);
                    METRICS.inc_file_uploaded(request.content_length);
                    debug!(path = %path, attempt, "transferred");
                    return Ok(());
                }
                Err(e) if attempt > self.config.retries => {
                    return Err(transfer_failed(path, attempt, e));
                }
                Err(e) => {
                    METRICS.inc_transfer_retries();
                    warn!(path = %path, attempt, error = %e, "transfer failed, retrying");
                    tokio::time::sleep(self.config.backoff * attempt).await;
                }
            }
        }
    }

    /// Poll the sentinel URL until the service confirms the archive.
    async fn await_sentinel(&self, url: &str) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = match self.transport.check(url).await {
                Ok(true) => return Ok(()),
                Ok(false) => "archive not yet confirmed".to_string(),
                Err(e) => e.to_string(),
            };
            if attempt > self.config.retries {
                return Err(PipelineError::TransferFailed {
                    path: "sentinel".to_string(),
                    attempts: attempt,
                    reason: outcome,
                });
            }
            debug!(attempt, reason = %outcome, "waiting for archive confirmation");
            tokio::time::sleep(self.config.backoff * attempt).await;
        }
    }
}

fn transfer_failed(path: &str, attempts: u32, error: TransferError) -> PipelineError {
    PipelineError::TransferFailed {
        path: path.to_string(),
        attempts,
        reason: error.to_string(),
    }
}

fn join_url(domain: &str, path: &str) -> String {
    format!("{}/{}", domain.trim_end_matches('/'), path.trim_start_matches('/'))
}
