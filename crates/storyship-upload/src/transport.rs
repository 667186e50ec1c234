//! Signed-URL transport: streamed `PUT` of local files and sentinel checks.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::TransferError;

/// Cache policy for immutable build assets.
pub const IMMUTABLE_CACHE_CONTROL: &str = "max-age=31536000";

/// One file to `PUT` to a signed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    pub url: String,
    pub local_path: PathBuf,
    pub content_type: String,
    /// Exact byte count sent as `content-length`.
    pub content_length: u64,
    pub cache_control: Option<String>,
}

/// Reports bytes sent for one file of an upload.
///
/// Values are the running byte count of the current attempt; a retry starts
/// again from zero.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    index: usize,
    tx: Option<mpsc::UnboundedSender<(usize, u64)>>,
}

impl ProgressSink {
    pub(crate) fn new(index: usize, tx: mpsc::UnboundedSender<(usize, u64)>) -> Self {
        Self {
            index,
            tx: Some(tx),
        }
    }

    /// A sink that drops every report.
    pub fn discard() -> Self {
        Self {
            index: 0,
            tx: None,
        }
    }

    pub fn report(&self, sent: u64) {
        if let Some(tx) = &self.tx {
            // The aggregator only goes away once every transfer finished.
            let _ = tx.send((self.index, sent));
        }
    }
}

/// Transport used by the upload engine.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Stream `request.local_path` to `request.url`, reporting progress per chunk.
    async fn put_file(&self, request: &PutRequest, progress: ProgressSink)
        -> Result<(), TransferError>;

    /// `GET` a URL; `true` when it answers with a success status.
    async fn check(&self, url: &str) -> Result<bool, TransferError>;
}

async fn read_chunk(file: &mut tokio::fs::File, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Stream a file in `chunk_size` pieces, reporting the running total after
/// each piece is handed out.
pub fn file_chunks(
    file: tokio::fs::File,
    chunk_size: usize,
    progress: ProgressSink,
) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static {
    let chunk_size = chunk_size.max(1);
    futures::stream::try_unfold(
        (file, 0u64, progress),
        move |(mut file, sent, progress)| async move {
            let chunk = read_chunk(&mut file, chunk_size).await?;
            if chunk.is_empty() {
                return Ok(None);
            }
            let sent = sent + chunk.len() as u64;
            progress.report(sent);
            Ok(Some((chunk, (file, sent, progress))))
        },
    )
}

/// `reqwest` backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    chunk_size: usize,
}

impl HttpTransport {
    pub fn new(chunk_size: usize, timeout: Duration) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("storyship/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client, chunk_size })
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn put_file(
        &self,
        request: &PutRequest,
        progress: ProgressSink,
    ) -> Result<(), TransferError> {
        let file = tokio::fs::File::open(&request.local_path).await?;
        let body = reqwest::Body::wrap_stream(file_chunks(file, self.chunk_size, progress));

        let mut builder = self
            .client
            .put(&request.url)
            .header(CONTENT_TYPE, &request.content_type)
            .header(CONTENT_LENGTH, request.content_length);
        if let Some(cache_control) = &request.cache_control {
            builder = builder.header(CACHE_CONTROL, cache_control);
        }

        let response = builder.body(body).send().await?;
        let status = response.status();
        debug!(url = %request.url, status = %status, "put finished");
        if !status.is_success() {
            return Err(TransferError::Status(status.as_u16()));
        }
        Ok(())
    }

    async fn check(&self, url: &str) -> Result<bool, TransferError> {
        let response = self.client.get(url).send().await?;
        Ok(response.status().is_success())
    }
}
