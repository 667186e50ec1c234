//! Storyship Upload: build validation and artifact transfer
//!
//! This crate moves a validated catalog build to the visual-testing
//! service's storage.
//!
//! ## Modes
//!
//! - Direct: one signed URL per file, transferred concurrently with
//!   per-file retries and aggregated progress.
//! - Archive: a single zip archive confirmed through a sentinel URL.

pub mod archive;
pub mod config;
pub mod engine;
pub mod error;
pub mod files;
pub mod http;
pub mod transport;

pub use archive::{create_archive, Archive};
pub use config::{RemoteConfig, UploadConfig};
pub use engine::{
    ProgressCallback, UploadEngine, GET_UPLOAD_URLS, GET_UPLOAD_URLS_DOCUMENT, GET_ZIP_UPLOAD_URL,
    GET_ZIP_UPLOAD_URL_DOCUMENT,
};
pub use error::TransferError;
pub use files::{hash_files, list_files, output_dir_hint, validate_files};
pub use http::HttpRemoteClient;
pub use transport::{file_chunks, HttpTransport, ProgressSink, PutRequest, UploadTransport};
