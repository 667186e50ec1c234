//! File manifest of a static catalog build.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Entry points every valid catalog build carries at its root.
pub const REQUIRED_ENTRY_FILES: [&str; 2] = ["index.html", "iframe.html"];

/// Size and uploaded name of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLength {
    pub known_as: String,
    pub content_length: u64,
}

/// Files discovered under the build output root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileManifest {
    /// Directory the paths are relative to.
    pub source_dir: PathBuf,

    /// Relative `/`-separated paths in discovery order.
    pub paths: Vec<String>,

    pub lengths: BTreeMap<String, FileLength>,

    /// Sum of every content length.
    pub total: u64,

    /// SHA-256 hex digests by path, when file hashing is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashes: Option<BTreeMap<String, String>>,
}

impl FileManifest {
    /// Create an empty manifest rooted at `source_dir`.
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            paths: Vec::new(),
            lengths: BTreeMap::new(),
            total: 0,
            hashes: None,
        }
    }

    /// Record a file. Re-adding a path replaces its length.
    pub fn push(&mut self, path: impl Into<String>, content_length: u64) {
        let path = path.into();
        let entry = FileLength {
            known_as: path.clone(),
            content_length,
        };
        match self.lengths.insert(path.clone(), entry) {
            Some(previous) => self.total -= previous.content_length,
            None => self.paths.push(path),
        }
        self.total += content_length;
    }

    /// Whether every required entry file is present and the bookkeeping agrees.
    pub fn is_valid(&self) -> bool {
        self.paths.len() == self.lengths.len()
            && REQUIRED_ENTRY_FILES
                .iter()
                .all(|required| self.lengths.contains_key(*required))
    }

    /// Byte length of `path`, if present.
    pub fn content_length(&self, path: &str) -> Option<u64> {
        self.lengths.get(path).map(|l| l.content_length)
    }

    /// Absolute location of a manifest path on disk.
    pub fn local_path(&self, path: &str) -> PathBuf {
        path.split('/')
            .fold(self.source_dir.clone(), |acc, part| acc.join(part))
    }

    /// Path the isolator URL points at: `index.html`, else the first file.
    pub fn entry_path(&self) -> Option<&str> {
        if self.lengths.contains_key("index.html") {
            Some("index.html")
        } else {
            self.paths.first().map(String::as_str)
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }
}
