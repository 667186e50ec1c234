//! Build output discovery and validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use storyship_core::{FileManifest, PipelineContext, PipelineError, Result};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

const OUTPUT_DIRECTORY_MARKER: &str = "Output directory:";

/// List every file below `dir`, recursively, sized in bytes.
///
/// Paths are relative and `/`-separated; directories themselves are not
/// listed. Files of a directory come before those of its subdirectories,
/// each in name order.
pub async fn list_files(dir: &Path) -> std::io::Result<FileManifest> {
    let mut manifest = FileManifest::new(dir);
    let mut pending: Vec<(PathBuf, String)> = vec![(dir.to_path_buf(), String::new())];

    while let Some((current, prefix)) = pending.pop() {
        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = reader.next_entry().await? {
            entries.push(entry);
        }
        entries.sort_by_key(|e| e.file_name());

        let mut subdirs = Vec::new();
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            let metadata = tokio::fs::metadata(entry.path()).await?;
            if metadata.is_dir() {
                subdirs.push((entry.path(), relative));
            } else {
                manifest.push(relative, metadata.len());
            }
        }
        pending.extend(subdirs.into_iter().rev());
    }

    Ok(manifest)
}

/// Find the last `Output directory: <path>` line of a build log.
pub async fn output_dir_hint(log_file: &Path) -> Option<PathBuf> {
    let log = match tokio::fs::read_to_string(log_file).await {
        Ok(log) => log,
        Err(e) => {
            debug!(path = %log_file.display(), error = %e, "no build log to inspect");
            return None;
        }
    };
    log.lines()
        .filter_map(|line| line.split_once(OUTPUT_DIRECTORY_MARKER))
        .map(|(_, dir)| dir.trim())
        .filter(|dir| !dir.is_empty())
        .last()
        .map(PathBuf::from)
}

/// SHA-256 of every manifest file, hex encoded.
pub async fn hash_files(manifest: &FileManifest) -> std::io::Result<BTreeMap<String, String>> {
    let mut hashes = BTreeMap::new();
    let mut buf = vec![0u8; 64 * 1024];
    for path in &manifest.paths {
        let mut file = tokio::fs::File::open(manifest.local_path(path)).await?;
        let mut hasher = Sha256::new();
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        hashes.insert(path.clone(), hex::encode(hasher.finalize()));
    }
    Ok(hashes)
}

async fn scan(dir: &Path) -> Option<FileManifest> {
    match list_files(dir).await {
        Ok(manifest) if manifest.is_valid() => Some(manifest),
        Ok(manifest) => {
            debug!(dir = %dir.display(), files = manifest.len(), "required entry files missing");
            None
        }
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "cannot list build output");
            None
        }
    }
}

/// Validate the build output and store its manifest in `ctx.file_info`.
///
/// When `index.html` or `iframe.html` is missing, the build log is checked
/// for a relocated output directory and validation is retried once there.
/// Updates `ctx.source_dir` when the hint was followed.
pub async fn validate_files(ctx: &mut PipelineContext) -> Result<()> {
    let mut manifest = scan(&ctx.source_dir).await;

    if manifest.is_none() {
        let hint = match &ctx.options().build_log_file {
            Some(log) => output_dir_hint(log).await,
            None => None,
        };
        if let Some(dir) = hint.filter(|dir| *dir != ctx.source_dir) {
            warn!(
                expected = %ctx.source_dir.display(),
                actual = %dir.display(),
                "build log reports a different output directory, retrying there"
            );
            ctx.source_dir = dir;
            manifest = scan(&ctx.source_dir).await;
        }
    }

    let Some(mut manifest) = manifest else {
        return Err(PipelineError::InvalidBuild {
            dir: ctx.source_dir.clone(),
        });
    };

    if ctx.options().file_hashing {
        manifest.hashes = Some(hash_files(&manifest).await?);
    }

    info!(
        dir = %ctx.source_dir.display(),
        files = manifest.len(),
        total_bytes = manifest.total,
        "validated build output"
    );
    ctx.file_info = Some(manifest);
    Ok(())
}
