//! Single-file zip archive of a build manifest.

use std::fs::File;
use std::io::{self, Write};

use storyship_core::FileManifest;
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::TransferError;

/// A zip archive on disk, removed when dropped.
#[derive(Debug)]
pub struct Archive {
    file: NamedTempFile,
    /// Size of the archive file in bytes.
    pub size: u64,
}

impl Archive {
    pub fn path(&self) -> &std::path::Path {
        self.file.path()
    }
}

fn write_archive(manifest: &FileManifest) -> Result<Archive, TransferError> {
    let file = tempfile::Builder::new()
        .prefix("storyship-")
        .suffix(".zip")
        .tempfile()?;

    let mut writer = ZipWriter::new(file.reopen()?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for path in &manifest.paths {
        writer.start_file(path.as_str(), options)?;
        let mut source = File::open(manifest.local_path(path))?;
        io::copy(&mut source, &mut writer)?;
    }
    let mut inner = writer.finish()?;
    inner.flush()?;

    let size = file.as_file().metadata()?.len();
    Ok(Archive { file, size })
}

/// Compress every manifest file into a temporary zip archive.
pub async fn create_archive(manifest: &FileManifest) -> Result<Archive, TransferError> {
    let manifest = manifest.clone();
    tokio::task::spawn_blocking(move || write_archive(&manifest))
        .await
        .map_err(|e| TransferError::Archive(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[tokio::test]
    async fn test_archive_contains_every_manifest_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("index.html"), b"<html>index</html>").unwrap();
        std::fs::write(dir.path().join("assets/main.js"), b"export default 1;").unwrap();

        let mut manifest = FileManifest::new(dir.path());
        manifest.push("index.html", 18);
        manifest.push("assets/main.js", 17);

        let archive = create_archive(&manifest).await.unwrap();
        assert_eq!(
            archive.size,
            std::fs::metadata(archive.path()).unwrap().len()
        );

        let mut zip = zip::ZipArchive::new(File::open(archive.path()).unwrap()).unwrap();
        assert_eq!(zip.len(), 2);
        let mut content = String::new();
        zip.by_name("assets/main.js")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "export default 1;");
    }
}
