//! Upload sources: files on disk or bytes already in memory.

use std::ops::Range;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use relaycrypt_core::path::validate_relative_path;
use relaycrypt_core::{TransferError, TransferResult};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

#[derive(Debug, Clone)]
pub enum UploadSource {
    Path(PathBuf),
    Bytes(Bytes),
}

/// One file selected for upload, under the relative path the receiver sees.
#[derive(Debug, Clone)]
pub struct UploadFile {
    relative_path: String,
    source: UploadSource,
}

impl UploadFile {
    pub fn from_path(relative_path: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
            source: UploadSource::Path(path.into()),
        }
    }

    pub fn from_bytes(relative_path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            relative_path: relative_path.into(),
            source: UploadSource::Bytes(data.into()),
        }
    }

    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    pub fn source(&self) -> &UploadSource {
        &self.source
    }

    pub async fn size(&self) -> TransferResult<u64> {
        match &self.source {
            UploadSource::Bytes(data) => Ok(data.len() as u64),
            UploadSource::Path(path) => Ok(tokio::fs::metadata(path).await?.len()),
        }
    }

    /// Read exactly `range` of the plaintext.
    pub(crate) async fn read_range(&self, range: Range<u64>) -> TransferResult<Vec<u8>> {
        match &self.source {
            UploadSource::Bytes(data) => data
                .get(range.start as usize..range.end as usize)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| short_source(&self.relative_path, &range)),
            UploadSource::Path(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(range.start)).await?;
                let mut buf = vec![0u8; (range.end - range.start) as usize];
                file.read_exact(&mut buf).await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::UnexpectedEof {
                        short_source(&self.relative_path, &range)
                    } else {
                        e.into()
                    }
                })?;
                Ok(buf)
            }
        }
    }
}

fn short_source(relative_path: &str, range: &Range<u64>) -> TransferError {
    TransferError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!(
            "{relative_path} shrank during upload (wanted bytes {}..{})",
            range.start, range.end
        ),
    ))
}

/// Expand `root` into upload files.
///
/// A plain file uploads under its file name. A directory is walked
/// recursively and each file keeps its path relative to the directory's
/// parent, so `photos/2024/a.jpg` arrives as `photos/2024/a.jpg`.
pub fn collect_files(root: &Path) -> TransferResult<Vec<UploadFile>> {
    let meta = std::fs::metadata(root)?;
    let name = root
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransferError::InvalidPath {
            path: root.display().to_string(),
            reason: "no usable file name".into(),
        })?;

    let mut files = Vec::new();
    if meta.is_dir() {
        collect_dir(root, name, &mut files)?;
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    } else {
        files.push(UploadFile::from_path(name, root));
    }
    for file in &files {
        validate_relative_path(&file.relative_path)?;
    }
    Ok(files)
}

fn collect_dir(dir: &Path, prefix: &str, out: &mut Vec<UploadFile>) -> TransferResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!(path = %path.display(), "skipping non-UTF-8 file name");
            continue;
        };
        let relative = format!("{prefix}/{name}");
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_dir(&path, &relative, out)?;
        } else if file_type.is_file() {
            out.push(UploadFile::from_path(relative, path));
        }
    }
    Ok(())
}
