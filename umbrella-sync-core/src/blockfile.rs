//! Local blocklist files: one indicator per line.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SyncError;

/// A blocklist read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFile {
    pub path: PathBuf,
    /// File stem; used to find the matching remote list.
    pub name: String,
    pub entries: Vec<String>,
}

impl BlockFile {
    /// Read and split `path`. The file must be UTF-8.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let file = Self::from_contents(path, &contents);
        debug!(file = %path.display(), entries = file.entries.len(), "[SYNC] Read blocklist file");
        Ok(file)
    }

    pub fn from_contents(path: impl AsRef<Path>, contents: &str) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            entries: to_lines(contents),
            name,
            path,
        }
    }
}

/// Split on newlines, dropping `\r` line endings, surrounding whitespace and blank lines.
pub fn to_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
