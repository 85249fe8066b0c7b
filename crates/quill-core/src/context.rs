//! Source files handed to the model as task context.

use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};

/// One source file. Immutable once built.
///
/// A `File` without content carries only metadata, which is enough to
/// apply size limits before anything is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    path: PathBuf,
    content: Option<String>,
    size: u64,
}

impl File {
    /// Metadata-only file from the filesystem.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        if !metadata.is_file() {
            anyhow::bail!("{} is not a regular file", path.display());
        }
        Ok(Self {
            path,
            content: None,
            size: metadata.len(),
        })
    }

    /// File with in-memory content; `size` is the content's byte length.
    pub fn with_content(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            size: content.len() as u64,
            content: Some(content),
        }
    }

    /// Read the file's content into a new `File`. Fails on non-UTF-8 data.
    pub fn load_content(&self) -> Result<Self> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(Self::with_content(self.path.clone(), content))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }
}
