//! Session files in the data directory: listing, lookup, read-back and removal.
//!
//! Client-supplied names are checked before they touch the filesystem: no
//! directory traversal, and only session files (`*.icod`) are reachable.

use chrono::{DateTime, Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use super::columnar::SessionFileContents;
use super::StorageError;
use crate::config::defaults::SESSION_FILE_EXTENSION;

/// Substrings that could move a lookup out of the data directory.
const TRAVERSAL_PATTERNS: [&str; 5] = ["..", "/", "\\", "%2F", "%5C"];

#[derive(Debug, Error)]
pub enum FileAccessError {
    #[error("Tried to traverse directories")]
    Traversal,

    #[error("Tried to access a non-session file")]
    NotSessionFile,

    #[error("File not found")]
    NotFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unreadable session file: {0}")]
    Decode(#[from] StorageError),
}

impl FileAccessError {
    /// The name itself was refused, before any lookup.
    pub fn is_rejected_name(&self) -> bool {
        matches!(self, FileAccessError::Traversal | FileAccessError::NotSessionFile)
    }
}

/// One entry of the file listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementFileDetails {
    pub name: String,
    /// Bytes
    pub size: u64,
    /// Creation time (modification time where the filesystem has none), RFC 3339.
    pub created: Option<String>,
}

/// Refuse names that escape the data directory or are not session files.
pub fn check_file_name(name: &str) -> Result<(), FileAccessError> {
    if name.is_empty() || TRAVERSAL_PATTERNS.iter().any(|p| name.contains(p)) {
        return Err(FileAccessError::Traversal);
    }
    if !is_session_file_name(name) {
        return Err(FileAccessError::NotSessionFile);
    }
    Ok(())
}

fn is_session_file_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext == SESSION_FILE_EXTENSION)
}

/// Session files under one data directory.
#[derive(Debug, Clone)]
pub struct SessionFiles {
    dir: PathBuf,
}

impl SessionFiles {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Session files sorted by name. A missing directory lists as empty.
    pub async fn list(&self) -> Result<Vec<MeasurementFileDetails>, FileAccessError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_session_file_name(&name) {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let created = meta
                .created()
                .or_else(|_| meta.modified())
                .ok()
                .map(|t| DateTime::<Local>::from(t).to_rfc3339_opts(SecondsFormat::Millis, false));
            files.push(MeasurementFileDetails {
                name,
                size: meta.len(),
                created,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(dir = %self.dir.display(), count = files.len(), "Listed session files");
        Ok(files)
    }

    /// Path of an existing session file.
    pub async fn locate(&self, name: &str) -> Result<PathBuf, FileAccessError> {
        check_file_name(name)?;
        let path = self.dir.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(FileAccessError::NotFound),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FileAccessError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_bytes(&self, name: &str) -> Result<Vec<u8>, FileAccessError> {
        let path = self.locate(name).await?;
        Ok(tokio::fs::read(path).await?)
    }

    pub async fn decode(&self, name: &str) -> Result<SessionFileContents, FileAccessError> {
        let path = self.locate(name).await?;
        Ok(SessionFileContents::read(&path).await?)
    }

    pub async fn delete(&self, name: &str) -> Result<(), FileAccessError> {
        let path = self.locate(name).await?;
        tokio::fs::remove_file(&path).await?;
        info!(path = %path.display(), "Deleted session file");
        Ok(())
    }
}
