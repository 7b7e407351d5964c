//! Single-level directory enumeration using tokio::fs

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::FileType;
use std::io;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Result, SyncError};

/// Kind of a directory child, as seen without following links
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link (never followed during enumeration)
    Symlink,
    /// Fifo, socket or device node
    Other,
}

impl EntryKind {
    pub fn from_file_type(file_type: FileType) -> Self {
        if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "folder",
            Self::Symlink => "symlink",
            Self::Other => "special file",
        }
    }
}

/// Immediate children of one directory, keyed by name
pub type DirectoryListing = BTreeMap<OsString, EntryKind>;

/// A child name paired with its location on both sides of the mirror
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: OsString,
    pub kind: EntryKind,
    pub source_path: PathBuf,
    pub replica_path: PathBuf,
}

impl DirectoryEntry {
    pub fn new(name: OsString, kind: EntryKind, source_dir: &Path, replica_dir: &Path) -> Self {
        let source_path = source_dir.join(&name);
        let replica_path = replica_dir.join(&name);
        Self {
            name,
            kind,
            source_path,
            replica_path,
        }
    }
}

/// List the immediate children of `dir`.
///
/// Fails with [`SyncError::MissingDirectory`] when `dir` does not exist and
/// with [`SyncError::NotADirectory`] when it exists but is not a directory.
/// `dir` itself is resolved through links; its children are not.
pub async fn list_entries(dir: impl AsRef<Path>) -> Result<DirectoryListing> {
    let dir = dir.as_ref();

    let metadata = match fs::metadata(dir).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(SyncError::MissingDirectory {
                path: dir.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(SyncError::scan_error(dir, format!("Failed to read metadata: {}", e)));
        }
    };

    if !metadata.is_dir() {
        return Err(SyncError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let mut read_dir = fs::read_dir(dir).await.map_err(|e| {
        SyncError::scan_error(dir, format!("Failed to open directory: {}", e))
    })?;

    let mut listing = DirectoryListing::new();
    while let Some(entry) = read_dir.next_entry().await.map_err(|e| {
        SyncError::scan_error(dir, format!("Failed to read directory entry: {}", e))
    })? {
        let file_type = entry.file_type().await.map_err(|e| {
            SyncError::scan_error(entry.path(), format!("Failed to read file type: {}", e))
        })?;
        listing.insert(entry.file_name(), EntryKind::from_file_type(file_type));
    }

    Ok(listing)
}
