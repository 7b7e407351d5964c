//! Error types for the mirroring engine

use std::path::PathBuf;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error type for sync operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The source root is absent or not a directory at the start of a pass
    #[error("Source folder '{path}' does not exist or is not a directory")]
    MissingSourceRoot { path: PathBuf },

    /// A path that should be a directory is something else
    #[error("Path '{path}' is not a directory")]
    NotADirectory { path: PathBuf },

    /// A directory that should be listed does not exist
    #[error("Directory '{path}' does not exist")]
    MissingDirectory { path: PathBuf },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Path-related errors
    #[error("Path error at '{path}': {message}")]
    Path { path: PathBuf, message: String },

    /// One of the two files being compared could not be read
    #[error("Failed to read '{path}' for comparison: {message}")]
    DigestRead { path: PathBuf, message: String },

    /// Directory scanning errors
    #[error("Directory scan error at '{path}': {message}")]
    DirectoryScan { path: PathBuf, message: String },

    /// File copying errors
    #[error("File copy error: {message}")]
    FileCopy { message: String },

    /// File deletion errors
    #[error("File deletion error at '{path}': {message}")]
    FileDeletion { path: PathBuf, message: String },

    /// File attribute preservation errors
    #[error("Attribute preservation error for '{path}': {message}")]
    AttributePreservation { path: PathBuf, message: String },

    /// Cancellation error
    #[error("Operation was cancelled")]
    Cancelled,
}

impl SyncError {
    /// Create a new missing source root error
    pub fn missing_source(path: impl Into<PathBuf>) -> Self {
        Self::MissingSourceRoot { path: path.into() }
    }

    /// Create a new path error
    pub fn path_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new digest read error
    pub fn digest_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DigestRead {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new directory scan error
    pub fn scan_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DirectoryScan {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new file copy error
    pub fn copy_error(
        source: impl AsRef<std::path::Path>,
        dest: impl AsRef<std::path::Path>,
        message: impl Into<String>,
    ) -> Self {
        let full_message = format!(
            "File copy error from '{}' to '{}': {}",
            source.as_ref().display(),
            dest.as_ref().display(),
            message.into()
        );
        Self::FileCopy {
            message: full_message,
        }
    }

    /// Create a new file deletion error
    pub fn deletion_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::FileDeletion {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new attribute preservation error
    pub fn attribute_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::AttributePreservation {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this error must stop the scheduler loop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingSourceRoot { .. })
    }

    /// Whether this error was caused by cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
