//! File attribute and symlink preservation

use std::path::Path;
use filetime::FileTime;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Result, SyncError};

/// What to do with a symbolic link found in the source tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymlinkPolicy {
    /// Recreate the link in the replica with the same target string
    #[default]
    CopyAsLink,
    /// Copy whatever the link points at as a regular file or directory
    Follow,
}

/// Options for attribute preservation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreservationOptions {
    /// Preserve file modification times
    pub preserve_mtime: bool,
    /// Preserve file permissions
    pub preserve_permissions: bool,
    /// Symlink handling
    pub symlinks: SymlinkPolicy,
}

impl Default for PreservationOptions {
    fn default() -> Self {
        Self {
            preserve_mtime: true,
            preserve_permissions: true,
            symlinks: SymlinkPolicy::default(),
        }
    }
}

/// Attribute preserver for maintaining file metadata
#[derive(Debug, Clone)]
pub struct AttributePreserver {
    options: PreservationOptions,
}

impl AttributePreserver {
    pub fn new(options: PreservationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PreservationOptions {
        &self.options
    }

    pub fn is_enabled(&self) -> bool {
        self.options.preserve_mtime || self.options.preserve_permissions
    }

    /// Copy the enabled attributes from `source` onto `destination`
    pub async fn copy_attributes(&self, source: &Path, destination: &Path) -> Result<()> {
        let metadata = fs::metadata(source).await.map_err(|e| {
            SyncError::attribute_error(source, format!("Failed to read metadata: {}", e))
        })?;

        if self.options.preserve_permissions {
            fs::set_permissions(destination, metadata.permissions())
                .await
                .map_err(|e| {
                    SyncError::attribute_error(destination, format!("Failed to set permissions: {}", e))
                })?;
        }

        if self.options.preserve_mtime {
            let mtime = FileTime::from_last_modification_time(&metadata);
            let atime = FileTime::from_last_access_time(&metadata);
            filetime::set_file_times(destination, atime, mtime).map_err(|e| {
                SyncError::attribute_error(destination, format!("Failed to set file times: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Recreate the symlink at `source` as `destination`, pointing at the same target
pub async fn copy_symlink(source: &Path, destination: &Path) -> Result<()> {
    let target = fs::read_link(source).await.map_err(|e| {
        SyncError::copy_error(source, destination, format!("Failed to read link: {}", e))
    })?;

    create_symlink(&target, source, destination).await.map_err(|e| {
        SyncError::copy_error(source, destination, format!("Failed to create link: {}", e))
    })
}

/// Whether two symlinks point at the same target string
pub async fn same_link_target(source: &Path, replica: &Path) -> Result<bool> {
    let source_target = fs::read_link(source).await.map_err(|e| {
        SyncError::digest_error(source, format!("Failed to read link: {}", e))
    })?;
    let replica_target = fs::read_link(replica).await.map_err(|e| {
        SyncError::digest_error(replica, format!("Failed to read link: {}", e))
    })?;
    Ok(source_target == replica_target)
}

#[cfg(unix)]
async fn create_symlink(target: &Path, _source: &Path, destination: &Path) -> std::io::Result<()> {
    fs::symlink(target, destination).await
}

#[cfg(windows)]
async fn create_symlink(target: &Path, source: &Path, destination: &Path) -> std::io::Result<()> {
    // Windows needs to know up front whether the link names a directory
    let points_at_dir = fs::metadata(source).await.map(|m| m.is_dir()).unwrap_or(false);
    if points_at_dir {
        fs::symlink_dir(target, destination).await
    } else {
        fs::symlink_file(target, destination).await
    }
}

/// Clear the read-only flag on `path` so it can be replaced or removed
pub async fn make_writable(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path).await.map_err(|e| {
        SyncError::attribute_error(path, format!("Failed to read metadata: {}", e))
    })?;

    if metadata.file_type().is_symlink() {
        return Ok(());
    }

    let mut permissions = metadata.permissions();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let search = if metadata.is_dir() { 0o100 } else { 0 };
        permissions.set_mode(permissions.mode() | 0o200 | search);
    }

    #[cfg(not(unix))]
    {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
    }

    fs::set_permissions(path, permissions).await.map_err(|e| {
        SyncError::attribute_error(path, format!("Failed to clear read-only flag: {}", e))
    })
}
