//! Recursive two-pass reconciliation of a replica tree against a source tree

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::comparator::{ComparisonMode, ContentComparator, DigestAlgorithm};
use crate::error::{Result, SyncError};
use crate::logger::Logger;
use crate::metrics::{PassMetrics, SyncOutcome};
use crate::preservation::{self, AttributePreserver, PreservationOptions, SymlinkPolicy};
use crate::scanner::{list_entries, DirectoryEntry, DirectoryListing, EntryKind};

/// Options for sync operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Digest used to compare files present on both sides
    pub digest_algorithm: DigestAlgorithm,
    /// Whole-file or prefix hashing
    pub comparison_mode: ComparisonMode,
    /// Attribute and symlink preservation options
    pub preservation_options: PreservationOptions,
    /// Buffer size for hashing
    pub buffer_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            digest_algorithm: DigestAlgorithm::default(),
            comparison_mode: ComparisonMode::default(),
            preservation_options: PreservationOptions::default(),
            buffer_size: 64 * 1024, // 64KB
        }
    }
}

/// Mirrors a source tree onto a replica tree, one directory level at a time
pub struct TreeSynchronizer {
    options: SyncOptions,
    comparator: ContentComparator,
    attribute_preserver: AttributePreserver,
    logger: Arc<dyn Logger>,
    cancel: CancellationToken,
}

impl TreeSynchronizer {
    pub fn new(options: SyncOptions, logger: Arc<dyn Logger>) -> Self {
        let comparator = ContentComparator::new(options.digest_algorithm, options.comparison_mode)
            .with_buffer_size(options.buffer_size);
        let attribute_preserver = AttributePreserver::new(options.preservation_options.clone());

        Self {
            options,
            comparator,
            attribute_preserver,
            logger,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort passes when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Run one full pass.
    ///
    /// Returns [`SyncError::MissingSourceRoot`] without touching the replica
    /// when `source` is not an existing directory, and [`SyncError::Cancelled`]
    /// when the token fires mid-pass. Failures of individual entries are
    /// logged, recorded in the returned metrics, and never abort the pass.
    pub async fn synchronize(
        &self,
        source: impl AsRef<Path>,
        replica: impl AsRef<Path>,
    ) -> Result<PassMetrics> {
        let source = source.as_ref();
        let replica = replica.as_ref();

        let mut metrics = PassMetrics::new();
        metrics.start();

        match fs::metadata(source).await {
            Ok(metadata) if metadata.is_dir() => {}
            _ => return Err(SyncError::missing_source(source)),
        }

        self.logger.info(&format!(
            "Starting synchronization of '{}' into '{}'",
            source.display(),
            replica.display()
        ));

        let ancestors = self.descend(&[], source).await?;
        let result = self
            .sync_directory(source, replica, Path::new(""), &ancestors, &mut metrics)
            .await
            .map_err(|e| match e {
                SyncError::MissingDirectory { .. } | SyncError::NotADirectory { .. }
                    if !source.is_dir() =>
                {
                    SyncError::missing_source(source)
                }
                other => other,
            });

        if let Err(e) = result {
            if e.is_cancelled() {
                self.logger.info("Synchronization cancelled before completion");
            }
            return Err(e);
        }

        metrics.complete();
        self.logger.info(&metrics.summary());
        Ok(metrics)
    }

    fn sync_directory<'a>(
        &'a self,
        source_dir: &'a Path,
        replica_dir: &'a Path,
        relative: &'a Path,
        ancestors: &'a [PathBuf],
        metrics: &'a mut PassMetrics,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_cancelled()?;

            let source_listing = list_entries(source_dir).await?;
            let replica_listing = self.replica_listing(replica_dir, relative, metrics).await?;

            // Pass 1: bring every source entry into the replica
            for (name, kind) in &source_listing {
                self.check_cancelled()?;

                let entry = DirectoryEntry::new(name.clone(), *kind, source_dir, replica_dir);
                let entry_relative = relative.join(name);
                let counterpart = replica_listing.get(name).copied();

                let outcome = self
                    .reconcile(&entry, counterpart, &entry_relative, ancestors, metrics)
                    .await;
                if let Err(e) = outcome {
                    if e.is_cancelled() {
                        return Err(e);
                    }
                    self.report_failure(&entry_relative, *kind, &entry.source_path, &e, metrics);
                }
            }

            // Pass 2: names missing from the source listing are orphans
            for (name, kind) in &replica_listing {
                if source_listing.contains_key(name) {
                    continue;
                }
                self.check_cancelled()?;

                let orphan = replica_dir.join(name);
                let orphan_relative = relative.join(name);
                match remove_entry(&orphan, *kind).await {
                    Ok(()) => {
                        self.logger.info(&format!("Deleted {} '{}'", kind.label(), orphan.display()));
                        metrics.record(&orphan_relative, *kind, SyncOutcome::Deleted);
                    }
                    Err(e) => self.report_failure(&orphan_relative, *kind, &orphan, &e, metrics),
                }
            }

            Ok(())
        })
    }

    /// List the replica side, creating the directory when it is missing
    async fn replica_listing(
        &self,
        replica_dir: &Path,
        relative: &Path,
        metrics: &mut PassMetrics,
    ) -> Result<DirectoryListing> {
        match list_entries(replica_dir).await {
            Err(SyncError::MissingDirectory { .. }) => {
                fs::create_dir_all(replica_dir).await.map_err(|e| {
                    SyncError::path_error(replica_dir, format!("Failed to create directory: {}", e))
                })?;
                self.logger.info(&format!("Folder '{}' not found, created", replica_dir.display()));
                metrics.record(relative, EntryKind::Directory, SyncOutcome::Copied);
                Ok(DirectoryListing::new())
            }
            other => other,
        }
    }

    async fn reconcile(
        &self,
        entry: &DirectoryEntry,
        counterpart: Option<EntryKind>,
        relative: &Path,
        ancestors: &[PathBuf],
        metrics: &mut PassMetrics,
    ) -> Result<()> {
        let kind = self.effective_kind(entry, ancestors).await?;

        match (kind, counterpart) {
            (EntryKind::Directory, Some(EntryKind::Directory)) => {
                let chain = self.descend(ancestors, &entry.source_path).await?;
                self.sync_directory(&entry.source_path, &entry.replica_path, relative, &chain, metrics)
                    .await?;
                metrics.record(relative, kind, SyncOutcome::Recursed);
            }
            (EntryKind::Directory, existing) => {
                let chain = self.descend(ancestors, &entry.source_path).await?;
                if let Some(stale) = existing {
                    self.remove_stale(&entry.replica_path, stale).await?;
                }
                self.copy_tree(&entry.source_path, &entry.replica_path, relative, &chain, metrics)
                    .await?;
            }
            (EntryKind::File, Some(EntryKind::File)) => {
                if self.comparator.equal(&entry.source_path, &entry.replica_path).await? {
                    metrics.record(relative, kind, SyncOutcome::Skipped);
                } else {
                    let bytes = self.copy_file(&entry.source_path, &entry.replica_path).await?;
                    self.logger.info(&format!("Updated file '{}'", entry.replica_path.display()));
                    metrics.record_bytes(bytes);
                    metrics.record(relative, kind, SyncOutcome::Updated);
                }
            }
            (EntryKind::File, existing) => {
                if let Some(stale) = existing {
                    self.remove_stale(&entry.replica_path, stale).await?;
                }
                let bytes = self.copy_file(&entry.source_path, &entry.replica_path).await?;
                self.logger.info(&format!(
                    "Copied file '{}' to '{}'",
                    entry.source_path.display(),
                    entry.replica_path.display()
                ));
                metrics.record_bytes(bytes);
                metrics.record(relative, kind, SyncOutcome::Copied);
            }
            (EntryKind::Symlink, Some(EntryKind::Symlink)) => {
                if preservation::same_link_target(&entry.source_path, &entry.replica_path).await? {
                    metrics.record(relative, kind, SyncOutcome::Skipped);
                } else {
                    self.remove_stale(&entry.replica_path, EntryKind::Symlink).await?;
                    preservation::copy_symlink(&entry.source_path, &entry.replica_path).await?;
                    self.logger.info(&format!("Updated symlink '{}'", entry.replica_path.display()));
                    metrics.record(relative, kind, SyncOutcome::Updated);
                }
            }
            (EntryKind::Symlink, existing) => {
                if let Some(stale) = existing {
                    self.remove_stale(&entry.replica_path, stale).await?;
                }
                preservation::copy_symlink(&entry.source_path, &entry.replica_path).await?;
                self.logger.info(&format!(
                    "Copied symlink '{}' to '{}'",
                    entry.source_path.display(),
                    entry.replica_path.display()
                ));
                metrics.record(relative, kind, SyncOutcome::Copied);
            }
            (EntryKind::Other, _) => {
                return Err(SyncError::path_error(&entry.source_path, "Unsupported file type"));
            }
        }

        Ok(())
    }

    /// Kind used for reconciliation; resolves links under [`SymlinkPolicy::Follow`]
    async fn effective_kind(&self, entry: &DirectoryEntry, ancestors: &[PathBuf]) -> Result<EntryKind> {
        if entry.kind != EntryKind::Symlink || !self.follows_links() {
            return Ok(entry.kind);
        }

        let metadata = fs::metadata(&entry.source_path).await.map_err(|e| {
            SyncError::path_error(&entry.source_path, format!("Failed to resolve link: {}", e))
        })?;

        if metadata.is_dir() {
            reject_ancestor_link(&entry.source_path, ancestors).await?;
            Ok(EntryKind::Directory)
        } else if metadata.is_file() {
            Ok(EntryKind::File)
        } else {
            Ok(EntryKind::Other)
        }
    }

    fn follows_links(&self) -> bool {
        self.options.preservation_options.symlinks == SymlinkPolicy::Follow
    }

    /// Canonical source directories from the root down to `dir`.
    ///
    /// Only tracked under [`SymlinkPolicy::Follow`]; without following
    /// links the walk cannot revisit a directory.
    async fn descend(&self, ancestors: &[PathBuf], dir: &Path) -> Result<Vec<PathBuf>> {
        if !self.follows_links() {
            return Ok(Vec::new());
        }
        let canonical = fs::canonicalize(dir).await.map_err(|e| {
            SyncError::path_error(dir, format!("Failed to resolve path: {}", e))
        })?;
        let mut chain = ancestors.to_vec();
        chain.push(canonical);
        Ok(chain)
    }

    /// Remove a replica entry whose kind no longer matches the source
    async fn remove_stale(&self, path: &Path, kind: EntryKind) -> Result<()> {
        remove_entry(path, kind).await?;
        self.logger.info(&format!("Deleted stale {} '{}'", kind.label(), path.display()));
        Ok(())
    }

    /// Copy a whole source subtree that is absent from the replica
    async fn copy_tree(
        &self,
        source_root: &Path,
        replica_root: &Path,
        relative: &Path,
        ancestors: &[PathBuf],
        metrics: &mut PassMetrics,
    ) -> Result<()> {
        let mut walker = WalkDir::new(source_root)
            .follow_links(self.follows_links())
            .sort_by_file_name()
            .into_iter();

        while let Some(item) = walker.next() {
            self.check_cancelled()?;

            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().unwrap_or(source_root).to_path_buf();
                    let suffix = path.strip_prefix(source_root).unwrap_or(Path::new(""));
                    let err = SyncError::scan_error(&path, e.to_string());
                    self.report_failure(&join_relative(relative, suffix), EntryKind::Other, &path, &err, metrics);
                    continue;
                }
            };

            let suffix = match entry.path().strip_prefix(source_root) {
                Ok(suffix) => suffix,
                Err(_) => continue,
            };
            let target = join_relative(replica_root, suffix);
            let entry_relative = join_relative(relative, suffix);
            let kind = EntryKind::from_file_type(entry.file_type());

            let result = match kind {
                EntryKind::Directory => {
                    // The root was already checked by the caller
                    let followed_link = entry.depth() > 0 && entry.path_is_symlink();
                    self.create_directory(entry.path(), &target, followed_link, ancestors).await
                }
                EntryKind::File => self.copy_file(entry.path(), &target).await.map(|bytes| {
                    metrics.record_bytes(bytes);
                    self.logger.info(&format!(
                        "Copied file '{}' to '{}'",
                        entry.path().display(),
                        target.display()
                    ));
                }),
                EntryKind::Symlink => preservation::copy_symlink(entry.path(), &target)
                    .await
                    .map(|_| {
                        self.logger.info(&format!(
                            "Copied symlink '{}' to '{}'",
                            entry.path().display(),
                            target.display()
                        ));
                    }),
                EntryKind::Other => Err(SyncError::path_error(entry.path(), "Unsupported file type")),
            };

            match result {
                Ok(()) => metrics.record(&entry_relative, kind, SyncOutcome::Copied),
                Err(e) => {
                    if kind == EntryKind::Directory {
                        walker.skip_current_dir();
                    }
                    self.report_failure(&entry_relative, kind, entry.path(), &e, metrics);
                }
            }
        }

        Ok(())
    }

    async fn create_directory(
        &self,
        source: &Path,
        target: &Path,
        followed_link: bool,
        ancestors: &[PathBuf],
    ) -> Result<()> {
        if followed_link {
            reject_ancestor_link(source, ancestors).await?;
        }
        fs::create_dir_all(target).await.map_err(|e| {
            SyncError::path_error(target, format!("Failed to create directory: {}", e))
        })?;
        self.logger.info(&format!("Created folder '{}'", target.display()));
        Ok(())
    }

    /// Copy file contents and the enabled attributes, returning bytes written
    async fn copy_file(&self, source: &Path, destination: &Path) -> Result<u64> {
        let bytes = match fs::copy(source, destination).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let copy_error = |e: io::Error| {
                    SyncError::copy_error(source, destination, format!("Failed to copy file: {}", e))
                };
                // Retry only for a read-only replica file left by an earlier pass
                if e.kind() != io::ErrorKind::PermissionDenied || !is_read_only(destination).await {
                    return Err(copy_error(e));
                }
                fs::File::open(source).await.map_err(copy_error)?;
                preservation::make_writable(destination).await?;
                fs::copy(source, destination).await.map_err(copy_error)?
            }
        };

        if self.attribute_preserver.is_enabled() {
            if let Err(e) = self.attribute_preserver.copy_attributes(source, destination).await {
                self.logger.error(&format!(
                    "Failed to preserve attributes for '{}': {}",
                    destination.display(),
                    e
                ));
            }
        }

        Ok(bytes)
    }

    fn report_failure(
        &self,
        relative: &Path,
        kind: EntryKind,
        path: &Path,
        error: &SyncError,
        metrics: &mut PassMetrics,
    ) {
        self.logger.error(&format!(
            "Failed to synchronize {} '{}': {}",
            kind.label(),
            path.display(),
            error
        ));
        metrics.record(relative, kind, SyncOutcome::Failed(error.to_string()));
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Fail when a followed link leads back above or onto the current walk
async fn reject_ancestor_link(link: &Path, ancestors: &[PathBuf]) -> Result<()> {
    let target = fs::canonicalize(link).await.map_err(|e| {
        SyncError::path_error(link, format!("Failed to resolve link: {}", e))
    })?;
    if ancestors.iter().any(|dir| dir.starts_with(&target)) {
        return Err(SyncError::path_error(link, "Link points at one of its own ancestors"));
    }
    Ok(())
}

/// Delete a replica entry without following links
async fn remove_entry(path: &Path, kind: EntryKind) -> Result<()> {
    let outcome = match remove_once(path, kind).await {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            clear_read_only(path, kind).await?;
            remove_once(path, kind).await
        }
        other => other,
    };
    outcome.map_err(|e| {
        SyncError::deletion_error(path, format!("Failed to delete {}: {}", kind.label(), e))
    })
}

async fn is_read_only(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .await
        .map(|metadata| metadata.is_file() && metadata.permissions().readonly())
        .unwrap_or(false)
}

async fn remove_once(path: &Path, kind: EntryKind) -> io::Result<()> {
    match kind {
        EntryKind::Directory => fs::remove_dir_all(path).await,
        EntryKind::Symlink if cfg!(windows) => match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(_) => fs::remove_dir(path).await,
        },
        _ => fs::remove_file(path).await,
    }
}

async fn clear_read_only(path: &Path, kind: EntryKind) -> Result<()> {
    if kind != EntryKind::Directory {
        return preservation::make_writable(path).await;
    }

    let directories: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect();

    for directory in directories {
        preservation::make_writable(&directory).await?;
    }
    Ok(())
}

fn join_relative(base: &Path, suffix: &Path) -> PathBuf {
    if suffix.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(suffix)
    }
}
