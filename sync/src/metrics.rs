//! Per-pass outcomes and statistics

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use tracing::debug;

use crate::scanner::EntryKind;

/// What happened to one entry during a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncOutcome {
    /// Entry was absent from the replica and has been created
    Copied,
    /// Replica file differed and has been overwritten
    Updated,
    /// Replica entry already matched
    Skipped,
    /// Directory existed on both sides and was reconciled recursively
    Recursed,
    /// Orphan removed from the replica
    Deleted,
    /// Entry could not be reconciled this pass
    Failed(String),
}

/// One outcome, keyed by its path relative to the roots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOutcome {
    pub relative_path: PathBuf,
    pub kind: EntryKind,
    pub outcome: SyncOutcome,
}

/// File-related statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileStats {
    /// Files and links copied into the replica
    pub copied: usize,
    /// Files overwritten in the replica
    pub updated: usize,
    /// Replica entries deleted
    pub deleted: usize,
    /// Entries that already matched
    pub skipped: usize,
    /// Directories created in the replica
    pub directories_created: usize,
    /// Directories reconciled recursively
    pub directories_recursed: usize,
    /// Entries that failed processing
    pub failed: usize,
}

/// Statistics for a single synchronization pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassMetrics {
    /// Unique pass identifier
    pub session_id: Uuid,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
    pub duration: Duration,
    pub files: FileStats,
    /// Bytes written into the replica by copies and updates
    pub bytes_transferred: u64,
    /// Failure descriptions, in the order they happened
    pub errors: Vec<String>,
    /// Every recorded outcome, in the order it happened
    pub outcomes: Vec<EntryOutcome>,
}

impl Default for PassMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PassMetrics {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            start_time: SystemTime::now(),
            end_time: None,
            duration: Duration::default(),
            files: FileStats::default(),
            bytes_transferred: 0,
            errors: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    /// Mark the pass as started
    pub fn start(&mut self) {
        self.start_time = SystemTime::now();
    }

    /// Mark the pass as completed
    pub fn complete(&mut self) {
        let end_time = SystemTime::now();
        self.duration = end_time.duration_since(self.start_time).unwrap_or_default();
        self.end_time = Some(end_time);

        debug!(
            session_id = %self.session_id,
            duration_secs = self.duration.as_secs_f64(),
            files_copied = self.files.copied,
            files_updated = self.files.updated,
            files_deleted = self.files.deleted,
            files_failed = self.files.failed,
            bytes_transferred = self.bytes_transferred,
            "Synchronization pass completed"
        );
    }

    /// Record the outcome of one entry
    pub fn record(&mut self, relative_path: &Path, kind: EntryKind, outcome: SyncOutcome) {
        debug!(path = %relative_path.display(), ?kind, ?outcome, "Entry reconciled");

        match &outcome {
            SyncOutcome::Copied if kind == EntryKind::Directory => self.files.directories_created += 1,
            SyncOutcome::Copied => self.files.copied += 1,
            SyncOutcome::Updated => self.files.updated += 1,
            SyncOutcome::Skipped => self.files.skipped += 1,
            SyncOutcome::Recursed => self.files.directories_recursed += 1,
            SyncOutcome::Deleted => self.files.deleted += 1,
            SyncOutcome::Failed(reason) => {
                self.files.failed += 1;
                self.errors.push(format!("{}: {}", relative_path.display(), reason));
            }
        }

        self.outcomes.push(EntryOutcome {
            relative_path: relative_path.to_path_buf(),
            kind,
            outcome,
        });
    }

    pub fn record_bytes(&mut self, bytes: u64) {
        self.bytes_transferred += bytes;
    }

    /// Outcome recorded for `relative_path`, the latest one if several
    pub fn outcome_for(&self, relative_path: impl AsRef<Path>) -> Option<&SyncOutcome> {
        let relative_path = relative_path.as_ref();
        self.outcomes
            .iter()
            .rev()
            .find(|entry| entry.relative_path == relative_path)
            .map(|entry| &entry.outcome)
    }

    /// Number of copies, updates and deletions performed
    pub fn changes(&self) -> usize {
        self.files.copied + self.files.updated + self.files.deleted + self.files.directories_created
    }

    /// No entry failed. A cancelled pass yields `SyncError::Cancelled`, never metrics.
    pub fn is_successful(&self) -> bool {
        self.files.failed == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "Synchronization finished in {:.2}s: {} copied, {} updated, {} deleted, {} folders created, {} unchanged, {} failed, {} bytes transferred",
            self.duration.as_secs_f64(),
            self.files.copied,
            self.files.updated,
            self.files.deleted,
            self.files.directories_created,
            self.files.skipped,
            self.files.failed,
            self.bytes_transferred
        )
    }
}
