//! Replica sync library
//!
//! One-way mirroring of a source directory tree onto a replica tree:
//! - Single-level enumeration that never follows links
//! - Content comparison by SHA-256 or BLAKE3 digest
//! - Two-pass recursive reconciliation with per-entry fault isolation
//! - A cancellable fixed-period scheduler
//! - Attribute preservation and per-pass metrics

pub mod scanner;
pub mod comparator;
pub mod sync_engine;
pub mod scheduler;
pub mod logger;
pub mod metrics;
pub mod preservation;
pub mod error;

// Re-export main types and functions
pub use scanner::{list_entries, DirectoryEntry, DirectoryListing, EntryKind};
pub use comparator::{ComparisonMode, ContentComparator, DigestAlgorithm, DEFAULT_PREFIX_BYTES};
pub use sync_engine::{SyncOptions, TreeSynchronizer};
pub use scheduler::{PeriodicScheduler, SchedulerState};
pub use logger::{LogLevel, LogRecord, Logger, RecordingLogger, TracingLogger, TIMESTAMP_FORMAT};
pub use metrics::{EntryOutcome, FileStats, PassMetrics, SyncOutcome};
pub use preservation::{AttributePreserver, PreservationOptions, SymlinkPolicy};
pub use error::{Result, SyncError};

/// Run a single mirroring pass of `source` onto `replica`
pub async fn mirror_once(
    source: impl AsRef<std::path::Path>,
    replica: impl AsRef<std::path::Path>,
    options: SyncOptions,
    logger: std::sync::Arc<dyn Logger>,
) -> Result<PassMetrics> {
    let synchronizer = TreeSynchronizer::new(options, logger);
    synchronizer.synchronize(source, replica).await
}

// Test modules
#[cfg(test)]
mod mirror_tests;
#[cfg(test)]
mod tree_property_tests;
