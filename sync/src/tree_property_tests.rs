//! Property tests over randomly generated source and replica trees

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use proptest::prelude::*;
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::logger::{LogLevel, RecordingLogger};
use crate::sync_engine::{SyncOptions, TreeSynchronizer};

/// Strategy for generating path components
fn component() -> impl Strategy<Value = String> {
    "[a-e]{1,3}"
}

/// Strategy for generating relative file paths up to four levels deep
fn relative_file() -> impl Strategy<Value = PathBuf> {
    prop::collection::vec(component(), 1..5).prop_map(|parts| parts.iter().collect())
}

/// Strategy for a tree given as relative file path to content
fn tree() -> impl Strategy<Value = Vec<(PathBuf, Vec<u8>)>> {
    prop::collection::vec((relative_file(), prop::collection::vec(any::<u8>(), 0..64)), 0..12)
}

/// Materialize `files`, skipping any path that would need a file as a parent
fn build(root: &Path, files: &[(PathBuf, Vec<u8>)]) {
    std::fs::create_dir_all(root).unwrap();
    for (relative, content) in files {
        let path = root.join(relative);
        let blocked = path
            .ancestors()
            .skip(1)
            .take_while(|ancestor| *ancestor != root)
            .any(|ancestor| ancestor.is_file());
        if blocked || path.is_dir() {
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
    }
}

/// Relative path to file content, `None` for directories
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|entry| entry.unwrap())
        .map(|entry| {
            let relative = entry.path().strip_prefix(root).unwrap().to_path_buf();
            let content = entry
                .file_type()
                .is_file()
                .then(|| std::fs::read(entry.path()).unwrap());
            (relative, content)
        })
        .collect()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_replica_matches_source(source_files in tree(), replica_files in tree()) {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        let replica = temp_dir.path().join("replica");
        build(&source, &source_files);
        build(&replica, &replica_files);

        let logger = RecordingLogger::new();
        let synchronizer = TreeSynchronizer::new(SyncOptions::default(), Arc::new(logger.clone()));
        runtime().block_on(synchronizer.synchronize(&source, &replica)).unwrap();

        prop_assert_eq!(snapshot(&replica), snapshot(&source));
        prop_assert!(logger.messages(LogLevel::Error).is_empty());
    }

    #[test]
    fn prop_second_pass_changes_nothing(source_files in tree(), replica_files in tree()) {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        let replica = temp_dir.path().join("replica");
        build(&source, &source_files);
        build(&replica, &replica_files);

        let logger = RecordingLogger::new();
        let synchronizer = TreeSynchronizer::new(SyncOptions::default(), Arc::new(logger.clone()));
        let rt = runtime();
        rt.block_on(synchronizer.synchronize(&source, &replica)).unwrap();
        let settled = snapshot(&replica);

        let second = rt.block_on(synchronizer.synchronize(&source, &replica)).unwrap();

        prop_assert_eq!(second.changes(), 0);
        prop_assert_eq!(snapshot(&replica), settled);
    }
}
