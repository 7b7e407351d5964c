//! End-to-end mirroring scenarios over real temporary trees

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::fs;
use walkdir::WalkDir;

use crate::error::SyncError;
use crate::logger::{LogLevel, RecordingLogger};
use crate::metrics::SyncOutcome;
use crate::preservation::SymlinkPolicy;
use crate::sync_engine::{SyncOptions, TreeSynchronizer};

/// What a path holds in a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    File(Vec<u8>),
    Directory,
    Link(PathBuf),
}

/// Source and replica roots under one temporary directory
struct Fixture {
    _temp_dir: TempDir,
    source: PathBuf,
    replica: PathBuf,
    logger: RecordingLogger,
}

impl Fixture {
    async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        let replica = temp_dir.path().join("replica");
        fs::create_dir_all(&source).await.unwrap();
        fs::create_dir_all(&replica).await.unwrap();
        Self {
            _temp_dir: temp_dir,
            source,
            replica,
            logger: RecordingLogger::new(),
        }
    }

    fn synchronizer(&self) -> TreeSynchronizer {
        TreeSynchronizer::new(SyncOptions::default(), Arc::new(self.logger.clone()))
    }

    async fn write(&self, root: &Path, relative: &str, content: &[u8]) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.unwrap();
        }
        fs::write(path, content).await.unwrap();
    }
}

/// Relative path to node, without following links
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Node> {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .map(|entry| entry.unwrap())
        .map(|entry| {
            let relative = entry.path().strip_prefix(root).unwrap().to_path_buf();
            let node = if entry.file_type().is_symlink() {
                Node::Link(std::fs::read_link(entry.path()).unwrap())
            } else if entry.file_type().is_dir() {
                Node::Directory
            } else {
                Node::File(std::fs::read(entry.path()).unwrap())
            };
            (relative, node)
        })
        .collect()
}

#[tokio::test]
async fn test_new_file_is_copied() {
    let fixture = Fixture::new().await;
    fixture.write(&fixture.source, "a.txt", b"hi").await;

    let metrics = fixture
        .synchronizer()
        .synchronize(&fixture.source, &fixture.replica)
        .await
        .unwrap();

    assert_eq!(fs::read(fixture.replica.join("a.txt")).await.unwrap(), b"hi");
    assert_eq!(metrics.outcome_for("a.txt"), Some(&SyncOutcome::Copied));
    assert_eq!(fixture.logger.count_containing("copied file"), 1);
}

#[tokio::test]
async fn test_changed_file_is_updated_and_unchanged_is_silent() {
    let fixture = Fixture::new().await;
    fixture.write(&fixture.source, "a.txt", b"v2").await;
    fixture.write(&fixture.source, "sub/b.txt", b"same").await;
    fixture.write(&fixture.replica, "a.txt", b"v1").await;
    fixture.write(&fixture.replica, "sub/b.txt", b"same").await;

    let metrics = fixture
        .synchronizer()
        .synchronize(&fixture.source, &fixture.replica)
        .await
        .unwrap();

    assert_eq!(fs::read(fixture.replica.join("a.txt")).await.unwrap(), b"v2");
    assert_eq!(metrics.outcome_for("a.txt"), Some(&SyncOutcome::Updated));
    assert_eq!(metrics.outcome_for("sub/b.txt"), Some(&SyncOutcome::Skipped));
    assert_eq!(metrics.outcome_for("sub"), Some(&SyncOutcome::Recursed));
    assert_eq!(fixture.logger.count_containing("updated file"), 1);
    assert_eq!(fixture.logger.count_containing("b.txt"), 0);
}

#[tokio::test]
async fn test_orphan_file_is_deleted() {
    let fixture = Fixture::new().await;
    fixture.write(&fixture.replica, "c.txt", b"orphan").await;

    let metrics = fixture
        .synchronizer()
        .synchronize(&fixture.source, &fixture.replica)
        .await
        .unwrap();

    assert!(!fixture.replica.join("c.txt").exists());
    assert_eq!(metrics.outcome_for("c.txt"), Some(&SyncOutcome::Deleted));
    assert_eq!(fixture.logger.count_containing("deleted file"), 1);
}

#[tokio::test]
async fn test_new_directory_is_copied_recursively() {
    let fixture = Fixture::new().await;
    fixture.write(&fixture.source, "d/e/f.txt", b"deep").await;

    fixture
        .synchronizer()
        .synchronize(&fixture.source, &fixture.replica)
        .await
        .unwrap();

    assert!(fixture.replica.join("d").is_dir());
    assert!(fixture.replica.join("d").join("e").is_dir());
    assert_eq!(fs::read(fixture.replica.join("d/e/f.txt")).await.unwrap(), b"deep");
    assert_eq!(fixture.logger.count_containing("created folder"), 2);
    assert_eq!(fixture.logger.count_containing("copied file"), 1);
}

#[tokio::test]
async fn test_missing_source_root_is_fatal_and_replica_untouched() {
    let fixture = Fixture::new().await;
    fixture.write(&fixture.replica, "keep.txt", b"keep").await;
    let missing = fixture.source.join("does-not-exist");

    let err = fixture
        .synchronizer()
        .synchronize(&missing, &fixture.replica)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::MissingSourceRoot { .. }));
    assert!(err.is_fatal());
    assert_eq!(fs::read(fixture.replica.join("keep.txt")).await.unwrap(), b"keep");
    assert!(fixture.logger.records().is_empty());
}

#[tokio::test]
async fn test_source_root_that_is_a_file_is_fatal() {
    let fixture = Fixture::new().await;
    fixture.write(&fixture.source, "plain.txt", b"x").await;

    let err = fixture
        .synchronizer()
        .synchronize(fixture.source.join("plain.txt"), &fixture.replica)
        .await
        .unwrap_err();

    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_second_pass_is_a_no_op() {
    let fixture = Fixture::new().await;
    fixture.write(&fixture.source, "a.txt", b"a").await;
    fixture.write(&fixture.source, "x/y/z.bin", &[0u8, 1, 2, 3]).await;
    fixture.write(&fixture.replica, "stale/old.txt", b"old").await;

    let synchronizer = fixture.synchronizer();
    let first = synchronizer.synchronize(&fixture.source, &fixture.replica).await.unwrap();
    assert!(first.changes() > 0);

    let before = snapshot(&fixture.replica);
    fixture.logger.clear();

    let second = synchronizer.synchronize(&fixture.source, &fixture.replica).await.unwrap();

    assert_eq!(second.changes(), 0);
    assert_eq!(snapshot(&fixture.replica), before);
    assert_eq!(fixture.logger.count_containing("copied file"), 0);
    assert_eq!(fixture.logger.count_containing("created folder"), 0);
    assert_eq!(fixture.logger.count_containing("deleted file"), 0);
    assert_eq!(fixture.logger.count_containing("deleted folder"), 0);
    assert_eq!(fixture.logger.count_containing("updated file"), 0);
    assert!(fixture.logger.messages(LogLevel::Error).is_empty());
}

#[tokio::test]
async fn test_deep_tree_mirrors_exactly() {
    let fixture = Fixture::new().await;
    let mut relative = String::new();
    for level in 0..12 {
        relative.push_str(&format!("level{}/", level));
        fixture.write(&fixture.source, &format!("{}f{}.txt", relative, level), level.to_string().as_bytes()).await;
    }
    fixture.write(&fixture.replica, "level0/level1/ghost/ghost.txt", b"boo").await;

    fixture
        .synchronizer()
        .synchronize(&fixture.source, &fixture.replica)
        .await
        .unwrap();

    assert_eq!(snapshot(&fixture.replica), snapshot(&fixture.source));
}

#[tokio::test]
async fn test_orphan_directory_is_removed_with_contents() {
    let fixture = Fixture::new().await;
    fixture.write(&fixture.source, "kept/a.txt", b"a").await;
    fixture.write(&fixture.replica, "kept/a.txt", b"a").await;
    fixture.write(&fixture.replica, "kept/gone/inner/deep.txt", b"x").await;

    let metrics = fixture
        .synchronizer()
        .synchronize(&fixture.source, &fixture.replica)
        .await
        .unwrap();

    assert!(!fixture.replica.join("kept/gone").exists());
    assert_eq!(metrics.outcome_for("kept/gone"), Some(&SyncOutcome::Deleted));
    assert_eq!(fixture.logger.count_containing("deleted folder"), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_entry_does_not_stop_siblings() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = Fixture::new().await;
    fixture.write(&fixture.source, "a_before.txt", b"before").await;
    fixture.write(&fixture.source, "locked.txt", b"secret").await;
    fixture.write(&fixture.source, "z_after.txt", b"after").await;
    fixture.write(&fixture.replica, "orphan.txt", b"orphan").await;

    let locked = fixture.source.join("locked.txt");
    fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).await.unwrap();
    if std::fs::File::open(&locked).is_ok() {
        // Running with privileges that bypass permission bits
        return;
    }

    let metrics = fixture
        .synchronizer()
        .synchronize(&fixture.source, &fixture.replica)
        .await
        .unwrap();

    fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o644)).await.unwrap();

    assert!(fixture.replica.join("a_before.txt").exists());
    assert!(fixture.replica.join("z_after.txt").exists());
    assert!(!fixture.replica.join("orphan.txt").exists());
    assert!(matches!(metrics.outcome_for("locked.txt"), Some(SyncOutcome::Failed(_))));
    assert_eq!(metrics.files.failed, 1);

    let errors = fixture.logger.messages(LogLevel::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("locked.txt"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_replica_file_is_left_alone() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = Fixture::new().await;
    fixture.write(&fixture.source, "a.txt", b"new").await;
    fixture.write(&fixture.replica, "a.txt", b"old").await;

    let replica_file = fixture.replica.join("a.txt");
    fs::set_permissions(&replica_file, std::fs::Permissions::from_mode(0o000)).await.unwrap();
    if std::fs::File::open(&replica_file).is_ok() {
        return;
    }

    let metrics = fixture
        .synchronizer()
        .synchronize(&fixture.source, &fixture.replica)
        .await
        .unwrap();

    fs::set_permissions(&replica_file, std::fs::Permissions::from_mode(0o644)).await.unwrap();

    // Comparison could not be made, so nothing destructive happened
    assert_eq!(fs::read(&replica_file).await.unwrap(), b"old");
    assert!(matches!(metrics.outcome_for("a.txt"), Some(SyncOutcome::Failed(_))));
}

#[tokio::test]
async fn test_same_size_edit_is_detected() {
    let fixture = Fixture::new().await;
    fixture.write(&fixture.source, "data.bin", &[9u8; 4096]).await;
    let mut altered = vec![9u8; 4096];
    altered[4000] = 1;
    fixture.write(&fixture.replica, "data.bin", &altered).await;

    fixture
        .synchronizer()
        .synchronize(&fixture.source, &fixture.replica)
        .await
        .unwrap();

    assert_eq!(fs::read(fixture.replica.join("data.bin")).await.unwrap(), vec![9u8; 4096]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_changed_link_target_is_replaced() {
    let fixture = Fixture::new().await;
    fs::symlink("new-target", fixture.source.join("link")).await.unwrap();
    fs::symlink("old-target", fixture.replica.join("link")).await.unwrap();

    let metrics = fixture
        .synchronizer()
        .synchronize(&fixture.source, &fixture.replica)
        .await
        .unwrap();

    assert_eq!(
        fs::read_link(fixture.replica.join("link")).await.unwrap(),
        PathBuf::from("new-target")
    );
    assert_eq!(metrics.outcome_for("link"), Some(&SyncOutcome::Updated));
}

#[tokio::test]
async fn test_mtime_is_preserved_on_copy() {
    use filetime::FileTime;

    let fixture = Fixture::new().await;
    fixture.write(&fixture.source, "old.txt", b"old").await;
    let stamp = FileTime::from_unix_time(1_000_000_000, 0);
    filetime::set_file_mtime(fixture.source.join("old.txt"), stamp).unwrap();

    fixture
        .synchronizer()
        .synchronize(&fixture.source, &fixture.replica)
        .await
        .unwrap();

    let metadata = std::fs::metadata(fixture.replica.join("old.txt")).unwrap();
    assert_eq!(FileTime::from_last_modification_time(&metadata).unix_seconds(), 1_000_000_000);
}

#[cfg(unix)]
#[tokio::test]
async fn test_mutually_linked_directories_converge_when_following_links() {
    let fixture = Fixture::new().await;
    fixture.write(&fixture.source, "a/one.txt", b"1").await;
    fixture.write(&fixture.source, "b/two.txt", b"2").await;
    fs::symlink("../b", fixture.source.join("a").join("tob")).await.unwrap();
    fs::symlink("../a", fixture.source.join("b").join("toa")).await.unwrap();

    let mut options = SyncOptions::default();
    options.preservation_options.symlinks = SymlinkPolicy::Follow;
    let engine = TreeSynchronizer::new(options, Arc::new(fixture.logger.clone()));

    let first = engine.synchronize(&fixture.source, &fixture.replica).await.unwrap();
    assert!(first.changes() > 0);
    let converged = snapshot(&fixture.replica);
    let depth = converged.keys().map(|path| path.components().count()).max().unwrap();
    assert!(depth <= 3, "replica nested {} levels deep", depth);

    for _ in 0..3 {
        let metrics = engine.synchronize(&fixture.source, &fixture.replica).await.unwrap();
        assert_eq!(metrics.changes(), 0);
        assert_eq!(metrics.files.failed, 2);
        assert_eq!(snapshot(&fixture.replica), converged);
    }
    assert!(fixture.logger.count_containing("own ancestors") >= 6);
}
