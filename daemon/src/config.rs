use anyhow::{Context, Result};
use clap::Args;
use replica_sync::{ComparisonMode, DigestAlgorithm, PreservationOptions, SymlinkPolicy, SyncOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents of the optional TOML configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub mirror: MirrorSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica: Option<PathBuf>,
    /// Seconds between the end of one pass and the start of the next
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_interval_secs: Option<u64>,
    #[serde(default)]
    pub digest: DigestAlgorithm,
    /// Hash only this many leading bytes of each file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_bytes: Option<u64>,
    #[serde(default)]
    pub symlinks: SymlinkPolicy,
    #[serde(default = "default_preserve_mtime")]
    pub preserve_mtime: bool,
    #[serde(default = "default_preserve_permissions")]
    pub preserve_permissions: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file_path: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Mirror the log to stderr as well
    #[serde(default)]
    pub console: bool,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            source: None,
            replica: None,
            sync_interval_secs: None,
            digest: DigestAlgorithm::default(),
            prefix_bytes: None,
            symlinks: SymlinkPolicy::default(),
            preserve_mtime: default_preserve_mtime(),
            preserve_permissions: default_preserve_permissions(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_file_path: None,
            log_level: default_log_level(),
            console: false,
        }
    }
}

/// Command-line flags; every one overrides its file counterpart
#[derive(Debug, Clone, Default, Args)]
pub struct MirrorArgs {
    /// Folder to mirror from
    #[arg(long, global = true)]
    pub source: Option<PathBuf>,

    /// Folder to mirror into
    #[arg(long, global = true)]
    pub replica: Option<PathBuf>,

    /// File the audit log is appended to
    #[arg(long, global = true)]
    pub log_file_path: Option<PathBuf>,

    /// Seconds to wait between passes
    #[arg(long, global = true)]
    pub sync_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Digest used to compare files
    #[arg(long, global = true, value_parser = parse_digest)]
    pub digest: Option<DigestAlgorithm>,

    /// Hash only the first N bytes of each file (misses later edits)
    #[arg(long, global = true, value_name = "N", num_args = 0..=1, default_missing_value = "2048")]
    pub prefix_bytes: Option<u64>,

    /// Copy what symlinks point at instead of the links themselves
    #[arg(long, global = true)]
    pub follow_symlinks: bool,

    /// Do not copy modification times
    #[arg(long, global = true)]
    pub no_preserve_mtime: bool,

    /// Do not copy permission bits
    #[arg(long, global = true)]
    pub no_preserve_permissions: bool,

    /// Also write log lines to stderr
    #[arg(long, global = true)]
    pub console: bool,

    /// Run a single pass and exit
    #[arg(long, global = true)]
    pub once: bool,
}

/// Fully validated settings the daemon runs with
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub source: PathBuf,
    pub replica: PathBuf,
    pub log_file_path: PathBuf,
    pub interval: Duration,
    pub sync_options: SyncOptions,
    pub log_level: String,
    pub console: bool,
    pub once: bool,
}

impl DaemonConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))?;
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Template written by `config generate`
    pub fn example() -> Self {
        Self {
            mirror: MirrorSettings {
                source: Some(PathBuf::from("/path/to/source")),
                replica: Some(PathBuf::from("/path/to/replica")),
                sync_interval_secs: Some(60),
                ..MirrorSettings::default()
            },
            logging: LoggingSettings {
                log_file_path: Some(PathBuf::from("replica-daemon.log")),
                ..LoggingSettings::default()
            },
        }
    }

    pub fn apply_args(&mut self, args: &MirrorArgs) {
        if let Some(source) = &args.source {
            self.mirror.source = Some(source.clone());
        }
        if let Some(replica) = &args.replica {
            self.mirror.replica = Some(replica.clone());
        }
        if let Some(interval) = args.sync_interval {
            self.mirror.sync_interval_secs = Some(interval);
        }
        if let Some(digest) = args.digest {
            self.mirror.digest = digest;
        }
        if let Some(bytes) = args.prefix_bytes {
            self.mirror.prefix_bytes = Some(bytes);
        }
        if args.follow_symlinks {
            self.mirror.symlinks = SymlinkPolicy::Follow;
        }
        if args.no_preserve_mtime {
            self.mirror.preserve_mtime = false;
        }
        if args.no_preserve_permissions {
            self.mirror.preserve_permissions = false;
        }
        if let Some(path) = &args.log_file_path {
            self.logging.log_file_path = Some(path.clone());
        }
        if let Some(level) = &args.log_level {
            self.logging.log_level = level.clone();
        }
        if args.console {
            self.logging.console = true;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.resolve().map(|_| ())
    }

    /// Check that every required value is present and consistent
    pub fn resolve(&self) -> Result<RuntimeSettings> {
        let source = self
            .mirror
            .source
            .clone()
            .context("Source folder is required (--source)")?;
        let replica = self
            .mirror
            .replica
            .clone()
            .context("Replica folder is required (--replica)")?;
        let log_file_path = self
            .logging
            .log_file_path
            .clone()
            .context("Log file path is required (--log-file-path)")?;
        let interval_secs = self
            .mirror
            .sync_interval_secs
            .context("Sync interval is required (--sync-interval)")?;

        if interval_secs == 0 {
            anyhow::bail!("Sync interval must be at least one second");
        }
        if log_file_path.file_name().is_none() {
            anyhow::bail!("Log file path must name a file: {}", log_file_path.display());
        }
        if matches!(self.mirror.prefix_bytes, Some(0)) {
            anyhow::bail!("Prefix length must be at least one byte");
        }

        let source_abs = absolute(&source);
        let replica_abs = absolute(&replica);
        if source_abs == replica_abs {
            anyhow::bail!("Source and replica must be different folders: {}", source.display());
        }
        if replica_abs.starts_with(&source_abs) {
            anyhow::bail!(
                "Replica {} must not be inside source {}",
                replica.display(),
                source.display()
            );
        }
        if source_abs.starts_with(&replica_abs) {
            anyhow::bail!(
                "Source {} must not be inside replica {}",
                source.display(),
                replica.display()
            );
        }

        Ok(RuntimeSettings {
            source,
            replica,
            log_file_path,
            interval: Duration::from_secs(interval_secs),
            sync_options: self.sync_options(),
            log_level: self.logging.log_level.clone(),
            console: self.logging.console,
            once: false,
        })
    }

    pub fn sync_options(&self) -> SyncOptions {
        let comparison_mode = match self.mirror.prefix_bytes {
            Some(bytes) => ComparisonMode::Prefix { bytes },
            None => ComparisonMode::FullContent,
        };

        SyncOptions {
            digest_algorithm: self.mirror.digest,
            comparison_mode,
            preservation_options: PreservationOptions {
                preserve_mtime: self.mirror.preserve_mtime,
                preserve_permissions: self.mirror.preserve_permissions,
                symlinks: self.mirror.symlinks,
            },
            ..SyncOptions::default()
        }
    }
}

/// Best-effort absolute form of `path`, resolving links when it exists
fn absolute(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => absolute(parent).join(name),
        _ if path.is_absolute() => path.to_path_buf(),
        _ => std::env::current_dir()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    }
}

fn parse_digest(value: &str) -> std::result::Result<DigestAlgorithm, String> {
    match value.to_lowercase().as_str() {
        "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
        "blake3" => Ok(DigestAlgorithm::Blake3),
        other => Err(format!("unknown digest '{}', expected sha256 or blake3", other)),
    }
}

fn default_preserve_mtime() -> bool { true }
fn default_preserve_permissions() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
