//! Content comparison by cryptographic digest

use std::path::Path;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, SyncError};

/// Default window for [`ComparisonMode::Prefix`]
pub const DEFAULT_PREFIX_BYTES: u64 = 2 * 1024;

/// Digest algorithms supported for content comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256 hash
    #[default]
    Sha256,
    /// Blake3 hash (faster)
    Blake3,
}

/// How much of each file is fed to the digest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonMode {
    /// Hash the entire byte stream
    #[default]
    FullContent,
    /// Hash only the first `bytes` bytes.
    ///
    /// Unsound: two files of equal size that differ only after the window
    /// are reported as identical and the replica keeps the stale copy.
    Prefix { bytes: u64 },
}

/// Decides whether two files hold the same content
#[derive(Debug, Clone)]
pub struct ContentComparator {
    algorithm: DigestAlgorithm,
    mode: ComparisonMode,
    /// Read buffer size
    buffer_size: usize,
}

impl Default for ContentComparator {
    fn default() -> Self {
        Self::new(DigestAlgorithm::default(), ComparisonMode::default())
    }
}

impl ContentComparator {
    pub fn new(algorithm: DigestAlgorithm, mode: ComparisonMode) -> Self {
        Self {
            algorithm,
            mode,
            buffer_size: 64 * 1024, // 64KB buffer
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn mode(&self) -> ComparisonMode {
        self.mode
    }

    /// Returns `true` when both files are considered byte-identical.
    ///
    /// Files of different length are different without being read. Any read
    /// failure is returned as [`SyncError::DigestRead`] so the caller can
    /// skip the entry instead of acting on an ambiguous answer.
    pub async fn equal(&self, source: impl AsRef<Path>, replica: impl AsRef<Path>) -> Result<bool> {
        let source = source.as_ref();
        let replica = replica.as_ref();

        let source_len = file_len(source).await?;
        let replica_len = file_len(replica).await?;
        if source_len != replica_len {
            return Ok(false);
        }

        let source_digest = self.digest(source).await?;
        let replica_digest = self.digest(replica).await?;
        Ok(source_digest == replica_digest)
    }

    /// Hex digest of the file under the configured algorithm and mode
    pub async fn digest(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let file = fs::File::open(path).await.map_err(|e| {
            SyncError::digest_error(path, format!("Failed to open file: {}", e))
        })?;

        match self.mode {
            ComparisonMode::FullContent => self.hash_reader(path, file).await,
            ComparisonMode::Prefix { bytes } => self.hash_reader(path, file.take(bytes)).await,
        }
    }

    async fn hash_reader<R: AsyncRead + Unpin>(&self, path: &Path, mut reader: R) -> Result<String> {
        let mut hasher = ContentHasher::new(self.algorithm);
        let mut buffer = vec![0u8; self.buffer_size];

        loop {
            let bytes_read = reader.read(&mut buffer).await.map_err(|e| {
                SyncError::digest_error(path, format!("Failed to read file: {}", e))
            })?;

            if bytes_read == 0 {
                break;
            }

            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.finalize_hex())
    }
}

async fn file_len(path: &Path) -> Result<u64> {
    fs::metadata(path)
        .await
        .map(|metadata| metadata.len())
        .map_err(|e| SyncError::digest_error(path, format!("Failed to read metadata: {}", e)))
}

enum ContentHasher {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl ContentHasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            DigestAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(hasher) => hasher.update(data),
            Self::Blake3(hasher) => {
                hasher.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(hasher) => format!("{:x}", hasher.finalize()),
            Self::Blake3(hasher) => hasher.finalize().to_hex().to_string(),
        }
    }
}
