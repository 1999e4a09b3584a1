//! Streaming checksum computation for checkpoint files.
//!
//! Checkpoints run to tens of gigabytes, so hashing reads in fixed chunks
//! and runs on the blocking pool rather than loading the file into memory
//! or stalling the async runtime.

use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::task;
use tracing::debug;

use crate::error::{Result, StashError};

/// Chunk size for reading files (8MB, optimal for SSDs).
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Compute the SHA-256 of a file as a lowercase hex string.
///
/// Synchronous; prefer [`compute_sha256`] from async contexts.
pub fn compute_sha256_blocking(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| StashError::io_read(e, path))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| StashError::io_read(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let digest = hex::encode(hasher.finalize());
    debug!("Hashed {}: {}", path.display(), digest);
    Ok(digest)
}

/// Compute the SHA-256 of a file on the blocking pool.
pub async fn compute_sha256(path: impl Into<PathBuf>) -> Result<String> {
    let path = path.into();
    task::spawn_blocking(move || compute_sha256_blocking(&path))
        .await
        .map_err(|e| StashError::Other(format!("Hashing task failed: {}", e)))?
}
