//! Filesystem scanning of checkpoint files.
//!
//! Scans are advisory input to reconciliation: they report what is on disk
//! without touching the catalog. Per-file metadata failures degrade to
//! `None` fields instead of dropping the file, so a scan still counts a
//! checkpoint it cannot stat.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::{Location, PathsConfig, Roots};
use crate::error::{Result, StashError};

/// Facts about one checkpoint file on disk.
#[derive(Debug, Clone)]
pub struct CheckpointFileInfo {
    pub filename: String,
    /// `None` when the metadata lookup failed but the file was seen.
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

fn is_checkpoint_name(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(PathsConfig::CHECKPOINT_EXTENSION)
}

/// List checkpoint files in a location's `Models/` directory, sorted by
/// filename. Only regular files with the checkpoint extension count.
pub async fn list_checkpoints(
    roots: &Roots,
    location: Location,
) -> Result<Vec<CheckpointFileInfo>> {
    let dir = roots.models_dir(location)?;
    let mut read_dir = fs::read_dir(&dir)
        .await
        .map_err(|e| StashError::io_read(e, &dir))?;

    let mut files = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| StashError::io_read(e, &dir))?
    {
        let path = entry.path();
        if !is_checkpoint_name(&path) {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let (size, modified) = match entry.metadata().await {
            Ok(meta) => {
                if !meta.is_file() {
                    continue;
                }
                let modified = meta.modified().ok().map(DateTime::<Utc>::from);
                (Some(meta.len()), modified)
            }
            Err(e) => {
                warn!("Could not stat {}: {}", path.display(), e);
                (None, None)
            }
        };

        files.push(CheckpointFileInfo {
            filename: filename.to_string(),
            size,
            modified,
        });
    }

    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    debug!(
        "Found {} checkpoint file(s) in {}",
        files.len(),
        dir.display()
    );
    Ok(files)
}

/// Whether the checkpoint file `filename` exists at `location`.
pub async fn checkpoint_exists(roots: &Roots, location: Location, filename: &str) -> bool {
    match roots.checkpoint_path(location, filename) {
        Ok(path) => fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false),
        Err(_) => false,
    }
}

/// Size in bytes of the checkpoint file `filename` at `location`, if it
/// exists and can be stat'd.
pub async fn checkpoint_size(roots: &Roots, location: Location, filename: &str) -> Option<u64> {
    let path = roots.checkpoint_path(location, filename).ok()?;
    let meta = fs::metadata(&path).await.ok()?;
    meta.is_file().then(|| meta.len())
}

/// Full path of a checkpoint at `location`, without checking existence.
pub fn checkpoint_path(roots: &Roots, location: Location, filename: &str) -> Result<PathBuf> {
    roots.checkpoint_path(location, filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_roots(dir: &TempDir) -> Roots {
        let mac = dir.path().join("mac");
        std::fs::create_dir_all(mac.join("Models")).unwrap();
        Roots::new(Some(mac), None)
    }

    #[tokio::test]
    async fn test_lists_only_checkpoint_files() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let models = roots.models_dir(Location::Mac).unwrap();

        std::fs::write(models.join("b.ckpt"), b"bb").unwrap();
        std::fs::write(models.join("a.ckpt"), b"a").unwrap();
        std::fs::write(models.join("notes.txt"), b"x").unwrap();
        std::fs::write(models.join("custom.json"), b"[]").unwrap();
        std::fs::create_dir(models.join("nested.ckpt")).unwrap();

        let files = list_checkpoints(&roots, Location::Mac).await.unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["a.ckpt", "b.ckpt"]);
        assert_eq!(files[0].size, Some(1));
        assert_eq!(files[1].size, Some(2));
        assert!(files[0].modified.is_some());
    }

    #[tokio::test]
    async fn test_missing_models_dir_is_an_error() {
        let dir = TempDir::new().unwrap();
        let roots = Roots::new(Some(dir.path().join("nowhere")), None);

        let err = list_checkpoints(&roots, Location::Mac).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_exists_and_size() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let models = roots.models_dir(Location::Mac).unwrap();
        std::fs::write(models.join("a.ckpt"), b"abc").unwrap();

        assert!(checkpoint_exists(&roots, Location::Mac, "a.ckpt").await);
        assert!(!checkpoint_exists(&roots, Location::Mac, "b.ckpt").await);
        assert!(!checkpoint_exists(&roots, Location::Stash, "a.ckpt").await);
        assert_eq!(
            checkpoint_size(&roots, Location::Mac, "a.ckpt").await,
            Some(3)
        );
        assert_eq!(checkpoint_size(&roots, Location::Mac, "b.ckpt").await, None);
    }
}
