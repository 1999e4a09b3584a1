//! Atomic JSON persistence helpers.
//!
//! Used for the settings file, the settings backup, the catalog snapshot,
//! and listing rewrites. Writes go to a uniquely named temp sibling, are
//! validated by re-parsing, fsynced, then renamed over the target so a
//! crash never leaves a half-written file behind.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, StashError};

/// Monotonic suffix so concurrent writers in one process never collide.
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Read and parse a JSON file.
///
/// Returns `Ok(None)` when the file does not exist; parse failures are
/// reported with the offending path attached.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut file = File::open(path).map_err(|e| StashError::io_read(e, path))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| StashError::io_read(e, path))?;

    let data: T = serde_json::from_str(&contents).map_err(|e| StashError::parse_at(e, path))?;
    Ok(Some(data))
}

/// Write `data` to `path` as pretty-printed JSON, atomically.
///
/// Parent directories are created as needed. When `keep_backup` is set and
/// the target already exists, the previous content is copied to a `.bak`
/// sibling first; a backup failure is logged and does not fail the write.
pub fn write_json_atomic<T: Serialize>(path: &Path, data: &T, keep_backup: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| StashError::io_write(e, parent))?;
        }
    }

    let serialized =
        serde_json::to_string_pretty(data).map_err(|e| StashError::parse_at(e, path))?;

    // Re-parse before touching disk; a serialization bug must not be able
    // to clobber the previous good file.
    serde_json::from_str::<serde_json::Value>(&serialized)
        .map_err(|e| StashError::parse_at(e, path))?;

    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    let temp_path = path.with_extension(format!("json.{}.{}.tmp", process::id(), seq));

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| StashError::io_write(e, &temp_path))?;

        file.write_all(serialized.as_bytes())
            .map_err(|e| StashError::io_write(e, &temp_path))?;
        file.write_all(b"\n")
            .map_err(|e| StashError::io_write(e, &temp_path))?;
        file.sync_all()
            .map_err(|e| StashError::io_write(e, &temp_path))?;
    }

    if keep_backup && path.exists() {
        let backup_path = path.with_extension("json.bak");
        match fs::copy(path, &backup_path) {
            Ok(_) => debug!("Created backup: {}", backup_path.display()),
            Err(e) => warn!("Failed to create backup {}: {}", backup_path.display(), e),
        }
    }

    fs::rename(&temp_path, path).map_err(|e| {
        // Best effort; the stray temp file is harmless but ugly.
        let _ = fs::remove_file(&temp_path);
        StashError::io_write(e, path)
    })?;

    debug!("Atomically wrote {}", path.display());
    Ok(())
}
