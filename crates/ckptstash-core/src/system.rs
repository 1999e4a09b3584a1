//! Disk space queries.
//!
//! Copies are guarded by a free-space check on the destination volume, and
//! the Stash typically lives on a removable drive, so space is resolved per
//! path, not per system.

use std::path::Path;

use serde::Serialize;
use sysinfo::Disks;
use tracing::debug;

use crate::error::{Result, StashError};

/// Disk space information for one volume, in bytes.
#[derive(Debug, Clone, Serialize)]
pub struct DiskSpaceInfo {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    /// Used percentage, rounded to one decimal.
    pub percent: f32,
}

fn info_for_disk(disk: &sysinfo::Disk) -> DiskSpaceInfo {
    let total = disk.total_space();
    let free = disk.available_space();
    let used = total.saturating_sub(free);
    let percent = if total > 0 {
        (used as f32 / total as f32) * 100.0
    } else {
        0.0
    };

    DiskSpaceInfo {
        total,
        used,
        free,
        percent: (percent * 10.0).round() / 10.0,
    }
}

/// Disk space for the volume containing `path`.
///
/// The containing volume is the disk with the longest mount point that
/// prefixes `path`, so `/Volumes/Extreme2Tb/...` resolves to the external
/// drive rather than `/`. Falls back to the first disk when nothing
/// matches (the path may not exist yet).
pub fn disk_space_for_path(path: &Path) -> Result<DiskSpaceInfo> {
    let disks = Disks::new_with_refreshed_list();
    let path_str = path.to_string_lossy();

    let mut best_match: Option<(&sysinfo::Disk, usize)> = None;
    for disk in disks.list() {
        let mount_point = disk.mount_point().to_string_lossy();
        if path_str.starts_with(mount_point.as_ref()) {
            let match_len = mount_point.len();
            if best_match.map_or(true, |(_, len)| match_len > len) {
                best_match = Some((disk, match_len));
            }
        }
    }

    if let Some((disk, _)) = best_match {
        let info = info_for_disk(disk);
        debug!(
            "Disk for {}: mounted at {}, {} bytes free",
            path.display(),
            disk.mount_point().display(),
            info.free
        );
        return Ok(info);
    }

    if let Some(disk) = disks.list().first() {
        return Ok(info_for_disk(disk));
    }

    Err(StashError::Other(format!(
        "No disk information available for path: {}",
        path.display()
    )))
}
