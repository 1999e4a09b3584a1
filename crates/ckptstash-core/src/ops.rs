//! Checkpoint lifecycle operations: copy, delete, prune, reorder, edit.
//!
//! Every destructive operation runs its guards before touching the
//! filesystem: the dependency check first (a referenced checkpoint is
//! never deleted), then for Mac deletes the independent-copy check (the
//! file must exist in the Stash on disk, the catalog's word is not
//! enough). Bulk operations apply the same guards per item and accumulate
//! failures instead of aborting.

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::catalog::{scaled_strength, CheckpointCatalog};
use crate::config::{Location, ModelKind, Roots};
use crate::deps;
use crate::error::{ItemError, Result, StashError};
use crate::listing::{self, ListingEntry};
use crate::scanner;
use crate::system;

/// Outcome of [`prune_mac`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneSummary {
    /// Orphans that qualified for pruning.
    pub attempted: usize,
    /// Orphans now in the Stash and no longer on the Mac.
    pub moved: usize,
    /// Bytes freed on the Mac side.
    pub space_freed: u64,
    pub errors: Vec<ItemError>,
}

/// Outcome of [`delete_orphans`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteOrphansSummary {
    pub attempted: usize,
    pub deleted: usize,
    pub space_freed: u64,
    pub errors: Vec<ItemError>,
}

/// Copy a checkpoint file between locations.
///
/// Pure file transfer: presence flags are the caller's to update once it
/// knows what the copy was for. Fails without touching anything when the
/// source is missing, the destination already has the file, or the
/// destination volume is too small for it.
///
/// Returns the number of bytes copied.
pub async fn copy_checkpoint(
    roots: &Roots,
    src: Location,
    dst: Location,
    filename: &str,
) -> Result<u64> {
    if src == dst {
        return Err(StashError::SameLocation);
    }

    let src_path = roots.checkpoint_path(src, filename)?;
    let dst_path = roots.checkpoint_path(dst, filename)?;

    let meta = fs::metadata(&src_path)
        .await
        .map_err(|e| StashError::io_read(e, &src_path))?;
    if !meta.is_file() {
        return Err(StashError::FileNotFound(src_path));
    }
    let size = meta.len();

    if fs::metadata(&dst_path).await.is_ok() {
        return Err(StashError::AlreadyExists(dst_path));
    }

    let dst_root = roots.root(dst)?;
    match system::disk_space_for_path(dst_root) {
        Ok(space) if size > space.free => {
            return Err(StashError::InsufficientSpace {
                path: dst_root.to_path_buf(),
                needed: size,
                available: space.free,
            });
        }
        Ok(_) => {}
        Err(e) => warn!(
            "Could not check free space at {}: {}",
            dst_root.display(),
            e
        ),
    }

    let dst_dir = roots.models_dir(dst)?;
    fs::create_dir_all(&dst_dir)
        .await
        .map_err(|e| StashError::io_write(e, &dst_dir))?;

    let copied = fs::copy(&src_path, &dst_path)
        .await
        .map_err(|e| StashError::io_write(e, &dst_path))?;

    info!(
        "Copied {} from {} to {} ({} bytes)",
        filename, src, dst, copied
    );
    Ok(copied)
}

/// Delete a checkpoint file at `location` and clear its catalog presence.
///
/// Guards, in order: no other checkpoint may reference it, and a Mac
/// delete requires the file to exist in the Stash on disk. A record whose
/// last presence was just cleared leaves the catalog entirely.
///
/// Returns the number of bytes freed.
pub async fn delete_checkpoint(
    catalog: &CheckpointCatalog,
    roots: &Roots,
    location: Location,
    filename: &str,
) -> Result<u64> {
    let parents = deps::get_parents(catalog, filename).await;
    if !parents.is_empty() {
        return Err(StashError::DependencyExists {
            filename: filename.to_string(),
            parents,
        });
    }

    if location == Location::Mac
        && !scanner::checkpoint_exists(roots, Location::Stash, filename).await
    {
        return Err(StashError::OnlyCopyExists(filename.to_string()));
    }

    let path = roots.checkpoint_path(location, filename)?;
    let meta = fs::metadata(&path)
        .await
        .map_err(|e| StashError::io_read(e, &path))?;
    let size = meta.len();

    fs::remove_file(&path)
        .await
        .map_err(|e| StashError::io_write(e, &path))?;

    match catalog.clear_presence(filename, location).await {
        Some(true) => debug!("{} present nowhere, record dropped", filename),
        Some(false) => {}
        None => debug!("{} was not in the catalog", filename),
    }

    info!("Deleted {} from {} ({} bytes)", filename, location, size);
    Ok(size)
}

/// Move every unreferenced Mac checkpoint into the Stash.
///
/// Per item: copy to the Stash (skipped when the file is already there),
/// mark the Stash presence, then delete the Mac copy through the normal
/// guarded delete. A failed item is reported and the loop moves on; a
/// copy failure leaves the item entirely on the Mac, a delete failure
/// leaves it safely in both places. Checks `cancel` between items.
pub async fn prune_mac(
    catalog: &CheckpointCatalog,
    roots: &Roots,
    cancel: &CancelToken,
) -> Result<PruneSummary> {
    let mut candidates = Vec::new();
    for record in catalog.at_location(Location::Mac).await {
        if deps::is_orphan(catalog, &record.filename).await {
            candidates.push(record.filename);
        }
    }

    let mut summary = PruneSummary {
        attempted: candidates.len(),
        ..Default::default()
    };
    info!("Pruning {} orphaned Mac checkpoint(s)", candidates.len());

    for filename in candidates {
        cancel.check()?;

        if !scanner::checkpoint_exists(roots, Location::Stash, &filename).await {
            if let Err(e) = copy_checkpoint(roots, Location::Mac, Location::Stash, &filename).await
            {
                summary.errors.push(ItemError {
                    filename: filename.clone(),
                    error: format!("copy to stash failed: {}", e),
                });
                continue;
            }
        } else {
            debug!("{} already in the Stash, copy skipped", filename);
        }
        catalog
            .update(&filename, |record| record.exists_stash = true)
            .await;

        match delete_checkpoint(catalog, roots, Location::Mac, &filename).await {
            Ok(size) => {
                summary.moved += 1;
                summary.space_freed += size;
            }
            Err(e) => summary.errors.push(ItemError {
                filename: filename.clone(),
                error: format!("delete after copy failed: {}", e),
            }),
        }
    }

    info!(
        "Prune finished: attempted={} moved={} space_freed={} errors={}",
        summary.attempted,
        summary.moved,
        summary.space_freed,
        summary.errors.len()
    );
    Ok(summary)
}

/// Delete every unreferenced checkpoint at `location`.
///
/// Mac deletes still require a Stash copy; an orphan that exists only on
/// the Mac is reported, not deleted. Checks `cancel` between items.
pub async fn delete_orphans(
    catalog: &CheckpointCatalog,
    roots: &Roots,
    location: Location,
    cancel: &CancelToken,
) -> Result<DeleteOrphansSummary> {
    let mut candidates = Vec::new();
    for record in catalog.at_location(location).await {
        if deps::is_orphan(catalog, &record.filename).await {
            candidates.push(record.filename);
        }
    }

    let mut summary = DeleteOrphansSummary {
        attempted: candidates.len(),
        ..Default::default()
    };
    info!(
        "Deleting {} orphaned checkpoint(s) at {}",
        candidates.len(),
        location
    );

    for filename in candidates {
        cancel.check()?;
        match delete_checkpoint(catalog, roots, location, &filename).await {
            Ok(size) => {
                summary.deleted += 1;
                summary.space_freed += size;
            }
            Err(e) => summary.errors.push(ItemError::new(&filename, &e)),
        }
    }

    info!(
        "Orphan delete finished: attempted={} deleted={} space_freed={} errors={}",
        summary.attempted,
        summary.deleted,
        summary.space_freed,
        summary.errors.len()
    );
    Ok(summary)
}

/// Move `filename` to `new_position` in the Mac listing for `kind`.
///
/// Rewrites the listing, then resyncs `mac_display_order` for every
/// record of the rewritten listing from its new array positions, so the
/// catalog and the file cannot disagree. Positions past the end clamp to
/// the end.
pub async fn reorder(
    catalog: &CheckpointCatalog,
    roots: &Roots,
    kind: ModelKind,
    filename: &str,
    new_position: usize,
) -> Result<()> {
    let Some(mut entries) = listing::read_listing(roots, Location::Mac, kind).await? else {
        return Err(StashError::RecordNotFound(filename.to_string()));
    };

    let Some(current) = entries.iter().position(|e| e.file == filename) else {
        return Err(StashError::RecordNotFound(filename.to_string()));
    };

    let entry = entries.remove(current);
    let target = new_position.min(entries.len());
    entries.insert(target, entry);

    listing::write_listing(roots, Location::Mac, kind, &entries).await?;
    resync_orders(catalog, &entries).await;

    info!(
        "Moved {} to position {} in the {} listing",
        filename, target, kind
    );
    Ok(())
}

/// Mirror array positions of a just-written listing into the catalog.
async fn resync_orders(catalog: &CheckpointCatalog, entries: &[ListingEntry]) {
    for (index, entry) in entries.iter().enumerate() {
        if entry.file.is_empty() {
            continue;
        }
        catalog
            .update(&entry.file, |record| {
                record.mark_mac_present(index as u32);
            })
            .await;
    }
}

/// Shallow-merge `patch` into the listing entry for `filename`.
///
/// Patched keys replace the entry's values; keys the patch does not name
/// survive untouched, including fields this library does not model. The
/// `file` key is the entry's identity and cannot be patched. Modeled
/// fields (name, strength, component references) are mirrored into the
/// catalog record after the rewrite.
pub async fn set_checkpoint_fields(
    catalog: &CheckpointCatalog,
    roots: &Roots,
    kind: ModelKind,
    filename: &str,
    patch: Map<String, Value>,
) -> Result<()> {
    let Some(mut entries) = listing::read_listing(roots, Location::Mac, kind).await? else {
        return Err(StashError::RecordNotFound(filename.to_string()));
    };
    let Some(index) = entries.iter().position(|e| e.file == filename) else {
        return Err(StashError::RecordNotFound(filename.to_string()));
    };

    let mut merged = match serde_json::to_value(&entries[index]) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    for (key, value) in patch {
        if key == "file" {
            warn!("Ignoring attempt to patch the file key of {}", filename);
            continue;
        }
        merged.insert(key, value);
    }

    let updated: ListingEntry = serde_json::from_value(Value::Object(merged))
        .map_err(|e| StashError::Parse {
            message: e.to_string(),
            path: None,
        })?;
    entries[index] = updated.clone();

    listing::write_listing(roots, Location::Mac, kind, &entries).await?;

    catalog
        .update(filename, |record| {
            record.display_name_original = updated.name.clone();
            record.components = updated.component_refs();
            if kind == ModelKind::Lora {
                record.lora_strength = updated.strength.map(scaled_strength);
            }
        })
        .await;

    info!("Updated listing fields of {} in {}", filename, kind);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CheckpointRecord, ComponentRefs};
    use crate::reconcile;
    use tempfile::TempDir;

    fn test_roots(dir: &TempDir) -> Roots {
        let mac = dir.path().join("mac");
        let stash = dir.path().join("stash");
        std::fs::create_dir_all(mac.join("Models")).unwrap();
        std::fs::create_dir_all(stash.join("Models")).unwrap();
        Roots::new(Some(mac), Some(stash))
    }

    fn write_file(roots: &Roots, location: Location, filename: &str, contents: &[u8]) {
        let path = roots.checkpoint_path(location, filename).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn exists(roots: &Roots, location: Location, filename: &str) -> bool {
        roots
            .checkpoint_path(location, filename)
            .unwrap()
            .exists()
    }

    async fn mac_record(catalog: &CheckpointCatalog, filename: &str, order: u32) {
        let mut record = CheckpointRecord::new(filename, ModelKind::Model);
        record.mark_mac_present(order);
        catalog.insert(record).await;
    }

    #[tokio::test]
    async fn test_copy_same_location_rejected() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);

        let err = copy_checkpoint(&roots, Location::Mac, Location::Mac, "a.ckpt")
            .await
            .unwrap_err();
        assert!(matches!(err, StashError::SameLocation));
    }

    #[tokio::test]
    async fn test_copy_missing_source_rejected() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);

        let err = copy_checkpoint(&roots, Location::Mac, Location::Stash, "a.ckpt")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_copy_existing_destination_rejected() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        write_file(&roots, Location::Mac, "a.ckpt", b"mac");
        write_file(&roots, Location::Stash, "a.ckpt", b"old stash");

        let err = copy_checkpoint(&roots, Location::Mac, Location::Stash, "a.ckpt")
            .await
            .unwrap_err();
        assert!(matches!(err, StashError::AlreadyExists(_)));

        // Destination untouched.
        let contents = std::fs::read(
            roots
                .checkpoint_path(Location::Stash, "a.ckpt")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(contents, b"old stash");
    }

    #[tokio::test]
    async fn test_copy_transfers_bytes_and_nothing_else() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();
        write_file(&roots, Location::Mac, "a.ckpt", b"payload");
        mac_record(&catalog, "a.ckpt", 0).await;

        let copied = copy_checkpoint(&roots, Location::Mac, Location::Stash, "a.ckpt")
            .await
            .unwrap();
        assert_eq!(copied, 7);
        assert!(exists(&roots, Location::Stash, "a.ckpt"));
        assert!(exists(&roots, Location::Mac, "a.ckpt"));

        // Copy never flips presence flags; that is the caller's decision.
        let record = catalog.find("a.ckpt").await.unwrap();
        assert!(record.exists_mac);
        assert!(!record.exists_stash);
    }

    #[tokio::test]
    async fn test_copy_creates_destination_dir() {
        let dir = TempDir::new().unwrap();
        let mac = dir.path().join("mac");
        std::fs::create_dir_all(mac.join("Models")).unwrap();
        let roots = Roots::new(Some(mac), Some(dir.path().join("fresh_stash")));
        write_file(&roots, Location::Mac, "a.ckpt", b"x");

        copy_checkpoint(&roots, Location::Mac, Location::Stash, "a.ckpt")
            .await
            .unwrap();
        assert!(exists(&roots, Location::Stash, "a.ckpt"));
    }

    #[tokio::test]
    async fn test_delete_blocked_by_parents() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();

        let mut parent = CheckpointRecord::new("base.ckpt", ModelKind::Model);
        parent.mark_mac_present(0);
        parent.components = ComponentRefs {
            vae: Some("vae.ckpt".into()),
            ..Default::default()
        };
        catalog.insert(parent).await;
        mac_record(&catalog, "vae.ckpt", 1).await;
        write_file(&roots, Location::Mac, "vae.ckpt", b"vae");
        write_file(&roots, Location::Stash, "vae.ckpt", b"vae");

        let err = delete_checkpoint(&catalog, &roots, Location::Mac, "vae.ckpt")
            .await
            .unwrap_err();
        assert!(
            matches!(&err, StashError::DependencyExists { filename, parents }
                if filename == "vae.ckpt" && parents == &vec!["base.ckpt".to_string()])
        );

        // Nothing was deleted.
        assert!(exists(&roots, Location::Mac, "vae.ckpt"));
        assert!(catalog.find("vae.ckpt").await.unwrap().exists_mac);
    }

    #[tokio::test]
    async fn test_mac_delete_requires_stash_copy_on_disk() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();
        mac_record(&catalog, "only.ckpt", 0).await;
        write_file(&roots, Location::Mac, "only.ckpt", b"only copy");

        let err = delete_checkpoint(&catalog, &roots, Location::Mac, "only.ckpt")
            .await
            .unwrap_err();
        assert!(matches!(err, StashError::OnlyCopyExists(_)));
        assert!(exists(&roots, Location::Mac, "only.ckpt"));

        // With a Stash copy on disk the same delete goes through.
        write_file(&roots, Location::Stash, "only.ckpt", b"only copy");
        let freed = delete_checkpoint(&catalog, &roots, Location::Mac, "only.ckpt")
            .await
            .unwrap();
        assert_eq!(freed, 9);
        assert!(!exists(&roots, Location::Mac, "only.ckpt"));
        assert!(exists(&roots, Location::Stash, "only.ckpt"));

        let record = catalog.find("only.ckpt").await.unwrap();
        assert!(!record.exists_mac);
        assert_eq!(record.mac_display_order, None);
    }

    #[tokio::test]
    async fn test_stash_delete_of_last_copy_drops_record() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();

        let mut record = CheckpointRecord::new("stash_only.ckpt", ModelKind::Unknown);
        record.exists_stash = true;
        catalog.insert(record).await;
        write_file(&roots, Location::Stash, "stash_only.ckpt", b"zz");

        delete_checkpoint(&catalog, &roots, Location::Stash, "stash_only.ckpt")
            .await
            .unwrap();
        assert!(!exists(&roots, Location::Stash, "stash_only.ckpt"));
        assert!(catalog.find("stash_only.ckpt").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();

        let mut record = CheckpointRecord::new("ghost.ckpt", ModelKind::Model);
        record.exists_stash = true;
        catalog.insert(record).await;

        let err = delete_checkpoint(&catalog, &roots, Location::Stash, "ghost.ckpt")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        // The record is left alone; a scan will sort out reality.
        assert!(catalog.find("ghost.ckpt").await.is_some());
    }

    #[tokio::test]
    async fn test_prune_moves_orphans_and_survives_failures() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();

        for (i, name) in ["a.ckpt", "b.ckpt", "c.ckpt", "d.ckpt", "e.ckpt"]
            .iter()
            .enumerate()
        {
            mac_record(&catalog, name, i as u32).await;
            // c.ckpt is in the catalog but its file is gone: its copy fails.
            if *name != "c.ckpt" {
                write_file(&roots, Location::Mac, name, b"data");
            }
        }

        let summary = prune_mac(&catalog, &roots, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(summary.attempted, 5);
        assert_eq!(summary.moved, 4);
        assert_eq!(summary.space_freed, 16);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].filename, "c.ckpt");

        for name in ["a.ckpt", "b.ckpt", "d.ckpt", "e.ckpt"] {
            assert!(!exists(&roots, Location::Mac, name));
            assert!(exists(&roots, Location::Stash, name));
            let record = catalog.find(name).await.unwrap();
            assert!(!record.exists_mac);
            assert!(record.exists_stash);
        }

        // The failed item keeps its Mac presence claim.
        let c = catalog.find("c.ckpt").await.unwrap();
        assert!(c.exists_mac);
    }

    #[tokio::test]
    async fn test_prune_skips_parented_records_and_existing_copies() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();

        let mut parent = CheckpointRecord::new("base.ckpt", ModelKind::Model);
        parent.mark_mac_present(0);
        parent.components = ComponentRefs {
            vae: Some("vae.ckpt".into()),
            ..Default::default()
        };
        catalog.insert(parent).await;
        mac_record(&catalog, "vae.ckpt", 1).await;
        mac_record(&catalog, "solo.ckpt", 2).await;

        write_file(&roots, Location::Mac, "base.ckpt", b"base");
        write_file(&roots, Location::Mac, "vae.ckpt", b"vae");
        write_file(&roots, Location::Mac, "solo.ckpt", b"solo");
        // solo already has a Stash copy: the copy step is skipped.
        write_file(&roots, Location::Stash, "solo.ckpt", b"solo");

        let summary = prune_mac(&catalog, &roots, &CancelToken::new())
            .await
            .unwrap();

        // base is an orphan (nothing references it); vae is referenced.
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.moved, 2);
        assert!(exists(&roots, Location::Mac, "vae.ckpt"));
        assert!(!exists(&roots, Location::Mac, "base.ckpt"));
        assert!(!exists(&roots, Location::Mac, "solo.ckpt"));
        assert!(exists(&roots, Location::Stash, "solo.ckpt"));
    }

    #[tokio::test]
    async fn test_prune_cancelled_between_items() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();
        mac_record(&catalog, "a.ckpt", 0).await;
        write_file(&roots, Location::Mac, "a.ckpt", b"a");

        let cancel = CancelToken::new();
        cancel.cancel();

        let err = prune_mac(&catalog, &roots, &cancel).await.unwrap_err();
        assert!(matches!(err, StashError::Cancelled));
        assert!(exists(&roots, Location::Mac, "a.ckpt"));
    }

    #[tokio::test]
    async fn test_delete_orphans_respects_guards() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();

        mac_record(&catalog, "backed.ckpt", 0).await;
        mac_record(&catalog, "lonely.ckpt", 1).await;
        write_file(&roots, Location::Mac, "backed.ckpt", b"bb");
        write_file(&roots, Location::Stash, "backed.ckpt", b"bb");
        write_file(&roots, Location::Mac, "lonely.ckpt", b"lll");

        let summary = delete_orphans(&catalog, &roots, Location::Mac, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.space_freed, 2);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].filename, "lonely.ckpt");

        assert!(!exists(&roots, Location::Mac, "backed.ckpt"));
        assert!(exists(&roots, Location::Mac, "lonely.ckpt"));
    }

    #[tokio::test]
    async fn test_delete_orphans_in_stash() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();

        let mut orphan = CheckpointRecord::new("old_lora.ckpt", ModelKind::Lora);
        orphan.exists_stash = true;
        catalog.insert(orphan).await;
        write_file(&roots, Location::Stash, "old_lora.ckpt", b"xxxx");

        let summary = delete_orphans(&catalog, &roots, Location::Stash, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.space_freed, 4);
        assert!(catalog.find("old_lora.ckpt").await.is_none());
    }

    #[tokio::test]
    async fn test_reorder_rewrites_listing_and_orders() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();

        let listing_path = roots
            .models_dir(Location::Mac)
            .unwrap()
            .join("custom.json");
        std::fs::write(
            &listing_path,
            r#"[
                {"file": "a.ckpt", "version": "v1"},
                {"file": "b.ckpt"},
                {"file": "c.ckpt"}
            ]"#,
        )
        .unwrap();
        reconcile::scan_mac(&catalog, &roots, ModelKind::Model)
            .await
            .unwrap();

        reorder(&catalog, &roots, ModelKind::Model, "c.ckpt", 0)
            .await
            .unwrap();

        let entries = listing::read_listing(&roots, Location::Mac, ModelKind::Model)
            .await
            .unwrap()
            .unwrap();
        let files: Vec<&str> = entries.iter().map(|e| e.file.as_str()).collect();
        assert_eq!(files, vec!["c.ckpt", "a.ckpt", "b.ckpt"]);
        // Unknown fields survive the rewrite.
        assert_eq!(entries[1].extra.get("version"), Some(&Value::from("v1")));

        for (name, order) in [("c.ckpt", 0), ("a.ckpt", 1), ("b.ckpt", 2)] {
            assert_eq!(
                catalog.find(name).await.unwrap().mac_display_order,
                Some(order)
            );
        }
    }

    #[tokio::test]
    async fn test_reorder_clamps_past_end() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();

        let listing_path = roots
            .models_dir(Location::Mac)
            .unwrap()
            .join("custom.json");
        std::fs::write(&listing_path, r#"[{"file": "a.ckpt"}, {"file": "b.ckpt"}]"#).unwrap();
        reconcile::scan_mac(&catalog, &roots, ModelKind::Model)
            .await
            .unwrap();

        reorder(&catalog, &roots, ModelKind::Model, "a.ckpt", 99)
            .await
            .unwrap();

        let entries = listing::read_listing(&roots, Location::Mac, ModelKind::Model)
            .await
            .unwrap()
            .unwrap();
        let files: Vec<&str> = entries.iter().map(|e| e.file.as_str()).collect();
        assert_eq!(files, vec!["b.ckpt", "a.ckpt"]);
    }

    #[tokio::test]
    async fn test_reorder_unknown_entry_errors() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();

        let err = reorder(&catalog, &roots, ModelKind::Model, "nope.ckpt", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StashError::RecordNotFound(_)));

        let listing_path = roots
            .models_dir(Location::Mac)
            .unwrap()
            .join("custom.json");
        std::fs::write(&listing_path, r#"[{"file": "a.ckpt"}]"#).unwrap();
        let err = reorder(&catalog, &roots, ModelKind::Model, "nope.ckpt", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StashError::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn test_set_fields_merges_and_mirrors() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();

        let listing_path = roots
            .models_dir(Location::Mac)
            .unwrap()
            .join("custom_lora.json");
        std::fs::write(
            &listing_path,
            r#"[{"file": "detail.ckpt", "name": "Detail", "strength": 0.5, "prefix": "dtl"}]"#,
        )
        .unwrap();
        reconcile::scan_mac(&catalog, &roots, ModelKind::Lora)
            .await
            .unwrap();

        let mut patch = Map::new();
        patch.insert("strength".to_string(), Value::from(0.75));
        patch.insert("name".to_string(), Value::from("Detail v2"));
        set_checkpoint_fields(&catalog, &roots, ModelKind::Lora, "detail.ckpt", patch)
            .await
            .unwrap();

        let entries = listing::read_listing(&roots, Location::Mac, ModelKind::Lora)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entries[0].strength, Some(0.75));
        assert_eq!(entries[0].name.as_deref(), Some("Detail v2"));
        // Unpatched unknown key survives.
        assert_eq!(entries[0].extra.get("prefix"), Some(&Value::from("dtl")));

        let record = catalog.find("detail.ckpt").await.unwrap();
        assert_eq!(record.lora_strength, Some(8));
        assert_eq!(record.display_name_original.as_deref(), Some("Detail v2"));
    }

    #[tokio::test]
    async fn test_set_fields_cannot_patch_file_key() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();

        let listing_path = roots
            .models_dir(Location::Mac)
            .unwrap()
            .join("custom.json");
        std::fs::write(&listing_path, r#"[{"file": "a.ckpt"}]"#).unwrap();
        reconcile::scan_mac(&catalog, &roots, ModelKind::Model)
            .await
            .unwrap();

        let mut patch = Map::new();
        patch.insert("file".to_string(), Value::from("b.ckpt"));
        patch.insert("name".to_string(), Value::from("Renamed"));
        set_checkpoint_fields(&catalog, &roots, ModelKind::Model, "a.ckpt", patch)
            .await
            .unwrap();

        let entries = listing::read_listing(&roots, Location::Mac, ModelKind::Model)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entries[0].file, "a.ckpt");
        assert_eq!(entries[0].name.as_deref(), Some("Renamed"));
    }

    #[tokio::test]
    async fn test_set_fields_unknown_entry_errors() {
        let dir = TempDir::new().unwrap();
        let roots = test_roots(&dir);
        let catalog = CheckpointCatalog::new();

        let err = set_checkpoint_fields(
            &catalog,
            &roots,
            ModelKind::Model,
            "nope.ckpt",
            Map::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StashError::RecordNotFound(_)));
    }
}
