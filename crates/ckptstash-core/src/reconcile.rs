//! Reconciling the catalog with the host's listings and the Stash.
//!
//! The Mac listing files are the source of truth for what the host shows:
//! a scan mirrors each listing into the catalog (array position becomes
//! `mac_display_order`), then flips `exists_mac` off for catalog records
//! the listing no longer names. The Stash has no listing, so its scan works
//! from the directory contents alone and classifies unknown files by name.
//!
//! A listing that is absent reconciles to a zero summary and detects no
//! deletions; a listing that is present but malformed fails the pass
//! without touching the catalog.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::catalog::{scaled_strength, CheckpointCatalog, CheckpointRecord};
use crate::config::{Location, ModelKind, Roots};
use crate::error::{ItemError, Result};
use crate::listing::{self, ListingEntry};
use crate::scanner;

/// Outcome of one Mac listing pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    /// Listing entries that named a file.
    pub found: usize,
    /// New catalog records created.
    pub imported: usize,
    /// Entries whose record already existed (refreshed in place).
    pub skipped: usize,
    pub errors: Vec<ItemError>,
}

/// Outcome of a Stash directory pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StashScanSummary {
    /// Checkpoint files seen in the Stash.
    pub found: usize,
    /// Known records newly marked present in the Stash.
    pub updated: usize,
    /// New records created for files the catalog had never seen.
    pub imported: usize,
    pub errors: Vec<ItemError>,
}

/// Combined outcome of a full rescan.
///
/// A pass that failed outright is `None` here, with the failure recorded
/// in `errors` under the listing filename.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RescanSummary {
    pub model: Option<ScanSummary>,
    pub lora: Option<ScanSummary>,
    pub control: Option<ScanSummary>,
    pub stash: Option<StashScanSummary>,
    pub errors: Vec<ItemError>,
}

/// Guess a checkpoint's kind from its filename.
///
/// Advisory only; a listing pass that names the file later overrides the
/// guess with the real kind. Substring checks run lora first so a
/// controlnet lora classifies as a lora.
pub fn classify_filename(filename: &str) -> Option<ModelKind> {
    let lower = filename.to_lowercase();
    if lower.contains("lora") {
        Some(ModelKind::Lora)
    } else if lower.contains("control") {
        Some(ModelKind::Control)
    } else if std::path::Path::new(&lower)
        .extension()
        .and_then(|e| e.to_str())
        == Some(crate::config::PathsConfig::CHECKPOINT_EXTENSION)
    {
        Some(ModelKind::Model)
    } else {
        None
    }
}

/// Sizes of the checkpoint files actually on disk, keyed by filename.
///
/// A scan failure degrades to an empty map: reconciliation then imports
/// listing entries without sizes rather than failing the pass.
async fn mac_size_map(roots: &Roots) -> HashMap<String, u64> {
    match scanner::list_checkpoints(roots, Location::Mac).await {
        Ok(files) => files
            .into_iter()
            .filter_map(|f| f.size.map(|size| (f.filename, size)))
            .collect(),
        Err(e) => {
            warn!("Could not scan Mac Models directory for sizes: {}", e);
            HashMap::new()
        }
    }
}

fn apply_listing_entry(
    record: &mut CheckpointRecord,
    entry: &ListingEntry,
    kind: ModelKind,
    order: u32,
    size: Option<u64>,
    source_path: &str,
) {
    record.mark_mac_present(order);
    record.display_name_original = entry.name.clone();
    record.model_type = kind;
    record.type_hint = None;
    record.components = entry.component_refs();
    record.source_path = Some(source_path.to_string());
    if kind == ModelKind::Lora {
        record.lora_strength = entry.strength.map(scaled_strength);
    }
    if let Some(size) = size {
        record.file_size = Some(size);
    }
}

/// Reconcile the catalog with the Mac listing for `kind`.
///
/// Missing listing file: zero summary, nothing mutated, no deletion
/// detection (an absent listing is not evidence the checkpoints are gone).
/// Malformed listing: error, nothing mutated.
pub async fn scan_mac(
    catalog: &CheckpointCatalog,
    roots: &Roots,
    kind: ModelKind,
) -> Result<ScanSummary> {
    let Some(entries) = listing::read_listing(roots, Location::Mac, kind).await? else {
        debug!("No {} listing on Mac, skipping pass", kind);
        return Ok(ScanSummary::default());
    };

    let size_map = mac_size_map(roots).await;
    let mut summary = ScanSummary::default();
    let mut seen: HashSet<String> = HashSet::new();

    for (index, entry) in entries.iter().enumerate() {
        if entry.file.is_empty() {
            let label = entry
                .name
                .clone()
                .unwrap_or_else(|| format!("entry {}", index));
            summary.errors.push(ItemError {
                filename: label,
                error: "listing entry has no file field".to_string(),
            });
            continue;
        }

        let filename = entry.file.clone();
        summary.found += 1;
        seen.insert(filename.clone());

        let order = index as u32;
        let size = size_map.get(&filename).copied();
        let source_path = roots
            .checkpoint_path(Location::Mac, &filename)?
            .to_string_lossy()
            .into_owned();

        let updated = catalog
            .update(&filename, |record| {
                apply_listing_entry(record, entry, kind, order, size, &source_path);
            })
            .await;

        if updated {
            summary.skipped += 1;
        } else {
            let mut record = CheckpointRecord::new(&filename, kind);
            apply_listing_entry(&mut record, entry, kind, order, size, &source_path);
            catalog.insert(record).await;
            summary.imported += 1;
        }
    }

    // Records of this kind the listing no longer names were deleted on the
    // host side. Presence flips off; the record itself stays so the Stash
    // copy (or the deletion itself) remains visible.
    let stale: Vec<String> = catalog
        .all()
        .await
        .into_iter()
        .filter(|r| r.model_type == kind && r.exists_mac && !seen.contains(&r.filename))
        .map(|r| r.filename)
        .collect();
    for filename in stale {
        debug!("{} left the {} listing, clearing Mac presence", filename, kind);
        catalog
            .update(&filename, |record| record.mark_absent(Location::Mac))
            .await;
    }

    info!(
        "Mac {} scan: found={} imported={} skipped={} errors={}",
        kind,
        summary.found,
        summary.imported,
        summary.skipped,
        summary.errors.len()
    );
    Ok(summary)
}

/// Reconcile the catalog with the Stash's `Models/` directory.
///
/// Files unknown to the catalog import as `Unknown` with a filename-based
/// type hint. Records marked present in the Stash whose file is gone flip
/// to absent. An unreadable directory yields a summary-level error and no
/// reverse sync (absence of evidence is not evidence of deletion).
pub async fn scan_stash(catalog: &CheckpointCatalog, roots: &Roots) -> Result<StashScanSummary> {
    let models_dir = roots.models_dir(Location::Stash)?;
    let mut summary = StashScanSummary::default();

    let files = match scanner::list_checkpoints(roots, Location::Stash).await {
        Ok(files) => files,
        Err(e) => {
            warn!("Could not scan Stash Models directory: {}", e);
            summary
                .errors
                .push(ItemError::new(models_dir.to_string_lossy(), &e));
            return Ok(summary);
        }
    };

    summary.found = files.len();
    let mut seen: HashSet<String> = HashSet::new();

    for file in files {
        seen.insert(file.filename.clone());

        if let Some(existing) = catalog.find(&file.filename).await {
            let newly_present = !existing.exists_stash;
            catalog
                .update(&file.filename, |record| {
                    record.exists_stash = true;
                    if let Some(size) = file.size {
                        record.file_size = Some(size);
                    }
                })
                .await;
            if newly_present {
                summary.updated += 1;
            }
        } else {
            let source_path = roots
                .checkpoint_path(Location::Stash, &file.filename)?
                .to_string_lossy()
                .into_owned();
            let mut record = CheckpointRecord::new(&file.filename, ModelKind::Unknown);
            record.type_hint = classify_filename(&file.filename);
            record.exists_stash = true;
            record.file_size = file.size;
            record.source_path = Some(source_path);
            catalog.insert(record).await;
            summary.imported += 1;
        }
    }

    let stale: Vec<String> = catalog
        .all()
        .await
        .into_iter()
        .filter(|r| r.exists_stash && !seen.contains(&r.filename))
        .map(|r| r.filename)
        .collect();
    for filename in stale {
        debug!("{} no longer in the Stash, clearing presence", filename);
        catalog
            .update(&filename, |record| record.mark_absent(Location::Stash))
            .await;
    }

    info!(
        "Stash scan: found={} updated={} imported={} errors={}",
        summary.found,
        summary.updated,
        summary.imported,
        summary.errors.len()
    );
    Ok(summary)
}

/// Run every reconciliation pass: the three Mac listings in listing order,
/// then the Stash.
///
/// A pass failure is recorded and the remaining passes still run; the
/// summary says which passes completed. Checks `cancel` between passes.
pub async fn rescan_all(
    catalog: &CheckpointCatalog,
    roots: &Roots,
    cancel: &CancelToken,
) -> Result<RescanSummary> {
    let mut summary = RescanSummary::default();

    for kind in ModelKind::LISTED {
        cancel.check()?;
        match scan_mac(catalog, roots, kind).await {
            Ok(pass) => {
                let slot = match kind {
                    ModelKind::Model => &mut summary.model,
                    ModelKind::Lora => &mut summary.lora,
                    ModelKind::Control => &mut summary.control,
                    ModelKind::Unknown => unreachable!("not a listed kind"),
                };
                *slot = Some(pass);
            }
            Err(e) => {
                let label = kind.listing_filename().unwrap_or("listing");
                warn!("{} pass failed: {}", label, e);
                summary.errors.push(ItemError::new(label, &e));
            }
        }
    }

    cancel.check()?;
    match scan_stash(catalog, roots).await {
        Ok(pass) => summary.stash = Some(pass),
        Err(e) => {
            warn!("Stash pass failed: {}", e);
            summary.errors.push(ItemError::new("stash", &e));
        }
    }

    Ok(summary)
}
