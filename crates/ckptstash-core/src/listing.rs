//! Reading and rewriting the host application's listing files.
//!
//! Each listed kind has one JSON file under `<root>/Models/` holding an
//! array of entries. Array position is display order. The host owns these
//! files, so two rules apply everywhere: only the Mac copy is ever written,
//! and fields this library does not model must survive a rewrite untouched.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tracing::debug;

use crate::catalog::record::ComponentRefs;
use crate::config::{Location, ModelKind, Roots};
use crate::error::{Result, StashError};
use crate::persist;

/// One entry of a listing file.
///
/// Known fields are typed; everything else the host stores rides along in
/// `extra` so a rewrite round-trips data this library knows nothing about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingEntry {
    /// Checkpoint filename. Entries without one are legal in the host's
    /// files; they keep their array position but are invisible to scans.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// LoRA weight as the host stores it (e.g. 0.75).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vae: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_encoder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_encoder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refiner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upscaler: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ListingEntry {
    /// Dependency references carried by this entry.
    pub fn component_refs(&self) -> ComponentRefs {
        ComponentRefs {
            vae: self.vae.clone(),
            clip_encoder: self.clip_encoder.clone(),
            text_encoder: self.text_encoder.clone(),
            refiner: self.refiner.clone(),
            upscaler: self.upscaler.clone(),
        }
    }

    /// Copy dependency references into this entry.
    pub fn set_component_refs(&mut self, refs: &ComponentRefs) {
        self.vae = refs.vae.clone();
        self.clip_encoder = refs.clip_encoder.clone();
        self.text_encoder = refs.text_encoder.clone();
        self.refiner = refs.refiner.clone();
        self.upscaler = refs.upscaler.clone();
    }
}

fn listing_path(roots: &Roots, location: Location, kind: ModelKind) -> Result<PathBuf> {
    let filename = kind
        .listing_filename()
        .ok_or_else(|| StashError::Other(format!("no listing file for {kind} checkpoints")))?;
    Ok(roots.models_dir(location)?.join(filename))
}

/// Read and decode the listing for `kind` at `location`.
///
/// Returns `Ok(None)` when the file does not exist; a file that exists but
/// does not parse is an error, taken all-or-nothing.
pub async fn read_listing(
    roots: &Roots,
    location: Location,
    kind: ModelKind,
) -> Result<Option<Vec<ListingEntry>>> {
    let path = listing_path(roots, location, kind)?;
    let raw = match fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StashError::io_read(e, &path)),
    };

    let value: Value = serde_json::from_str(&raw).map_err(|e| StashError::parse_at(e, &path))?;
    let Value::Array(items) = value else {
        return Err(StashError::InvalidStructure {
            path,
            message: "expected a top-level JSON array".to_string(),
        });
    };

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let entry: ListingEntry =
            serde_json::from_value(item).map_err(|e| StashError::parse_at(e, &path))?;
        entries.push(entry);
    }
    debug!(
        "Read {} listing entries from {}",
        entries.len(),
        path.display()
    );
    Ok(Some(entries))
}

/// Rewrite the listing for `kind` atomically, keeping a `.bak` of the
/// previous contents. Only the Mac listing may be written.
pub async fn write_listing(
    roots: &Roots,
    location: Location,
    kind: ModelKind,
    entries: &[ListingEntry],
) -> Result<()> {
    if location != Location::Mac {
        return Err(StashError::ReadOnlyTarget(location));
    }
    let path = listing_path(roots, location, kind)?;
    persist::write_json_atomic(&path, &entries, true)?;
    debug!(
        "Wrote {} listing entries to {}",
        entries.len(),
        path.display()
    );
    Ok(())
}
