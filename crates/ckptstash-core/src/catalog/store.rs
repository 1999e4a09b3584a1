//! In-memory checkpoint catalog with JSON persistence.
//!
//! The catalog is the single shared mutable state of the library: one record
//! per filename across both locations. It persists as a JSON array under the
//! Stash `App_Data` directory; a missing or corrupt snapshot degrades to an
//! empty catalog so a broken file never blocks startup.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::catalog::record::CheckpointRecord;
use crate::config::{Location, ModelKind};
use crate::error::Result;
use crate::persist;

/// Repository of checkpoint records, keyed by filename.
pub struct CheckpointCatalog {
    records: RwLock<BTreeMap<String, CheckpointRecord>>,
}

impl CheckpointCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load a catalog snapshot from `path`.
    ///
    /// A missing file yields an empty catalog; a corrupt one is logged and
    /// likewise degrades to empty rather than failing startup.
    pub fn load_or_default(path: &Path) -> Self {
        let records: Vec<CheckpointRecord> = match persist::read_json(path) {
            Ok(Some(records)) => records,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Could not load catalog from {}: {}", path.display(), e);
                Vec::new()
            }
        };

        debug!(
            "Loaded catalog with {} record(s) from {}",
            records.len(),
            path.display()
        );
        let map = records.into_iter().map(|r| (r.filename.clone(), r)).collect();
        Self {
            records: RwLock::new(map),
        }
    }

    /// Persist the catalog to `path` as a JSON array, atomically.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        let snapshot = self.all().await;
        persist::write_json_atomic(path, &snapshot, true)
    }

    // ========================================
    // Read accessors
    // ========================================

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn contains(&self, filename: &str) -> bool {
        self.records.read().await.contains_key(filename)
    }

    /// Look up a single record by filename.
    pub async fn find(&self, filename: &str) -> Option<CheckpointRecord> {
        self.records.read().await.get(filename).cloned()
    }

    /// All records, ordered by filename.
    pub async fn all(&self) -> Vec<CheckpointRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Records of `kind` present at `location`.
    ///
    /// Mac results come back in display order; Stash results by filename
    /// (the Stash has no ordering of its own).
    pub async fn by_kind_and_location(
        &self,
        kind: ModelKind,
        location: Location,
    ) -> Vec<CheckpointRecord> {
        let mut records: Vec<CheckpointRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.model_type == kind && r.exists_at(location))
            .cloned()
            .collect();

        if location == Location::Mac {
            records.sort_by(|a, b| {
                a.mac_display_order
                    .cmp(&b.mac_display_order)
                    .then_with(|| a.filename.cmp(&b.filename))
            });
        }
        records
    }

    /// Records present at `location`, any kind, ordered by filename.
    pub async fn at_location(&self, location: Location) -> Vec<CheckpointRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.exists_at(location))
            .cloned()
            .collect()
    }

    // ========================================
    // Mutators
    // ========================================

    /// Insert a record, replacing any existing record with the same
    /// filename. Callers that need merge semantics should `update` instead.
    pub async fn insert(&self, record: CheckpointRecord) {
        self.records
            .write()
            .await
            .insert(record.filename.clone(), record);
    }

    /// Apply `f` to the record for `filename`, bumping `updated_at`.
    ///
    /// Returns false when no such record exists.
    pub async fn update<F>(&self, filename: &str, f: F) -> bool
    where
        F: FnOnce(&mut CheckpointRecord),
    {
        let mut records = self.records.write().await;
        match records.get_mut(filename) {
            Some(record) => {
                f(record);
                record.touch();
                true
            }
            None => false,
        }
    }

    /// Remove a record outright.
    pub async fn remove(&self, filename: &str) -> Option<CheckpointRecord> {
        self.records.write().await.remove(filename)
    }

    /// Clear presence at `location` for `filename`.
    ///
    /// A record whose last presence flag was just cleared is dropped from
    /// the catalog entirely. Returns `Some(dropped)` when the record
    /// existed, `None` otherwise.
    pub async fn clear_presence(&self, filename: &str, location: Location) -> Option<bool> {
        let mut records = self.records.write().await;
        let record = records.get_mut(filename)?;
        record.mark_absent(location);
        record.touch();

        if record.is_anywhere() {
            Some(false)
        } else {
            records.remove(filename);
            Some(true)
        }
    }
}

impl Default for CheckpointCatalog {
    fn default() -> Self {
        Self::new()
    }
}
