//! ckptstash-core - Checkpoint reconciliation and lifecycle management for
//! Draw Things model files.
//!
//! The host application keeps its checkpoints (`.ckpt`) under a Mac
//! container directory and describes them in per-kind JSON listing files;
//! this crate mirrors those listings into a catalog, overflows files to a
//! Stash volume, and guards every delete behind dependency and
//! independent-copy checks. It is a headless library: [`StashApi`] is the
//! whole surface, with no UI or RPC layer attached.
//!
//! # Example
//!
//! ```rust,ignore
//! use ckptstash_core::{Location, ModelKind, StashApi};
//!
//! #[tokio::main]
//! async fn main() -> ckptstash_core::Result<()> {
//!     let api = StashApi::new().await?;
//!
//!     // Mirror the host's listings and the Stash into the catalog.
//!     let summary = api.rescan_all().await?;
//!     println!("loras imported: {:?}", summary.lora);
//!
//!     // Move every unreferenced checkpoint off the Mac.
//!     let pruned = api.prune_mac().await?;
//!     println!("freed {} bytes", pruned.space_freed);
//!
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod catalog;
pub mod config;
pub mod deps;
pub mod error;
pub mod hashing;
pub mod listing;
pub mod ops;
pub mod persist;
pub mod reconcile;
pub mod scanner;
pub mod settings;
pub mod system;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use catalog::{
    scaled_strength, CheckpointCatalog, CheckpointRecord, ComponentField, ComponentRefs,
};
pub use config::{Location, ModelKind, PathsConfig, Roots};
pub use error::{ItemError, Result, StashError};
pub use listing::ListingEntry;
pub use ops::{DeleteOrphansSummary, PruneSummary};
pub use reconcile::{RescanSummary, ScanSummary, StashScanSummary};
pub use scanner::CheckpointFileInfo;
pub use settings::{SaveReport, Settings, SettingsStore, SetupIssue};
pub use system::DiskSpaceInfo;

use std::path::PathBuf;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Main entry point for checkpoint management.
///
/// Owns the settings, the catalog, and a shared cancellation token for
/// bulk operations. Catalog changes persist to
/// `STASH_DIR/App_Data/catalog.json` after every mutating call,
/// best-effort: a persistence failure is logged, never raised, because the
/// catalog can always be rebuilt by a rescan.
pub struct StashApi {
    settings: SettingsStore,
    catalog: CheckpointCatalog,
    /// Serializes listing rewrites so two edits cannot interleave their
    /// read-modify-write cycles.
    listing_lock: Mutex<()>,
    cancel: CancelToken,
}

impl StashApi {
    // ========================================
    // Construction
    // ========================================

    /// API rooted at the default application directory.
    pub async fn new() -> Result<Self> {
        Self::build(SettingsStore::new()).await
    }

    /// API rooted at an explicit application directory.
    pub async fn with_app_dir(app_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::build(SettingsStore::with_app_dir(app_dir)).await
    }

    async fn build(settings: SettingsStore) -> Result<Self> {
        settings.load().await;

        let roots = settings.roots().await;
        let catalog = match roots.app_data_dir() {
            Ok(dir) => {
                CheckpointCatalog::load_or_default(&dir.join(PathsConfig::CATALOG_FILENAME))
            }
            Err(_) => {
                debug!("STASH_DIR unset, starting with an empty catalog");
                CheckpointCatalog::new()
            }
        };

        Ok(Self {
            settings,
            catalog,
            listing_lock: Mutex::new(()),
            cancel: CancelToken::new(),
        })
    }

    async fn persist_catalog(&self) {
        let roots = self.settings.roots().await;
        let path = match roots.app_data_dir() {
            Ok(dir) => dir.join(PathsConfig::CATALOG_FILENAME),
            Err(_) => {
                debug!("STASH_DIR unset, catalog not persisted");
                return;
            }
        };
        if let Err(e) = self.catalog.save_to(&path).await {
            warn!("Could not persist catalog to {}: {}", path.display(), e);
        }
    }

    // ========================================
    // Settings
    // ========================================

    /// Snapshot of the current settings.
    pub async fn settings(&self) -> Settings {
        self.settings.current().await
    }

    /// Re-read the settings file from disk.
    pub async fn reload_settings(&self) -> Settings {
        self.settings.load().await
    }

    /// Persist new settings. The Stash backup copy degrades to a warning
    /// in the returned report.
    pub async fn save_settings(&self, settings: Settings) -> Result<SaveReport> {
        self.settings.save(settings).await
    }

    /// First-run initialization; true when this call did the work.
    pub async fn initialize(&self) -> Result<bool> {
        self.settings.initialize().await
    }

    /// List everything wrong with the configured directories.
    pub async fn verify_setup(&self) -> Vec<SetupIssue> {
        self.settings.verify_setup().await
    }

    /// The resolved location roots.
    pub async fn roots(&self) -> Roots {
        self.settings.roots().await
    }

    // ========================================
    // Reconciliation
    // ========================================

    /// Reconcile the catalog with the Mac listing for `kind`.
    pub async fn scan_mac(&self, kind: ModelKind) -> Result<ScanSummary> {
        let roots = self.settings.roots().await;
        let summary = reconcile::scan_mac(&self.catalog, &roots, kind).await?;
        self.persist_catalog().await;
        Ok(summary)
    }

    /// Reconcile the catalog with the Stash directory contents.
    pub async fn scan_stash(&self) -> Result<StashScanSummary> {
        let roots = self.settings.roots().await;
        let summary = reconcile::scan_stash(&self.catalog, &roots).await?;
        self.persist_catalog().await;
        Ok(summary)
    }

    /// Run every reconciliation pass: the three Mac listings, then the
    /// Stash. Cancellable via [`StashApi::cancel_token`].
    pub async fn rescan_all(&self) -> Result<RescanSummary> {
        self.cancel.reset();
        let roots = self.settings.roots().await;
        let result = reconcile::rescan_all(&self.catalog, &roots, &self.cancel).await;
        // Even a cancelled rescan has already moved the catalog forward.
        self.persist_catalog().await;
        result
    }

    // ========================================
    // Queries
    // ========================================

    /// Records of `kind` present at `location`; Mac results in display
    /// order.
    pub async fn get_checkpoints(&self, kind: ModelKind, location: Location) -> Vec<CheckpointRecord> {
        self.catalog.by_kind_and_location(kind, location).await
    }

    /// The record for `filename`, if the catalog knows it.
    pub async fn find_checkpoint(&self, filename: &str) -> Option<CheckpointRecord> {
        self.catalog.find(filename).await
    }

    /// Whether the checkpoint file exists at `location` on disk.
    pub async fn checkpoint_exists(&self, location: Location, filename: &str) -> bool {
        let roots = self.settings.roots().await;
        scanner::checkpoint_exists(&roots, location, filename).await
    }

    /// Filenames this checkpoint references (its components).
    pub async fn get_children(&self, filename: &str) -> Result<Vec<String>> {
        deps::get_children(&self.catalog, filename).await
    }

    /// Filenames of checkpoints that reference this one.
    pub async fn get_parents(&self, filename: &str) -> Vec<String> {
        deps::get_parents(&self.catalog, filename).await
    }

    /// Authoritative kind resolution for `filename`.
    ///
    /// The catalog's type wins; otherwise membership in a listing at
    /// either location decides, Mac first. `Unknown` when neither knows
    /// the file. Filename guessing is deliberately absent here; the
    /// advisory guess lives on the record as `type_hint`.
    pub async fn resolve_kind(&self, filename: &str) -> ModelKind {
        if let Some(record) = self.catalog.find(filename).await {
            if record.model_type != ModelKind::Unknown {
                return record.model_type;
            }
        }

        let roots = self.settings.roots().await;
        for location in [Location::Mac, Location::Stash] {
            if roots.root(location).is_err() {
                continue;
            }
            for kind in ModelKind::LISTED {
                match listing::read_listing(&roots, location, kind).await {
                    Ok(Some(entries)) if entries.iter().any(|e| e.file == filename) => {
                        return kind;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Could not read {} {} listing: {}", location, kind, e),
                }
            }
        }

        warn!("Could not resolve a kind for {}", filename);
        ModelKind::Unknown
    }

    /// Disk space of the volume holding `location`'s root.
    pub async fn disk_space(&self, location: Location) -> Result<DiskSpaceInfo> {
        let roots = self.settings.roots().await;
        system::disk_space_for_path(roots.root(location)?)
    }

    /// Compute and store the SHA-256 of a checkpoint file.
    pub async fn compute_checksum(&self, location: Location, filename: &str) -> Result<String> {
        let roots = self.settings.roots().await;
        let path = roots.checkpoint_path(location, filename)?;
        let digest = hashing::compute_sha256(path).await?;

        let checksum = digest.clone();
        self.catalog
            .update(filename, |record| record.checksum = Some(checksum))
            .await;
        self.persist_catalog().await;
        Ok(digest)
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Copy a checkpoint between locations. Flags stay as they are; run a
    /// scan or a delete to settle presence.
    pub async fn copy_checkpoint(
        &self,
        src: Location,
        dst: Location,
        filename: &str,
    ) -> Result<u64> {
        let roots = self.settings.roots().await;
        ops::copy_checkpoint(&roots, src, dst, filename).await
    }

    /// Guarded delete of a checkpoint file at `location`.
    pub async fn delete_checkpoint(&self, location: Location, filename: &str) -> Result<u64> {
        let roots = self.settings.roots().await;
        let freed = ops::delete_checkpoint(&self.catalog, &roots, location, filename).await?;
        self.persist_catalog().await;
        Ok(freed)
    }

    /// Move every unreferenced Mac checkpoint into the Stash. Cancellable
    /// via [`StashApi::cancel_token`].
    pub async fn prune_mac(&self) -> Result<PruneSummary> {
        self.cancel.reset();
        let roots = self.settings.roots().await;
        let result = ops::prune_mac(&self.catalog, &roots, &self.cancel).await;
        self.persist_catalog().await;
        result
    }

    /// Delete every unreferenced checkpoint at `location`. Cancellable via
    /// [`StashApi::cancel_token`].
    pub async fn delete_orphans(&self, location: Location) -> Result<DeleteOrphansSummary> {
        self.cancel.reset();
        let roots = self.settings.roots().await;
        let result = ops::delete_orphans(&self.catalog, &roots, location, &self.cancel).await;
        self.persist_catalog().await;
        result
    }

    /// Move a checkpoint to a new position in its Mac listing.
    pub async fn reorder(
        &self,
        kind: ModelKind,
        filename: &str,
        new_position: usize,
    ) -> Result<()> {
        let _guard = self.listing_lock.lock().await;
        let roots = self.settings.roots().await;
        ops::reorder(&self.catalog, &roots, kind, filename, new_position).await?;
        self.persist_catalog().await;
        Ok(())
    }

    /// Shallow-merge listing fields for a checkpoint and mirror the
    /// modeled ones into its record.
    pub async fn set_checkpoint_fields(
        &self,
        kind: ModelKind,
        filename: &str,
        patch: Map<String, Value>,
    ) -> Result<()> {
        let _guard = self.listing_lock.lock().await;
        let roots = self.settings.roots().await;
        ops::set_checkpoint_fields(&self.catalog, &roots, kind, filename, patch).await?;
        self.persist_catalog().await;
        Ok(())
    }

    /// Set or clear the user's display-name override for a record.
    ///
    /// Catalog-only: the host's listing keeps its own name.
    pub async fn set_display_name(&self, filename: &str, name: Option<String>) -> Result<()> {
        let updated = self
            .catalog
            .update(filename, |record| record.display_name = name)
            .await;
        if !updated {
            return Err(StashError::RecordNotFound(filename.to_string()));
        }
        self.persist_catalog().await;
        Ok(())
    }

    // ========================================
    // Cancellation
    // ========================================

    /// The shared cancellation token for bulk operations.
    ///
    /// Bulk calls reset it on entry, so cancel while one is running.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}
