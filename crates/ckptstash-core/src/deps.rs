//! Dependency queries over the catalog.
//!
//! A checkpoint's listing entry can name other checkpoints in its component
//! fields (vae, encoders, refiner, upscaler). Those referenced files are
//! children; the referencing checkpoints are their parents. Only direct
//! references count, there is no transitive closure.

use tracing::debug;

use crate::catalog::CheckpointCatalog;
use crate::error::{Result, StashError};

/// Filenames this checkpoint references through its component fields.
///
/// Duplicates collapse (two fields naming the same file yield it once).
/// Errors with `RecordNotFound` when the catalog has no such checkpoint.
pub async fn get_children(catalog: &CheckpointCatalog, filename: &str) -> Result<Vec<String>> {
    let record = catalog
        .find(filename)
        .await
        .ok_or_else(|| StashError::RecordNotFound(filename.to_string()))?;

    let mut children = record.components.children();
    let mut seen = std::collections::HashSet::new();
    children.retain(|c| seen.insert(c.clone()));
    Ok(children)
}

/// Filenames of every checkpoint whose component fields reference
/// `filename` directly.
///
/// A record naming itself does not count as its own parent. The target
/// itself does not need a catalog record; an empty result just means
/// nothing depends on it. This is the delete guard's input.
pub async fn get_parents(catalog: &CheckpointCatalog, filename: &str) -> Vec<String> {
    let parents: Vec<String> = catalog
        .all()
        .await
        .into_iter()
        .filter(|r| r.filename != filename && r.components.references(filename))
        .map(|r| r.filename)
        .collect();

    if !parents.is_empty() {
        debug!(
            "{} is referenced by {} checkpoint(s)",
            filename,
            parents.len()
        );
    }
    parents
}

/// True when no other checkpoint references `filename`.
pub async fn is_orphan(catalog: &CheckpointCatalog, filename: &str) -> bool {
    get_parents(catalog, filename).await.is_empty()
}
