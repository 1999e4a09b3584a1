//! Checkpoint records and the in-memory catalog.

pub mod record;
pub mod store;

pub use record::{scaled_strength, CheckpointRecord, ComponentField, ComponentRefs};
pub use store::CheckpointCatalog;
