//! Checkpoint record and dependency-field types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Location, ModelKind};

/// The fixed set of listing-entry fields that reference another checkpoint
/// by filename. Dependency scanning iterates exactly these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentField {
    Vae,
    ClipEncoder,
    TextEncoder,
    Refiner,
    Upscaler,
}

impl ComponentField {
    pub const ALL: [ComponentField; 5] = [
        ComponentField::Vae,
        ComponentField::ClipEncoder,
        ComponentField::TextEncoder,
        ComponentField::Refiner,
        ComponentField::Upscaler,
    ];

    /// Field name as it appears in listing entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentField::Vae => "vae",
            ComponentField::ClipEncoder => "clip_encoder",
            ComponentField::TextEncoder => "text_encoder",
            ComponentField::Refiner => "refiner",
            ComponentField::Upscaler => "upscaler",
        }
    }
}

impl std::fmt::Display for ComponentField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Component references carried by a checkpoint, mirrored from its listing
/// entry on every reconcile pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRefs {
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
}

impl ComponentRefs {
    /// Typed lookup by field.
    pub fn get(&self, field: ComponentField) -> Option<&str> {
        let value = match field {
            ComponentField::Vae => &self.vae,
            ComponentField::ClipEncoder => &self.clip_encoder,
            ComponentField::TextEncoder => &self.text_encoder,
            ComponentField::Refiner => &self.refiner,
            ComponentField::Upscaler => &self.upscaler,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }

    /// Non-empty referenced filenames, in fixed field order.
    pub fn children(&self) -> Vec<String> {
        ComponentField::ALL
            .iter()
            .filter_map(|f| self.get(*f))
            .map(str::to_string)
            .collect()
    }

    /// True when any field references `filename` directly.
    pub fn references(&self, filename: &str) -> bool {
        ComponentField::ALL
            .iter()
            .any(|f| self.get(*f) == Some(filename))
    }

    pub fn is_empty(&self) -> bool {
        ComponentField::ALL.iter().all(|f| self.get(*f).is_none())
    }
}

/// Convert a listing's raw strength value to the stored integer form.
///
/// Stored as strength x 10, rounded half-up (0.75 becomes 8, 7.5 becomes 75).
pub fn scaled_strength(raw: f64) -> i32 {
    (raw * 10.0).round() as i32
}

/// One managed checkpoint, keyed by on-disk filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// On-disk file name; primary key, stable across locations.
    pub filename: String,
    /// Name as reported by the listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name_original: Option<String>,
    /// User override; sticky, never touched by reconciliation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Authoritative classification (from a listing), `Unknown` otherwise.
    pub model_type: ModelKind,
    /// Advisory guess from the filename classifier for stash-only files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<ModelKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// SHA-256 hex, computed on demand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Last known absolute path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    pub exists_mac: bool,
    pub exists_stash: bool,
    /// Position in the Mac listing; `None` whenever `exists_mac` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_display_order: Option<u32>,
    /// Strength x 10; only meaningful for loras.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lora_strength: Option<i32>,
    #[serde(default, skip_serializing_if = "ComponentRefs::is_empty")]
    pub components: ComponentRefs,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Fresh record, present nowhere, stamped now.
    pub fn new(filename: impl Into<String>, model_type: ModelKind) -> Self {
        let now = Utc::now();
        Self {
            filename: filename.into(),
            display_name_original: None,
            display_name: None,
            model_type,
            type_hint: None,
            file_size: None,
            checksum: None,
            source_path: None,
            exists_mac: false,
            exists_stash: false,
            mac_display_order: None,
            lora_strength: None,
            components: ComponentRefs::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Name to show: user override wins, then the listing name, then the
    /// filename itself.
    pub fn display_label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.display_name_original.as_deref())
            .unwrap_or(&self.filename)
    }

    pub fn exists_at(&self, location: Location) -> bool {
        match location {
            Location::Mac => self.exists_mac,
            Location::Stash => self.exists_stash,
        }
    }

    /// True when at least one location still holds the file.
    pub fn is_anywhere(&self) -> bool {
        self.exists_mac || self.exists_stash
    }

    /// Mark the record present on Mac at `order`.
    pub fn mark_mac_present(&mut self, order: u32) {
        self.exists_mac = true;
        self.mac_display_order = Some(order);
    }

    /// Clear presence at `location`. Clearing Mac also clears the display
    /// order, which only means anything while the file is on the Mac.
    pub fn mark_absent(&mut self, location: Location) {
        match location {
            Location::Mac => {
                self.exists_mac = false;
                self.mac_display_order = None;
            }
            Location::Stash => {
                self.exists_stash = false;
            }
        }
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_strength_rounds_half_up() {
        assert_eq!(scaled_strength(0.75), 8);
        assert_eq!(scaled_strength(7.5), 75);
        assert_eq!(scaled_strength(0.84), 8);
        assert_eq!(scaled_strength(0.85), 9);
        assert_eq!(scaled_strength(1.0), 10);
        assert_eq!(scaled_strength(0.0), 0);
    }

    #[test]
    fn test_display_label_precedence() {
        let mut record = CheckpointRecord::new("sdxl_base.ckpt", ModelKind::Model);
        assert_eq!(record.display_label(), "sdxl_base.ckpt");

        record.display_name_original = Some("SDXL Base".into());
        assert_eq!(record.display_label(), "SDXL Base");

        record.display_name = Some("My Favourite".into());
        assert_eq!(record.display_label(), "My Favourite");
    }

    #[test]
    fn test_mark_absent_clears_mac_order() {
        let mut record = CheckpointRecord::new("a.ckpt", ModelKind::Model);
        record.mark_mac_present(4);
        assert!(record.exists_mac);
        assert_eq!(record.mac_display_order, Some(4));

        record.mark_absent(Location::Mac);
        assert!(!record.exists_mac);
        assert_eq!(record.mac_display_order, None);
    }

    #[test]
    fn test_component_refs_children_and_references() {
        let refs = ComponentRefs {
            vae: Some("vae_ft_mse.ckpt".into()),
            clip_encoder: Some(String::new()),
            text_encoder: Some("t5_xxl_q5p.ckpt".into()),
            refiner: None,
            upscaler: None,
        };

        // Empty strings do not count as references.
        assert_eq!(refs.children(), vec!["vae_ft_mse.ckpt", "t5_xxl_q5p.ckpt"]);
        assert!(refs.references("vae_ft_mse.ckpt"));
        assert!(!refs.references(""));
        assert!(!refs.references("missing.ckpt"));
        assert!(!refs.is_empty());
        assert!(ComponentRefs::default().is_empty());
    }

    #[test]
    fn test_record_serde_skips_empty_optionals() {
        let record = CheckpointRecord::new("bare.ckpt", ModelKind::Unknown);
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("display_name"));
        assert!(!json.contains("lora_strength"));
        assert!(!json.contains("components"));

        let back: CheckpointRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
