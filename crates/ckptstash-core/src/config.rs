//! Shared enums and path conventions for the ckptstash core.
//!
//! The two storage locations, the checkpoint type taxonomy, and the fixed
//! file/directory names imposed by the host application live here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StashError};

/// Directory and file name conventions.
pub struct PathsConfig;

impl PathsConfig {
    /// Subdirectory of each root that holds checkpoints and listings.
    pub const MODELS_DIR_NAME: &'static str = "Models";
    /// Stash subdirectory for catalog persistence and the settings backup.
    pub const APP_DATA_DIR_NAME: &'static str = "App_Data";
    /// Extension (without dot) of the files being managed.
    pub const CHECKPOINT_EXTENSION: &'static str = "ckpt";
    pub const SETTINGS_FILENAME: &'static str = "settings.json";
    pub const CATALOG_FILENAME: &'static str = "catalog.json";
}

/// The two storage locations a checkpoint can live at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    /// Host application's own directory; capacity constrained, the only
    /// location whose listing the host reads.
    Mac,
    /// Overflow/backup directory, typically an external volume.
    Stash,
}

impl Location {
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Mac => "mac",
            Location::Stash => "stash",
        }
    }

    /// Settings key holding this location's root directory.
    pub fn settings_key(&self) -> &'static str {
        match self {
            Location::Mac => "DT_BASE_DIR",
            Location::Stash => "STASH_DIR",
        }
    }

    /// The opposite location.
    pub fn other(&self) -> Location {
        match self {
            Location::Mac => Location::Stash,
            Location::Stash => Location::Mac,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mac" => Some(Location::Mac),
            "stash" => Some(Location::Stash),
            _ => None,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Checkpoint type taxonomy.
///
/// Classification is authoritative only when it comes from a listing; files
/// discovered on disk without a listing entry stay `Unknown` until a listing
/// confirms them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Model,
    Lora,
    Control,
    Unknown,
}

impl ModelKind {
    /// The three kinds that have listing files, in the host's fixed order.
    pub const LISTED: [ModelKind; 3] = [ModelKind::Model, ModelKind::Lora, ModelKind::Control];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Model => "model",
            ModelKind::Lora => "lora",
            ModelKind::Control => "control",
            ModelKind::Unknown => "unknown",
        }
    }

    /// Listing filename for this kind, `None` for `Unknown`.
    pub fn listing_filename(&self) -> Option<&'static str> {
        match self {
            ModelKind::Model => Some("custom.json"),
            ModelKind::Lora => Some("custom_lora.json"),
            ModelKind::Control => Some("custom_controlnet.json"),
            ModelKind::Unknown => None,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "model" => Some(ModelKind::Model),
            "lora" => Some(ModelKind::Lora),
            "control" => Some(ModelKind::Control),
            "unknown" => Some(ModelKind::Unknown),
            _ => None,
        }
    }
}

impl Default for ModelKind {
    fn default() -> Self {
        ModelKind::Unknown
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolved root directories for the two locations.
///
/// Either root may be unset; path helpers fail with `NotConfigured` naming
/// the settings key the user needs to fill in.
#[derive(Debug, Clone, Default)]
pub struct Roots {
    pub mac: Option<PathBuf>,
    pub stash: Option<PathBuf>,
}

impl Roots {
    pub fn new(mac: Option<PathBuf>, stash: Option<PathBuf>) -> Self {
        Self { mac, stash }
    }

    /// Root directory of `location`.
    pub fn root(&self, location: Location) -> Result<&Path> {
        let root = match location {
            Location::Mac => self.mac.as_deref(),
            Location::Stash => self.stash.as_deref(),
        };
        root.ok_or(StashError::NotConfigured(location.settings_key()))
    }

    /// `Models/` directory under a location's root.
    pub fn models_dir(&self, location: Location) -> Result<PathBuf> {
        Ok(self.root(location)?.join(PathsConfig::MODELS_DIR_NAME))
    }

    /// Full path of a checkpoint file at `location`.
    pub fn checkpoint_path(&self, location: Location, filename: &str) -> Result<PathBuf> {
        Ok(self.models_dir(location)?.join(filename))
    }

    /// `App_Data/` directory under the Stash root.
    pub fn app_data_dir(&self) -> Result<PathBuf> {
        Ok(self
            .root(Location::Stash)?
            .join(PathsConfig::APP_DATA_DIR_NAME))
    }
}
