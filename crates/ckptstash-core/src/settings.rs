//! Application settings: built-in defaults, a JSON overlay, and saves
//! mirrored to the Stash.
//!
//! Settings live at `<app dir>/settings.json`. Missing keys fall back to
//! the built-in defaults, `~` expands to the user's home directory after
//! the merge, and keys this library does not model round-trip untouched.
//! Saving writes the app-dir copy first (fatal on failure), then a
//! best-effort backup under the Stash's `App_Data/` so a lost home
//! directory does not lose the configuration.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{PathsConfig, Roots};
use crate::error::Result;
use crate::persist;

/// Default host-application container, as shipped by Draw Things.
pub const DEFAULT_DT_BASE_DIR: &str =
    "~/Library/Containers/com.liuliu.draw-things/Data/Documents";
/// Default external volume for the Stash.
pub const DEFAULT_STASH_DIR: &str = "/Volumes/Extreme2Tb/__DrawThings_Stash__";
/// Default directory for this application's own data.
pub const DEFAULT_DTC_APP_DIR: &str = "~/.drawthings_companion";

fn default_dt_base_dir() -> String {
    DEFAULT_DT_BASE_DIR.to_string()
}

fn default_stash_dir() -> String {
    DEFAULT_STASH_DIR.to_string()
}

fn default_dtc_app_dir() -> String {
    DEFAULT_DTC_APP_DIR.to_string()
}

/// The persisted settings document.
///
/// The three directory keys use the host-facing uppercase names. An empty
/// string means "unconfigured" and path helpers will refuse to use it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the host application's documents (holds `Models/`).
    #[serde(rename = "DT_BASE_DIR", default = "default_dt_base_dir")]
    pub dt_base_dir: String,
    /// Root of the overflow volume (holds `Models/` and `App_Data/`).
    #[serde(rename = "STASH_DIR", default = "default_stash_dir")]
    pub stash_dir: String,
    /// This application's own data directory.
    #[serde(rename = "DTC_APP_DIR", default = "default_dtc_app_dir")]
    pub dtc_app_dir: String,
    #[serde(default)]
    pub initialized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialized_date: Option<String>,
    /// Keys this library does not model; preserved across a save.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Settings {
    /// The built-in defaults, tildes unexpanded.
    pub fn defaults() -> Self {
        Self {
            dt_base_dir: default_dt_base_dir(),
            stash_dir: default_stash_dir(),
            dtc_app_dir: default_dtc_app_dir(),
            initialized: false,
            initialized_date: None,
            extra: Map::new(),
        }
    }

    /// Expand a leading `~` in every directory value.
    fn expand_tildes(&mut self) {
        self.dt_base_dir = expand_tilde(&self.dt_base_dir);
        self.stash_dir = expand_tilde(&self.stash_dir);
        self.dtc_app_dir = expand_tilde(&self.dtc_app_dir);
    }

    /// Resolved location roots. Empty values become unconfigured roots.
    pub fn roots(&self) -> Roots {
        Roots::new(opt_path(&self.dt_base_dir), opt_path(&self.stash_dir))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::defaults()
    }
}

/// Expand a leading `~` or `~/` to the user's home directory.
///
/// Left untouched when the home directory cannot be determined.
pub fn expand_tilde(raw: &str) -> String {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.to_string_lossy().into_owned();
        }
    } else if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    raw.to_string()
}

fn opt_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}

/// Outcome of a settings save.
///
/// The primary write either succeeded or the save failed outright; the
/// Stash backup degrades to a warning carried here.
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    /// Set when the Stash backup copy could not be written.
    pub backup_warning: Option<String>,
}

/// One problem found by [`SettingsStore::verify_setup`].
#[derive(Debug, Clone, Serialize)]
pub struct SetupIssue {
    /// Settings key (or `initialized`) the issue is about.
    pub key: &'static str,
    pub message: String,
}

/// Owns the settings file and the in-memory copy of its contents.
///
/// The settings file location is fixed at construction; the `DTC_APP_DIR`
/// value inside the file describes the same directory but moving it does
/// not relocate the store.
#[derive(Debug)]
pub struct SettingsStore {
    app_dir: PathBuf,
    defaults: Settings,
    settings: RwLock<Settings>,
}

impl SettingsStore {
    /// Store rooted at the default application directory.
    pub fn new() -> Self {
        Self::with_app_dir(expand_tilde(DEFAULT_DTC_APP_DIR))
    }

    /// Store rooted at an explicit application directory.
    pub fn with_app_dir(app_dir: impl Into<PathBuf>) -> Self {
        let app_dir = app_dir.into();
        let mut defaults = Settings::defaults();
        defaults.dtc_app_dir = app_dir.to_string_lossy().into_owned();
        defaults.expand_tildes();
        Self {
            app_dir,
            settings: RwLock::new(defaults.clone()),
            defaults,
        }
    }

    /// Path of the settings file.
    pub fn settings_path(&self) -> PathBuf {
        self.app_dir.join(PathsConfig::SETTINGS_FILENAME)
    }

    /// Load settings from disk, shallow-merged over the defaults.
    ///
    /// Keys present in the file win; missing keys keep their default. A
    /// file that cannot be read or parsed yields the defaults, with a
    /// warning, so a corrupt settings file never blocks startup.
    pub async fn load(&self) -> Settings {
        let path = self.settings_path();
        let mut loaded = match persist::read_json::<Value>(&path) {
            Ok(Some(Value::Object(overlay))) => {
                debug!("Loaded settings from {}", path.display());
                self.merge_overlay(overlay, &path)
            }
            Ok(Some(_)) => {
                warn!(
                    "Settings file {} is not a JSON object; using defaults",
                    path.display()
                );
                self.defaults.clone()
            }
            Ok(None) => {
                debug!("No settings file at {}, using defaults", path.display());
                self.defaults.clone()
            }
            Err(e) => {
                warn!(
                    "Could not load settings from {}: {}; using defaults",
                    path.display(),
                    e
                );
                self.defaults.clone()
            }
        };
        loaded.expand_tildes();

        let mut guard = self.settings.write().await;
        *guard = loaded.clone();
        loaded
    }

    fn merge_overlay(&self, overlay: Map<String, Value>, path: &Path) -> Settings {
        let mut merged = match serde_json::to_value(&self.defaults) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in overlay {
            merged.insert(key, value);
        }
        match serde_json::from_value(Value::Object(merged)) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(
                    "Settings file {} has malformed values: {}; using defaults",
                    path.display(),
                    e
                );
                self.defaults.clone()
            }
        }
    }

    /// Snapshot of the current in-memory settings.
    pub async fn current(&self) -> Settings {
        self.settings.read().await.clone()
    }

    /// Resolved location roots from the current settings.
    pub async fn roots(&self) -> Roots {
        self.settings.read().await.roots()
    }

    /// Persist `settings` and adopt them as current.
    ///
    /// The primary copy under the app dir must succeed; the backup copy
    /// under `STASH_DIR/App_Data/` is best-effort and reported in the
    /// returned [`SaveReport`] when it fails.
    pub async fn save(&self, mut settings: Settings) -> Result<SaveReport> {
        settings.expand_tildes();

        let path = self.settings_path();
        persist::write_json_atomic(&path, &settings, true)?;
        info!("Saved settings to {}", path.display());

        let mut report = SaveReport::default();
        match opt_path(&settings.stash_dir) {
            Some(stash) => {
                let backup_path = stash
                    .join(PathsConfig::APP_DATA_DIR_NAME)
                    .join(PathsConfig::SETTINGS_FILENAME);
                if let Err(e) = persist::write_json_atomic(&backup_path, &settings, false) {
                    let message =
                        format!("Settings backup to {} failed: {}", backup_path.display(), e);
                    warn!("{}", message);
                    report.backup_warning = Some(message);
                }
            }
            None => debug!("STASH_DIR unset, skipping settings backup"),
        }

        let mut guard = self.settings.write().await;
        *guard = settings;
        Ok(report)
    }

    /// First-run initialization.
    ///
    /// Creates the app directory and stamps `initialized` with the current
    /// time. Returns false without touching anything when initialization
    /// already happened.
    pub async fn initialize(&self) -> Result<bool> {
        let mut settings = self.current().await;
        if settings.initialized {
            debug!("Already initialized on {:?}", settings.initialized_date);
            return Ok(false);
        }

        tokio::fs::create_dir_all(&self.app_dir)
            .await
            .map_err(|e| crate::error::StashError::io_write(e, &self.app_dir))?;

        settings.initialized = true;
        settings.initialized_date =
            Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        self.save(settings).await?;
        info!("Initialized app directory at {}", self.app_dir.display());
        Ok(true)
    }

    /// Check the configured directories and report everything wrong.
    ///
    /// Returns an empty list when the setup is usable. Issues are
    /// advisory; callers decide which ones block which operations.
    pub async fn verify_setup(&self) -> Vec<SetupIssue> {
        let settings = self.current().await;
        let mut issues = Vec::new();

        if !settings.initialized {
            issues.push(SetupIssue {
                key: "initialized",
                message: "Application has not been initialized".to_string(),
            });
        }

        check_dir(&mut issues, "DT_BASE_DIR", &settings.dt_base_dir);
        if let Some(base) = opt_path(&settings.dt_base_dir) {
            let models = base.join(PathsConfig::MODELS_DIR_NAME);
            if base.is_dir() && !models.is_dir() {
                issues.push(SetupIssue {
                    key: "DT_BASE_DIR",
                    message: format!("No Models directory under {}", base.display()),
                });
            }
        }
        check_dir(&mut issues, "STASH_DIR", &settings.stash_dir);
        check_dir(&mut issues, "DTC_APP_DIR", &settings.dtc_app_dir);

        if !issues.is_empty() {
            warn!("Setup verification found {} issue(s)", issues.len());
        }
        issues
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_dir(issues: &mut Vec<SetupIssue>, key: &'static str, value: &str) {
    match opt_path(value) {
        None => issues.push(SetupIssue {
            key,
            message: format!("{} is not set", key),
        }),
        Some(path) if !path.is_dir() => issues.push(SetupIssue {
            key,
            message: format!("Directory does not exist: {}", path.display()),
        }),
        Some(_) => {}
    }
}
