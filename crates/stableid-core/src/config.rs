//! Configuration for the identifier registry.
//!
//! `RegistryConfig` holds fixed constants. `Settings` is the per-project
//! configuration file; it is loaded once at startup and passed by reference
//! to whatever needs it.

use crate::storage::{atomic_read_json, atomic_write_json};
use crate::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Registry-wide constants.
pub struct RegistryConfig;

impl RegistryConfig {
    /// Candidate draws before an allocation is reported as exhausted.
    pub const MAX_ALLOCATION_ATTEMPTS: u32 = 1000;
    pub const DATA_DIR_NAME: &'static str = ".stableid";
    pub const REGISTRY_FILE_NAME: &'static str = "registry.json";
    pub const LOCK_FILE_NAME: &'static str = "session.lock";
    pub const SETTINGS_FILE_NAME: &'static str = "stableid.json";
    pub const SCENES_DIR_NAME: &'static str = "scenes";
    pub const SCENE_EXTENSION: &'static str = "scene.json";
    pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);
    pub const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(250);
}

/// Project settings (`stableid.json` at the project root).
///
/// Relative paths are resolved against the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
    #[serde(default = "default_scenes_dir")]
    pub scenes_dir: PathBuf,
    #[serde(default = "default_max_attempts")]
    pub max_allocation_attempts: u32,
    /// Keep `registry.json.bak` with the previous contents on every write.
    #[serde(default)]
    pub keep_backup: bool,
    /// Run an assignment pass whenever the watcher sees a scene change.
    #[serde(default = "default_true")]
    pub auto_assign_on_change: bool,
    #[serde(skip)]
    root: PathBuf,
}

fn default_registry_path() -> PathBuf {
    Path::new(RegistryConfig::DATA_DIR_NAME).join(RegistryConfig::REGISTRY_FILE_NAME)
}

fn default_scenes_dir() -> PathBuf {
    PathBuf::from(RegistryConfig::SCENES_DIR_NAME)
}

fn default_max_attempts() -> u32 {
    RegistryConfig::MAX_ALLOCATION_ATTEMPTS
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            registry_path: default_registry_path(),
            scenes_dir: default_scenes_dir(),
            max_allocation_attempts: default_max_attempts(),
            keep_backup: false,
            auto_assign_on_change: true,
            root: PathBuf::new(),
        }
    }
}

impl Settings {
    /// Defaults rooted at `root`.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load `stableid.json` from `root`, falling back to defaults if absent.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let path = root.join(RegistryConfig::SETTINGS_FILE_NAME);
        let mut settings: Settings = atomic_read_json(&path)?.unwrap_or_default();
        settings.root = root.to_path_buf();
        settings.check()?;
        debug!("Loaded settings for {}", root.display());
        Ok(settings)
    }

    /// Write the settings back to `stableid.json` under the root.
    pub fn save(&self) -> Result<()> {
        self.check()?;
        atomic_write_json(&self.settings_path(), self, false)
    }

    fn check(&self) -> Result<()> {
        if self.max_allocation_attempts == 0 {
            return Err(RegistryError::Config {
                message: "maxAllocationAttempts must be at least 1".to_string(),
            });
        }
        if self.registry_path.as_os_str().is_empty() {
            return Err(RegistryError::Config {
                message: "registryPath must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(RegistryConfig::SETTINGS_FILE_NAME)
    }

    pub fn registry_file(&self) -> PathBuf {
        self.root.join(&self.registry_path)
    }

    /// Lock file lives next to the registry file.
    pub fn lock_file(&self) -> PathBuf {
        let registry = self.registry_file();
        registry
            .parent()
            .map(|p| p.join(RegistryConfig::LOCK_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(RegistryConfig::LOCK_FILE_NAME))
    }

    pub fn scenes_path(&self) -> PathBuf {
        self.root.join(&self.scenes_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::load(temp.path()).unwrap();

        assert_eq!(settings.max_allocation_attempts, 1000);
        assert_eq!(
            settings.registry_file(),
            temp.path().join(".stableid").join("registry.json")
        );
        assert_eq!(settings.lock_file(), temp.path().join(".stableid").join("session.lock"));
        assert_eq!(settings.scenes_path(), temp.path().join("scenes"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("stableid.json"),
            r#"{ "scenesDir": "levels", "keepBackup": true }"#,
        )
        .unwrap();

        let settings = Settings::load(temp.path()).unwrap();
        assert_eq!(settings.scenes_path(), temp.path().join("levels"));
        assert!(settings.keep_backup);
        assert!(settings.auto_assign_on_change);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("stableid.json"),
            r#"{ "maxAllocationAttempts": 0 }"#,
        )
        .unwrap();

        let err = Settings::load(temp.path()).unwrap_err();
        assert!(matches!(err, RegistryError::Config { .. }));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let mut settings = Settings::for_root(temp.path());
        settings.max_allocation_attempts = 50;
        settings.save().unwrap();

        let reloaded = Settings::load(temp.path()).unwrap();
        assert_eq!(reloaded, settings);
    }
}
