//! Session configuration
//!
//! Where downloaded captures land, which library to load, and the two
//! optional device settings applied on connect.

use crate::errors::CameraError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `incoming_dir`.
pub const ENV_INCOMING_DIR: &str = "DSLR_CONTROL_INCOMING";
/// Environment variable overriding `library_path`.
pub const ENV_LIBRARY_PATH: &str = "DSLR_CONTROL_LIBGPHOTO2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Explicit libgphoto2 path; the default names are tried when unset.
    pub library_path: Option<PathBuf>,
    /// Directory captures are downloaded into.
    pub incoming_dir: PathBuf,
    /// Setting switched on at connect to allow remote capture.
    pub capture_mode_setting: String,
    pub capture_mode_value: i32,
    /// Enumerated setting selecting where captures are stored.
    pub capture_target_setting: String,
    pub capture_target_index: usize,
    /// Remove the device copy once the local copy is written.
    pub delete_after_download: bool,
    /// Poll period of the live view pump.
    pub liveview_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            library_path: None,
            incoming_dir: std::env::temp_dir().join("dslr-control").join("incoming"),
            capture_mode_setting: "capture".to_string(),
            capture_mode_value: 1,
            capture_target_setting: "capturetarget".to_string(),
            capture_target_index: 1,
            delete_after_download: true,
            liveview_interval_ms: 100,
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, CameraError> {
        let text = fs::read_to_string(path).map_err(|e| {
            CameraError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            CameraError::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), CameraError> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| CameraError::InvalidConfig(e.to_string()))?;
        fs::write(path, text).map_err(|e| {
            CameraError::InvalidConfig(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    pub fn with_incoming_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.incoming_dir = dir.into();
        self
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup` (keyed by the `ENV_*` names).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(ENV_INCOMING_DIR).filter(|v| !v.is_empty()) {
            self.incoming_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup(ENV_LIBRARY_PATH).filter(|v| !v.is_empty()) {
            self.library_path = Some(PathBuf::from(path));
        }
        self
    }

    pub fn liveview_interval(&self) -> Duration {
        Duration::from_millis(self.liveview_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_known_camera_settings() {
        let config = SessionConfig::default();
        assert_eq!(config.capture_mode_setting, "capture");
        assert_eq!(config.capture_mode_value, 1);
        assert_eq!(config.capture_target_setting, "capturetarget");
        assert_eq!(config.capture_target_index, 1);
        assert!(config.delete_after_download);
        assert!(config.incoming_dir.ends_with("dslr-control/incoming"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.json");
        let json = r#"{ "incoming_dir": "/srv/incoming", "delete_after_download": false }"#;
        fs::write(&path, json).unwrap();

        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.incoming_dir, PathBuf::from("/srv/incoming"));
        assert!(!config.delete_after_download);
        assert_eq!(config.capture_target_index, 1);
    }

    #[test]
    fn save_then_load_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.json");
        let config = SessionConfig {
            capture_target_index: 0,
            liveview_interval_ms: 250,
            ..SessionConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(SessionConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(SessionConfig::load(&path), Err(CameraError::InvalidConfig(_))));
    }

    #[test]
    fn overrides_replace_paths() {
        let config = SessionConfig::default().with_overrides(|key| match key {
            ENV_INCOMING_DIR => Some("/mnt/card".to_string()),
            ENV_LIBRARY_PATH => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.incoming_dir, PathBuf::from("/mnt/card"));
        assert_eq!(config.library_path, None);
    }

    #[test]
    fn interval_is_never_zero() {
        let config = SessionConfig {
            liveview_interval_ms: 0,
            ..SessionConfig::default()
        };
        assert_eq!(config.liveview_interval(), Duration::from_millis(1));
    }
}
