//! User preferences.
//!
//! Stored as `settings.json` in the platform config directory. A missing or
//! unreadable file yields defaults; writes are atomic.

use crate::catalog::SearchParams;
use crate::config::PathsConfig;
use crate::error::{CivitaiError, Result};
use crate::metadata::{atomic_read_json, atomic_write_json};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Terminal preview size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSize {
    Small,
    #[default]
    Medium,
    Large,
}

impl ImageSize {
    /// Rows of terminal output used for a preview.
    pub fn rows(&self) -> u16 {
        match self {
            ImageSize::Small => 40,
            ImageSize::Medium => 80,
            ImageSize::Large => 100,
        }
    }
}

impl FromStr for ImageSize {
    type Err = CivitaiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "small" => Ok(ImageSize::Small),
            "medium" => Ok(ImageSize::Medium),
            "large" => Ok(ImageSize::Large),
            other => Err(CivitaiError::Validation {
                field: "image_size".into(),
                message: format!("expected small, medium or large, got {}", other),
            }),
        }
    }
}

/// Which preview images are shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFilter {
    #[default]
    #[serde(rename = "block nsfw")]
    BlockNsfw,
    #[serde(rename = "blockify images")]
    Blockify,
    #[serde(rename = "allow all images")]
    AllowAll,
}

impl FromStr for ImageFilter {
    type Err = CivitaiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(['-', '_'], " ").as_str() {
            "block nsfw" | "block" => Ok(ImageFilter::BlockNsfw),
            "blockify images" | "blockify" => Ok(ImageFilter::Blockify),
            "allow all images" | "allow all" | "allow" => Ok(ImageFilter::AllowAll),
            other => Err(CivitaiError::Validation {
                field: "image_filter".into(),
                message: format!("unknown image filter {}", other),
            }),
        }
    }
}

/// Persisted user preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub root_directory: PathBuf,
    pub text_only: bool,
    pub image_size: ImageSize,
    pub image_filter: ImageFilter,
    pub default_query: SearchParams,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root_directory: default_root_directory(),
            text_only: false,
            image_size: ImageSize::default(),
            image_filter: ImageFilter::default(),
            default_query: SearchParams::default(),
        }
    }
}

impl Settings {
    /// Load from `path`, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match atomic_read_json::<Settings>(path) {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                debug!("No settings at {}, using defaults", path.display());
                Settings::default()
            }
            Err(e) => {
                warn!("Failed to read settings at {}: {}", path.display(), e);
                Settings::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)
    }
}

/// `~/Downloads`, or the working directory when there is no home.
pub fn default_root_directory() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(PathsConfig::DEFAULT_ROOT_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `<config dir>/civitai/settings.json`.
pub fn default_settings_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(PathsConfig::APP_DIR_NAME).join(PathsConfig::SETTINGS_FILENAME))
        .ok_or_else(|| CivitaiError::Config {
            message: "Could not determine the user config directory".into(),
        })
}

/// `<data dir>/civitai`, holding the index and the pending list.
pub fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join(PathsConfig::APP_DIR_NAME))
        .ok_or_else(|| CivitaiError::Config {
            message: "Could not determine the user data directory".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SortOrder;
    use tempfile::TempDir;

    #[test]
    fn test_missing_settings_are_defaults() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load(&tmp.path().join("settings.json"));
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.image_filter, ImageFilter::BlockNsfw);
    }

    #[test]
    fn test_corrupt_settings_are_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "{{{").unwrap();
        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"root_directory": "/models", "image_filter": "blockify images"}"#,
        )
        .unwrap();

        let settings = Settings::load(&path);
        assert_eq!(settings.root_directory, PathBuf::from("/models"));
        assert_eq!(settings.image_filter, ImageFilter::Blockify);
        assert_eq!(settings.image_size, ImageSize::Medium);
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("settings.json");
        let mut settings = Settings {
            root_directory: PathBuf::from("/srv/sd"),
            text_only: true,
            ..Default::default()
        };
        settings.default_query.sort = Some(SortOrder::Newest);

        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path), settings);
    }

    #[test]
    fn test_parse_preferences() {
        assert_eq!("large".parse::<ImageSize>().unwrap(), ImageSize::Large);
        assert_eq!("allow-all".parse::<ImageFilter>().unwrap(), ImageFilter::AllowAll);
        assert!("huge".parse::<ImageSize>().is_err());
    }
}
