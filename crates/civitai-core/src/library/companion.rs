//! Companion files that sit next to every artifact.
//!
//! For base name `B` in directory `D` the set is `D/B.civitai.info`
//! (verbatim version JSON), `D/B.json` (web UI sidecar) and
//! `D/B.preview.png` (first preview image as served).

use crate::catalog::ModelVersion;
use crate::config::{ApiConfig, ScanConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The three companion paths for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionPaths {
    pub info: PathBuf,
    pub sidecar: PathBuf,
    pub preview: PathBuf,
}

impl CompanionPaths {
    pub fn new(directory: &Path, base_name: &str) -> Self {
        Self {
            info: directory.join(format!("{}{}", base_name, ScanConfig::INFO_SUFFIX)),
            sidecar: directory.join(format!("{}{}", base_name, ScanConfig::SIDECAR_SUFFIX)),
            preview: directory.join(format!("{}{}", base_name, ScanConfig::PREVIEW_SUFFIX)),
        }
    }

    /// Companion paths of an artifact file.
    pub fn for_artifact(artifact: &Path) -> Option<Self> {
        let directory = artifact.parent()?;
        let base_name = artifact.file_stem()?.to_str()?;
        Some(Self::new(directory, base_name))
    }

    pub fn all_present(&self) -> bool {
        self.info.exists() && self.sidecar.exists() && self.preview.exists()
    }

    pub fn missing(&self) -> Vec<&Path> {
        [&self.info, &self.sidecar, &self.preview]
            .into_iter()
            .filter(|p| !p.exists())
            .map(PathBuf::as_path)
            .collect()
    }

    /// Parse the `.civitai.info` file; `None` when absent or corrupt.
    pub fn read_info(&self) -> Option<ModelVersion> {
        let text = std::fs::read_to_string(&self.info).ok()?;
        let raw: serde_json::Value = serde_json::from_str(&text).ok()?;
        ModelVersion::from_json(raw).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolTag {
    pub version: String,
}

/// Sidecar JSON read by the Stable Diffusion web UI extra-networks panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarJson {
    pub description: String,
    pub notes: String,
    #[serde(rename = "sd version")]
    pub sd_version: String,
    #[serde(rename = "preferred weight")]
    pub preferred_weight: u32,
    pub extensions: BTreeMap<String, ToolTag>,
}

impl SidecarJson {
    pub fn new(description: String, notes: String, sd_version: String) -> Self {
        let mut extensions = BTreeMap::new();
        extensions.insert(
            ApiConfig::SIDECAR_TOOL_TAG.to_string(),
            ToolTag {
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        );
        Self {
            description,
            notes,
            sd_version,
            preferred_weight: 0,
            extensions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_companion_paths() {
        let paths = CompanionPaths::new(Path::new("/lib/models/Lora"), "foo");
        assert_eq!(paths.info, PathBuf::from("/lib/models/Lora/foo.civitai.info"));
        assert_eq!(paths.sidecar, PathBuf::from("/lib/models/Lora/foo.json"));
        assert_eq!(paths.preview, PathBuf::from("/lib/models/Lora/foo.preview.png"));

        let from_artifact =
            CompanionPaths::for_artifact(Path::new("/lib/models/Lora/foo.safetensors")).unwrap();
        assert_eq!(from_artifact, paths);
    }

    #[test]
    fn test_missing_and_corrupt_info() {
        let tmp = TempDir::new().unwrap();
        let paths = CompanionPaths::new(tmp.path(), "foo");
        assert_eq!(paths.missing().len(), 3);
        assert!(paths.read_info().is_none());

        std::fs::write(&paths.info, "{ not json").unwrap();
        assert_eq!(paths.missing().len(), 2);
        assert!(paths.read_info().is_none());

        std::fs::write(&paths.info, r#"{"id": 42, "modelId": 7}"#).unwrap();
        assert_eq!(paths.read_info().unwrap().id, 42);
    }

    #[test]
    fn test_sidecar_shape() {
        let sidecar = SidecarJson::new("desc".into(), "N/A".into(), "SD1".into());
        let json = serde_json::to_value(&sidecar).unwrap();

        assert_eq!(json["sd version"], "SD1");
        assert_eq!(json["preferred weight"], 0);
        assert!(json["preferred weight"].is_u64());
        assert!(json["extensions"]["Civitai_cli"]["version"].is_string());
        assert!(serde_json::to_string(&sidecar)
            .unwrap()
            .contains("\"preferred weight\":0,"));
    }
}
