//! Type-partitioned library layout.
//!
//! Every artifact lives under `root/<type path>/`. The type → path table is
//! static and matches the directory conventions of the Stable Diffusion web
//! UI; unknown types land in `models/Other`.

use crate::config::ScanConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Catalog model category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelType {
    Checkpoint,
    TextualInversion,
    Hypernetwork,
    AestheticGradient,
    Lora,
    LoCon,
    Controlnet,
    Upscaler,
    MotionModule,
    Vae,
    Poses,
    Wildcards,
    Workflows,
    #[default]
    Other,
}

impl ModelType {
    pub const ALL: [ModelType; 14] = [
        ModelType::Checkpoint,
        ModelType::TextualInversion,
        ModelType::Hypernetwork,
        ModelType::AestheticGradient,
        ModelType::Lora,
        ModelType::LoCon,
        ModelType::Controlnet,
        ModelType::Upscaler,
        ModelType::MotionModule,
        ModelType::Vae,
        ModelType::Poses,
        ModelType::Wildcards,
        ModelType::Workflows,
        ModelType::Other,
    ];

    /// Name as used by the catalog API.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Checkpoint => "Checkpoint",
            ModelType::TextualInversion => "TextualInversion",
            ModelType::Hypernetwork => "Hypernetwork",
            ModelType::AestheticGradient => "AestheticGradient",
            ModelType::Lora => "LORA",
            ModelType::LoCon => "LoCon",
            ModelType::Controlnet => "Controlnet",
            ModelType::Upscaler => "Upscaler",
            ModelType::MotionModule => "MotionModule",
            ModelType::Vae => "VAE",
            ModelType::Poses => "Poses",
            ModelType::Wildcards => "Wildcards",
            ModelType::Workflows => "Workflows",
            ModelType::Other => "Other",
        }
    }

    /// Case-insensitive parse; unrecognized names map to `Other`.
    pub fn parse(s: &str) -> Self {
        let lower = s.trim().to_lowercase();
        ModelType::ALL
            .iter()
            .find(|t| t.as_str().to_lowercase() == lower)
            .cloned()
            .unwrap_or(ModelType::Other)
    }

    /// Directory relative to the library root.
    pub fn relative_path(&self) -> &'static str {
        match self {
            ModelType::Checkpoint => "models/Stable-diffusion",
            ModelType::TextualInversion => "embeddings",
            ModelType::Hypernetwork => "models/hypernetworks",
            ModelType::AestheticGradient => {
                "extensions/stable-diffusion-webui-aesthetic-gradients/aesthetic_embeddings"
            }
            ModelType::Lora | ModelType::LoCon => "models/Lora",
            ModelType::Controlnet => "models/Controlnet",
            ModelType::Upscaler => "models/ESRGAN",
            ModelType::MotionModule => "models/MotionModule",
            ModelType::Vae => "models/VAE",
            ModelType::Poses => "models/Poses",
            ModelType::Wildcards => "models/Wildcards",
            ModelType::Workflows => "models/Workflows",
            ModelType::Other => "models/Other",
        }
    }

    /// Types offered by default for metadata scans.
    ///
    /// Workflows, poses, motion modules and the catch-all bucket rarely carry
    /// catalog metadata.
    pub fn scannable() -> Vec<ModelType> {
        ModelType::ALL
            .iter()
            .filter(|t| {
                !matches!(
                    t,
                    ModelType::Workflows
                        | ModelType::Other
                        | ModelType::Poses
                        | ModelType::MotionModule
                )
            })
            .cloned()
            .collect()
    }
}

impl From<String> for ModelType {
    fn from(s: String) -> Self {
        ModelType::parse(&s)
    }
}

impl From<ModelType> for String {
    fn from(t: ModelType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Paths of the on-disk library.
#[derive(Debug, Clone)]
pub struct LibraryLayout {
    root: PathBuf,
}

impl LibraryLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn type_dir(&self, model_type: &ModelType) -> PathBuf {
        self.root.join(model_type.relative_path())
    }

    /// Directories for `types` (all types when `None`), each listed once.
    ///
    /// Several types share a directory (LORA and LoCon); a shared directory
    /// is returned only for its first type.
    pub fn type_dirs(&self, types: Option<&[ModelType]>) -> Vec<(ModelType, PathBuf)> {
        let selected: Vec<ModelType> = match types {
            Some(types) => types.to_vec(),
            None => ModelType::ALL.to_vec(),
        };

        let mut dirs: Vec<(ModelType, PathBuf)> = Vec::new();
        for model_type in selected {
            let dir = self.type_dir(&model_type);
            if !dirs.iter().any(|(_, existing)| *existing == dir) {
                dirs.push((model_type, dir));
            }
        }
        dirs
    }

    /// Where in-progress downloads are staged.
    ///
    /// Kept under the root so promotion is a same-filesystem rename.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(ScanConfig::STAGING_DIR_NAME)
    }
}

/// Whether `path` has a recognized artifact extension.
pub fn is_artifact(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ScanConfig::ARTIFACT_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Artifact files anywhere below `dir`, in walk order.
pub fn artifacts_under(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_artifact(e.path()))
        .map(|e| e.into_path())
        .collect()
}
