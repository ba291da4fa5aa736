//! Companion metadata reconciliation.
//!
//! Makes sure every artifact has its `.civitai.info`, sidecar `.json` and
//! preview, and gives hash-only index records their catalog identity.

use super::companion::{CompanionPaths, SidecarJson};
use super::hashing::compute_sha256_blocking;
use super::layout::{artifacts_under, LibraryLayout, ModelType};
use super::scanner::published_hash;
use crate::catalog::{CatalogApi, ModelVersion};
use crate::error::Result;
use crate::index::{IndexRecord, ModelIndex};
use crate::metadata::{atomic_write_bytes, atomic_write_json};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

/// Normalized base-model family written to the sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseModelFamily {
    Sd1,
    Sd2,
    Sdxl,
    Unknown,
}

impl BaseModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseModelFamily::Sd1 => "SD1",
            BaseModelFamily::Sd2 => "SD2",
            BaseModelFamily::Sdxl => "SDXL",
            BaseModelFamily::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for BaseModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collapse a catalog base-model label onto its family.
pub fn normalize_base_model(label: &str) -> BaseModelFamily {
    match label.trim() {
        "SD 1.4" | "SD 1.5" => BaseModelFamily::Sd1,
        "SD 2.0" | "SD 2.0 768" | "SD 2.1" | "SD 2.1 768" => BaseModelFamily::Sd2,
        other if other.starts_with("SDXL") => BaseModelFamily::Sdxl,
        _ => BaseModelFamily::Unknown,
    }
}

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex must compile"));

static BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<br\s*/?>|</p>|</li>|</h[1-6]>").expect("break regex must compile")
});

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").expect("entity regex must compile")
});

/// Plain text from an HTML description.
pub fn html_to_text(html: &str) -> String {
    let with_breaks = BREAK.replace_all(html, "\n");
    let stripped = TAG.replace_all(&with_breaks, "");
    let unescaped = ENTITY.replace_all(&stripped, |caps: &regex::Captures<'_>| {
        let entity = &caps[1];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        decoded
            .map(String::from)
            .unwrap_or_else(|| caps[0].to_string())
    });
    unescaped.trim().to_string()
}

/// How to find the catalog version for an artifact.
#[derive(Debug, Clone)]
pub enum VersionHint {
    /// Detail already fetched by the caller.
    Known(Box<ModelVersion>),
    Id(u64),
    Hash(String),
}

/// Result of [`MetadataReconciler::ensure_companion_files`].
#[derive(Debug, Clone)]
pub enum CompanionOutcome {
    UpToDate,
    Updated {
        version: Box<ModelVersion>,
        written: Vec<PathBuf>,
    },
    /// The catalog does not know the artifact.
    Unresolved,
}

/// Per-directory reconciliation status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileStatus {
    Missing,
    AllUpToDate,
    SomeUpdated { updated: usize, unresolved: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryReconcile {
    pub model_type: ModelType,
    pub path: PathBuf,
    pub status: ReconcileStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub directories: Vec<DirectoryReconcile>,
}

impl ReconcileReport {
    pub fn total_updated(&self) -> usize {
        self.directories
            .iter()
            .map(|d| match d.status {
                ReconcileStatus::SomeUpdated { updated, .. } => updated,
                _ => 0,
            })
            .sum()
    }

    pub fn total_unresolved(&self) -> usize {
        self.directories
            .iter()
            .map(|d| match d.status {
                ReconcileStatus::SomeUpdated { unresolved, .. } => unresolved,
                _ => 0,
            })
            .sum()
    }
}

/// Writes companion files and resolves identity through the catalog.
#[derive(Clone)]
pub struct MetadataReconciler {
    catalog: Arc<dyn CatalogApi>,
    layout: LibraryLayout,
}

impl MetadataReconciler {
    pub fn new(catalog: Arc<dyn CatalogApi>, layout: LibraryLayout) -> Self {
        Self { catalog, layout }
    }

    /// Look a file hash up in the catalog.
    ///
    /// A miss is not an error: the file is most likely user-trained or
    /// unlisted.
    pub async fn resolve_by_hash(&self, hash: &str) -> Result<Option<ModelVersion>> {
        let found = self.catalog.get_version_by_hash(hash).await?;
        if found.is_none() {
            info!(
                "No catalog entry for hash {}; likely a user-trained or unlisted model",
                hash
            );
        }
        Ok(found)
    }

    /// Write the companion set for `base_name` in `directory` if any file is
    /// missing.
    ///
    /// Files are written independently; a failed write is logged and the
    /// others are still attempted.
    pub async fn ensure_companion_files(
        &self,
        directory: &Path,
        base_name: &str,
        hint: VersionHint,
    ) -> Result<CompanionOutcome> {
        let paths = CompanionPaths::new(directory, base_name);
        if paths.all_present() {
            return Ok(CompanionOutcome::UpToDate);
        }
        debug!("Missing companions for {}: {:?}", base_name, paths.missing());

        let version = match hint {
            VersionHint::Known(version) => *version,
            VersionHint::Id(id) => self.catalog.get_version_by_id(id).await?,
            VersionHint::Hash(hash) => match self.resolve_by_hash(&hash).await? {
                Some(version) => version,
                None => return Ok(CompanionOutcome::Unresolved),
            },
        };

        let written = self.write_companions(&paths, &version).await;
        info!("Wrote {} metadata files for {}", written.len(), base_name);
        Ok(CompanionOutcome::Updated {
            version: Box::new(version),
            written,
        })
    }

    async fn write_companions(&self, paths: &CompanionPaths, version: &ModelVersion) -> Vec<PathBuf> {
        let mut written = Vec::new();

        match atomic_write_json(&paths.info, &version.info_document()) {
            Ok(()) => written.push(paths.info.clone()),
            Err(e) => warn!("Failed to write {}: {}", paths.info.display(), e),
        }

        let sidecar = self.build_sidecar(version).await;
        match atomic_write_json(&paths.sidecar, &sidecar) {
            Ok(()) => written.push(paths.sidecar.clone()),
            Err(e) => warn!("Failed to write {}: {}", paths.sidecar.display(), e),
        }

        if let Some(url) = version.first_image_url() {
            match self.catalog.fetch_image(url).await {
                Ok(Some(bytes)) => match atomic_write_bytes(&paths.preview, &bytes) {
                    Ok(()) => written.push(paths.preview.clone()),
                    Err(e) => warn!("Failed to write {}: {}", paths.preview.display(), e),
                },
                Ok(None) => debug!("Preview {} not available", url),
                Err(e) => debug!("Preview {} failed: {}", url, e),
            }
        } else {
            debug!("Version {} has no images", version.id);
        }

        written
    }

    async fn build_sidecar(&self, version: &ModelVersion) -> SidecarJson {
        let description = match version.model_id {
            Some(model_id) => match self.catalog.get_model_by_id(model_id).await {
                Ok(model) => model.description,
                Err(e) => {
                    warn!("Could not fetch model {} for description: {}", model_id, e);
                    None
                }
            },
            None => None,
        };

        let family = version
            .base_model
            .as_deref()
            .map(normalize_base_model)
            .unwrap_or(BaseModelFamily::Unknown);

        SidecarJson::new(
            description
                .as_deref()
                .map(html_to_text)
                .unwrap_or_else(|| "N/A".to_string()),
            version
                .description
                .clone()
                .unwrap_or_else(|| "N/A".to_string()),
            family.to_string(),
        )
    }

    /// Reconcile every artifact under `folders` (all types when `None`).
    ///
    /// Records are enriched with the identity of each version fetched and
    /// the index is saved once at the end. Per-file failures are logged and
    /// counted as unresolved.
    pub async fn reconcile(
        &self,
        index: &mut ModelIndex,
        folders: Option<&[ModelType]>,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for (model_type, dir) in self.layout.type_dirs(folders) {
            if !dir.is_dir() {
                report.directories.push(DirectoryReconcile {
                    model_type,
                    path: dir,
                    status: ReconcileStatus::Missing,
                });
                continue;
            }

            let mut needed = false;
            let mut updated = 0;
            let mut unresolved = 0;

            for file_path in artifacts_under(&dir) {
                let Some(paths) = CompanionPaths::for_artifact(&file_path) else {
                    continue;
                };
                if paths.all_present() {
                    continue;
                }
                needed = true;

                match self.reconcile_file(index, &file_path).await {
                    Ok(true) => updated += 1,
                    Ok(false) => unresolved += 1,
                    Err(e) => {
                        warn!("Failed to reconcile {}: {}", file_path.display(), e);
                        unresolved += 1;
                    }
                }
            }

            let status = if needed {
                info!(
                    "{}: {} updated, {} unresolved",
                    dir.display(),
                    updated,
                    unresolved
                );
                ReconcileStatus::SomeUpdated { updated, unresolved }
            } else {
                info!("{}: all up to date", dir.display());
                ReconcileStatus::AllUpToDate
            };
            report.directories.push(DirectoryReconcile {
                model_type,
                path: dir,
                status,
            });
        }

        index.save()?;
        Ok(report)
    }

    /// Returns whether companions were written for the file.
    async fn reconcile_file(&self, index: &mut ModelIndex, file_path: &Path) -> Result<bool> {
        let key = ModelIndex::key_for_path(file_path);
        let base_name = file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut record = index
            .get(&key)
            .cloned()
            .unwrap_or_else(|| IndexRecord::unresolved(&base_name, file_path));

        let hint = match record.model_version_id.remote_id() {
            Some(id) => VersionHint::Id(id),
            None => {
                let hash = match record.content_hash.clone() {
                    Some(hash) => hash,
                    None => {
                        let hash = compute_sha256_blocking(file_path).await?;
                        record.set_hash_once(hash.clone());
                        hash
                    }
                };
                VersionHint::Hash(hash)
            }
        };

        let directory = file_path.parent().unwrap_or(file_path);
        let outcome = self
            .ensure_companion_files(directory, &base_name, hint)
            .await;

        let resolved = match outcome {
            Ok(CompanionOutcome::Updated { version, .. }) => {
                enrich(&mut record, &version, file_path);
                true
            }
            Ok(CompanionOutcome::UpToDate) => true,
            Ok(CompanionOutcome::Unresolved) => false,
            Err(e) => {
                index.upsert(record);
                return Err(e);
            }
        };
        index.upsert(record);
        Ok(resolved)
    }
}

/// Fill in identity from a fetched version; the hash is only set if unset.
fn enrich(record: &mut IndexRecord, version: &ModelVersion, file_path: &Path) {
    let model_name = version.model_name().map(str::to_string);
    if let Some(model_id) = version.model_id {
        record.resolve(model_id, version.id, model_name);
    }
    if let Some(hash) = published_hash(version, file_path) {
        record.set_hash_once(hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_model() {
        assert_eq!(normalize_base_model("SD 1.4"), BaseModelFamily::Sd1);
        assert_eq!(normalize_base_model("SD 1.5"), BaseModelFamily::Sd1);
        assert_eq!(normalize_base_model("SD 2.0 768"), BaseModelFamily::Sd2);
        assert_eq!(normalize_base_model("SD 2.1"), BaseModelFamily::Sd2);
        assert_eq!(normalize_base_model("SDXL 0.9"), BaseModelFamily::Sdxl);
        assert_eq!(normalize_base_model("SDXL 1.0"), BaseModelFamily::Sdxl);
        assert_eq!(normalize_base_model("SDXL Turbo"), BaseModelFamily::Sdxl);
        assert_eq!(normalize_base_model("Other"), BaseModelFamily::Unknown);
        assert_eq!(normalize_base_model("Flux.1 D"), BaseModelFamily::Unknown);
        assert_eq!(BaseModelFamily::Sd2.to_string(), "SD2");
    }

    #[test]
    fn test_html_to_text() {
        assert_eq!(
            html_to_text("<p>Hello <b>world</b></p><p>Use &amp; enjoy&#33;</p>"),
            "Hello world\nUse & enjoy!"
        );
        assert_eq!(html_to_text("a<br/>b &lt;3 &#x41;"), "a\nb <3 A");
        assert_eq!(html_to_text("&unknown; stays"), "&unknown; stays");
        assert_eq!(html_to_text("   "), "");
    }
}
