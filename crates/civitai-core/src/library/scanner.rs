//! Rebuilds the index from the files under the library root.
//!
//! The filesystem is authoritative: every artifact found gets a record,
//! identity is taken from a sibling `.civitai.info` when one parses, and
//! only files without usable metadata are hashed. Records whose file is
//! gone are pruned.

use super::companion::CompanionPaths;
use super::hashing::compute_sha256;
use super::layout::{artifacts_under, LibraryLayout, ModelType};
use crate::catalog::ModelVersion;
use crate::error::Result;
use crate::index::{IndexRecord, ModelIndex, VersionRef};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of scanning one type directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryScan {
    pub model_type: ModelType,
    pub path: PathBuf,
    /// False when the directory does not exist and was skipped.
    pub exists: bool,
    pub files_seen: usize,
    pub newly_indexed: usize,
    pub identified_from_info: usize,
    pub hashed: usize,
    pub pruned: usize,
}

/// Outcome of a full scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Whether any previously unindexed file was found.
    pub discovered_new: bool,
    pub directories: Vec<DirectoryScan>,
    /// Dangling records removed outside the scanned directories.
    pub pruned_elsewhere: usize,
}

impl ScanSummary {
    pub fn total_pruned(&self) -> usize {
        self.pruned_elsewhere + self.directories.iter().map(|d| d.pruned).sum::<usize>()
    }

    pub fn total_hashed(&self) -> usize {
        self.directories.iter().map(|d| d.hashed).sum()
    }
}

/// Walks the type directories and refreshes the index.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    layout: LibraryLayout,
}

impl DirectoryScanner {
    pub fn new(layout: LibraryLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &LibraryLayout {
        &self.layout
    }

    /// Scan `folders` (every type when `None`), prune and persist.
    ///
    /// A missing directory is skipped. A corrupt `.civitai.info` counts as
    /// absent. Unreadable files are logged and left out of the index.
    pub fn scan(&self, index: &mut ModelIndex, folders: Option<&[ModelType]>) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();

        for (model_type, dir) in self.layout.type_dirs(folders) {
            let mut dir_scan = DirectoryScan {
                model_type: model_type.clone(),
                path: dir.clone(),
                ..Default::default()
            };

            if !dir.is_dir() {
                info!("Directory {} not found, skipping", dir.display());
                summary.directories.push(dir_scan);
                continue;
            }
            dir_scan.exists = true;
            info!("Scanning {}", dir.display());

            for file_path in artifacts_under(&dir) {
                dir_scan.files_seen += 1;
                self.scan_file(index, &file_path, &mut dir_scan);
            }

            dir_scan.pruned = prune_under(index, &dir);
            summary.discovered_new |= dir_scan.newly_indexed > 0;
            summary.directories.push(dir_scan);
        }

        summary.pruned_elsewhere = index.prune_missing();
        index.save()?;

        info!(
            "Scan complete: {} records, {} hashed, {} pruned",
            index.len(),
            summary.total_hashed(),
            summary.total_pruned()
        );
        Ok(summary)
    }

    fn scan_file(&self, index: &mut ModelIndex, file_path: &Path, dir_scan: &mut DirectoryScan) {
        let Some(base_name) = file_path.file_stem().map(|s| s.to_string_lossy().into_owned())
        else {
            return;
        };
        let key = ModelIndex::key_for(&base_name, file_path);

        let existing = index.get(&key).cloned();
        if existing.as_ref().is_some_and(IndexRecord::is_resolved) {
            return;
        }
        let is_new = existing.is_none();
        let mut record =
            existing.unwrap_or_else(|| IndexRecord::unresolved(&base_name, file_path));

        let companions = CompanionPaths::new(file_path.parent().unwrap_or(file_path), &base_name);
        match companions.read_info() {
            Some(version) => {
                apply_info(&mut record, &version, file_path);
                dir_scan.identified_from_info += 1;
            }
            None if record.content_hash.is_none() => {
                debug!("Hashing {}", file_path.display());
                match compute_sha256(file_path) {
                    Ok(hash) => {
                        record.set_hash_once(hash);
                        dir_scan.hashed += 1;
                    }
                    Err(e) => {
                        warn!("Failed to hash {}: {}", file_path.display(), e);
                        return;
                    }
                }
            }
            None => {}
        }

        if is_new {
            dir_scan.newly_indexed += 1;
        }
        index.upsert(record);
    }
}

/// Copy identity from parsed `.civitai.info` onto a record.
fn apply_info(record: &mut IndexRecord, version: &ModelVersion, file_path: &Path) {
    let model_name = version.model_name().map(str::to_string);
    match version.model_id {
        Some(model_id) => record.resolve(model_id, version.id, model_name),
        None => {
            record.model_version_id = VersionRef::Remote(version.id);
            if model_name.is_some() {
                record.model_name = model_name;
            }
        }
    }

    if let Some(hash) = published_hash(version, file_path) {
        record.set_hash_once(hash);
    }
}

/// SHA-256 the catalog lists for this file, matched by name first.
pub fn published_hash(version: &ModelVersion, file_path: &Path) -> Option<String> {
    let file_name = file_path.file_name()?.to_str()?;
    version
        .files
        .iter()
        .find(|f| f.name == file_name)
        .and_then(|f| f.sha256())
        .or_else(|| version.primary_sha256())
}

fn prune_under(index: &mut ModelIndex, dir: &Path) -> usize {
    let dangling: Vec<String> = index
        .records()
        .iter()
        .filter(|(_, r)| r.file_path.starts_with(dir) && !r.file_path.exists())
        .map(|(key, _)| key.clone())
        .collect();

    for key in &dangling {
        debug!("Pruning index record {}", key);
        index.remove(key);
    }
    dangling.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::JsonIndexStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DirectoryScanner, ModelIndex) {
        let tmp = TempDir::new().unwrap();
        let layout = LibraryLayout::new(tmp.path().join("library"));
        let store = JsonIndexStore::new(tmp.path().join("data").join("model_index.json"));
        let index = ModelIndex::load(Arc::new(store));
        (tmp, DirectoryScanner::new(layout), index)
    }

    fn lora_dir(scanner: &DirectoryScanner) -> PathBuf {
        let dir = scanner.layout().type_dir(&ModelType::Lora);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_info_file_identifies_without_hashing() {
        let (_tmp, scanner, mut index) = setup();
        let dir = lora_dir(&scanner);
        let artifact = dir.join("foo.safetensors");
        std::fs::write(&artifact, b"weights").unwrap();
        std::fs::write(dir.join("foo.civitai.info"), r#"{"id": 42, "modelId": 7}"#).unwrap();

        let summary = scanner.scan(&mut index, Some(&[ModelType::Lora])).unwrap();

        assert!(summary.discovered_new);
        assert_eq!(summary.total_hashed(), 0);
        let record = index.get(&ModelIndex::key_for("foo", &artifact)).unwrap();
        assert_eq!(record.model_id, Some(7));
        assert_eq!(record.model_version_id, VersionRef::Remote(42));
        assert_eq!(record.file_path, artifact);
        assert!(record.content_hash.is_none());
    }

    #[test]
    fn test_file_without_info_is_hashed() {
        let (_tmp, scanner, mut index) = setup();
        let dir = lora_dir(&scanner);
        let artifact = dir.join("bar.safetensors");
        std::fs::write(&artifact, b"weights").unwrap();

        scanner.scan(&mut index, None).unwrap();

        let record = index.get(&ModelIndex::key_for("bar", &artifact)).unwrap();
        assert_eq!(
            record.content_hash.as_deref(),
            Some(compute_sha256(&artifact).unwrap().as_str())
        );
        assert!(record.model_id.is_none());
        assert_eq!(record.model_version_id, VersionRef::Derived("bar".into()));
    }

    #[test]
    fn test_corrupt_info_falls_through_to_hashing() {
        let (_tmp, scanner, mut index) = setup();
        let dir = lora_dir(&scanner);
        let artifact = dir.join("baz.ckpt");
        std::fs::write(&artifact, b"weights").unwrap();
        std::fs::write(dir.join("baz.civitai.info"), "{ truncated").unwrap();

        scanner.scan(&mut index, None).unwrap();

        let record = index.get(&ModelIndex::key_for("baz", &artifact)).unwrap();
        assert!(record.content_hash.is_some());
        assert!(!record.is_resolved());
    }

    #[test]
    fn test_second_scan_is_idempotent() {
        let (_tmp, scanner, mut index) = setup();
        let dir = lora_dir(&scanner);
        std::fs::write(dir.join("bar.safetensors"), b"weights").unwrap();
        std::fs::write(dir.join("foo.safetensors"), b"other").unwrap();
        std::fs::write(dir.join("foo.civitai.info"), r#"{"id": 42, "modelId": 7}"#).unwrap();

        scanner.scan(&mut index, None).unwrap();
        let first = index.records().clone();

        let summary = scanner.scan(&mut index, None).unwrap();

        assert!(!summary.discovered_new);
        assert_eq!(summary.total_hashed(), 0);
        assert_eq!(index.records(), &first);
    }

    #[test]
    fn test_missing_files_are_pruned() {
        let (_tmp, scanner, mut index) = setup();
        let dir = lora_dir(&scanner);
        let artifact = dir.join("bar.safetensors");
        std::fs::write(&artifact, b"weights").unwrap();
        index.upsert(IndexRecord::resolved(1, 2, None, "/elsewhere/gone.safetensors"));

        scanner.scan(&mut index, None).unwrap();
        assert_eq!(index.len(), 1);

        std::fs::remove_file(&artifact).unwrap();
        let summary = scanner.scan(&mut index, None).unwrap();

        assert!(index.is_empty());
        assert_eq!(summary.total_pruned(), 1);
    }

    #[test]
    fn test_missing_directory_is_skipped() {
        let (_tmp, scanner, mut index) = setup();

        let summary = scanner.scan(&mut index, Some(&[ModelType::Checkpoint])).unwrap();

        assert!(!summary.discovered_new);
        assert_eq!(summary.directories.len(), 1);
        assert!(!summary.directories[0].exists);
    }

    #[test]
    fn test_non_artifacts_ignored_and_subdirs_walked() {
        let (_tmp, scanner, mut index) = setup();
        let dir = lora_dir(&scanner);
        let nested = dir.join("styles");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("deep.safetensors"), b"weights").unwrap();
        std::fs::write(dir.join("readme.txt"), b"hi").unwrap();
        std::fs::write(dir.join("deep.preview.png"), b"png").unwrap();

        scanner.scan(&mut index, None).unwrap();

        assert_eq!(index.len(), 1);
        assert!(index
            .get(&ModelIndex::key_for("deep", &nested.join("deep.safetensors")))
            .is_some());
    }

    #[test]
    fn test_scan_persists_index() {
        let (tmp, scanner, mut index) = setup();
        let dir = lora_dir(&scanner);
        std::fs::write(dir.join("bar.safetensors"), b"weights").unwrap();

        scanner.scan(&mut index, None).unwrap();

        let store = JsonIndexStore::new(tmp.path().join("data").join("model_index.json"));
        let reloaded = ModelIndex::load(Arc::new(store));
        assert_eq!(reloaded.records(), index.records());
    }
}
