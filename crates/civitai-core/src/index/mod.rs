//! Local model index.
//!
//! Maps on-disk artifacts to their catalog identity and answers "is this
//! version already downloaded". The record set is read whole from an
//! [`IndexStore`], mutated in memory and written back whole.

mod record;
mod store;

pub use record::{IndexRecord, VersionRef};
pub use store::{IndexRecords, IndexStore, JsonIndexStore, SqliteIndexStore};

use crate::error::Result;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// In-memory view of the index backed by a store.
#[derive(Clone)]
pub struct ModelIndex {
    store: Arc<dyn IndexStore>,
    records: IndexRecords,
}

impl std::fmt::Debug for ModelIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelIndex")
            .field("records", &self.records.len())
            .finish()
    }
}

impl ModelIndex {
    /// Read the store; an unusable store yields an empty index.
    pub fn load(store: Arc<dyn IndexStore>) -> Self {
        let records = store.load();
        debug!("Loaded {} index records", records.len());
        Self { store, records }
    }

    /// Re-read the store, discarding unsaved changes.
    pub fn reload(&mut self) {
        self.records = self.store.load();
    }

    /// Write the full record set back to the store.
    pub fn save(&self) -> Result<()> {
        self.store.save(&self.records)
    }

    /// Composite key of a file: base identifier plus absolute path.
    pub fn key_for(base_identifier: &str, file_path: &Path) -> String {
        format!("{}|{}", base_identifier, file_path.display())
    }

    /// Key of an artifact derived from its own path.
    pub fn key_for_path(file_path: &Path) -> String {
        let base = file_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::key_for(&base, file_path)
    }

    /// Version ids on disk for a catalog model.
    pub fn find_by_remote_model_id(&self, model_id: u64) -> BTreeSet<VersionRef> {
        self.records
            .values()
            .filter(|r| r.model_id == Some(model_id))
            .map(|r| r.model_version_id.clone())
            .collect()
    }

    pub fn is_version_downloaded(&self, version_id: u64) -> bool {
        self.records
            .values()
            .any(|r| r.model_version_id.remote_id() == Some(version_id))
    }

    pub fn get(&self, key: &str) -> Option<&IndexRecord> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut IndexRecord> {
        self.records.get_mut(key)
    }

    /// Insert or replace the record for its file.
    pub fn upsert(&mut self, record: IndexRecord) -> String {
        let key = Self::key_for_path(&record.file_path);
        self.records.insert(key.clone(), record);
        key
    }

    pub fn remove(&mut self, key: &str) -> Option<IndexRecord> {
        self.records.remove(key)
    }

    pub fn records(&self) -> &IndexRecords {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop records whose file no longer exists; returns how many.
    pub fn prune_missing(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|key, record| {
            let keep = record.file_path.exists();
            if !keep {
                debug!("Pruning index record {}", key);
            }
            keep
        });
        before - self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn json_index(tmp: &TempDir) -> ModelIndex {
        let store = JsonIndexStore::new(tmp.path().join("model_index.json"));
        ModelIndex::load(Arc::new(store))
    }

    #[test]
    fn test_key_for_is_deterministic() {
        let path = PathBuf::from("/lib/models/Lora/foo.safetensors");
        assert_eq!(
            ModelIndex::key_for("foo", &path),
            "foo|/lib/models/Lora/foo.safetensors"
        );
        assert_eq!(ModelIndex::key_for_path(&path), ModelIndex::key_for("foo", &path));
    }

    #[test]
    fn test_same_base_different_dirs_do_not_collide() {
        let tmp = TempDir::new().unwrap();
        let mut index = json_index(&tmp);

        index.upsert(IndexRecord::unresolved("foo", "/a/foo.safetensors"));
        index.upsert(IndexRecord::unresolved("foo", "/b/foo.safetensors"));
        index.upsert(IndexRecord::unresolved("foo", "/a/foo.safetensors"));

        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_find_by_remote_model_id() {
        let tmp = TempDir::new().unwrap();
        let mut index = json_index(&tmp);

        index.upsert(IndexRecord::resolved(7, 42, None, "/lib/foo.safetensors"));
        index.upsert(IndexRecord::resolved(7, 43, None, "/lib/foo_v2.safetensors"));
        index.upsert(IndexRecord::resolved(8, 50, None, "/lib/other.safetensors"));

        let versions = index.find_by_remote_model_id(7);
        assert_eq!(
            versions,
            BTreeSet::from([VersionRef::Remote(42), VersionRef::Remote(43)])
        );
        assert!(index.find_by_remote_model_id(9).is_empty());
        assert!(index.is_version_downloaded(50));
        assert!(!index.is_version_downloaded(51));
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = TempDir::new().unwrap();
        let mut index = json_index(&tmp);
        index.upsert(IndexRecord::resolved(7, 42, Some("Foo".into()), "/lib/foo.safetensors"));
        index.save().unwrap();

        let reloaded = json_index(&tmp);
        assert_eq!(reloaded.records(), index.records());
    }

    #[test]
    fn test_prune_missing() {
        let tmp = TempDir::new().unwrap();
        let present = tmp.path().join("present.safetensors");
        std::fs::write(&present, b"x").unwrap();

        let mut index = json_index(&tmp);
        index.upsert(IndexRecord::unresolved("present", &present));
        index.upsert(IndexRecord::unresolved("gone", tmp.path().join("gone.safetensors")));

        assert_eq!(index.prune_missing(), 1);
        assert_eq!(index.len(), 1);
        assert!(index.get(&ModelIndex::key_for_path(&present)).is_some());
    }
}
