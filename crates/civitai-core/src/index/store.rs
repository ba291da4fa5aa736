//! Persistence backends for the model index.
//!
//! A store loads and saves the complete record set. `save` is a full
//! replace; callers always pass the authoritative set. Loading never fails:
//! a missing or unreadable store is an empty index that the next scan
//! rebuilds.

use super::record::{IndexRecord, VersionRef};
use crate::error::{CivitaiError, Result};
use crate::metadata::{atomic_read_json, atomic_write_json};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Records keyed by [`super::ModelIndex::key_for`].
pub type IndexRecords = BTreeMap<String, IndexRecord>;

/// Key-value persistence for index records.
pub trait IndexStore: Send + Sync {
    /// Read all records; empty when nothing usable is stored.
    fn load(&self) -> IndexRecords;

    /// Replace the stored set with `records`.
    fn save(&self, records: &IndexRecords) -> Result<()>;
}

/// Flat JSON file store, written atomically.
#[derive(Debug, Clone)]
pub struct JsonIndexStore {
    path: PathBuf,
}

impl JsonIndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IndexStore for JsonIndexStore {
    fn load(&self) -> IndexRecords {
        match atomic_read_json::<IndexRecords>(&self.path) {
            Ok(Some(records)) => records,
            Ok(None) => IndexRecords::new(),
            Err(e) => {
                warn!(
                    "Ignoring unreadable index at {}: {}",
                    self.path.display(),
                    e
                );
                IndexRecords::new()
            }
        }
    }

    fn save(&self, records: &IndexRecords) -> Result<()> {
        debug!("Writing {} index records to {}", records.len(), self.path.display());
        atomic_write_json(&self.path, records)
    }
}

/// SQLite store; `save` replaces all rows in one transaction.
pub struct SqliteIndexStore {
    conn: Mutex<Connection>,
}

impl SqliteIndexStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CivitaiError::Io {
                message: format!("Failed to create index directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| CivitaiError::Database {
            message: format!("Failed to open index database: {}", e),
            source: Some(e),
        })?;
        Self::with_connection(conn)
    }

    /// In-memory database, for tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS index_records (
                key TEXT PRIMARY KEY,
                model_name TEXT,
                model_id INTEGER,
                model_version_id TEXT NOT NULL,
                content_hash TEXT,
                file_path TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| CivitaiError::Database {
            message: format!("Failed to initialize index schema: {}", e),
            source: Some(e),
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| CivitaiError::Database {
            message: format!("Failed to lock index database: {}", e),
            source: None,
        })
    }

    fn read_all(&self) -> Result<IndexRecords> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key, model_name, model_id, model_version_id, content_hash, file_path
             FROM index_records",
        )?;

        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let model_id: Option<i64> = row.get(2)?;
            let version: String = row.get(3)?;
            let file_path: String = row.get(5)?;
            Ok((
                key,
                row.get::<_, Option<String>>(1)?,
                model_id,
                version,
                row.get::<_, Option<String>>(4)?,
                file_path,
            ))
        })?;

        let mut records = IndexRecords::new();
        for row in rows {
            let (key, model_name, model_id, version, content_hash, file_path) = row?;
            let model_version_id: VersionRef = serde_json::from_str(&version)?;
            records.insert(
                key,
                IndexRecord {
                    model_name,
                    model_id: model_id.map(|id| id as u64),
                    model_version_id,
                    content_hash,
                    file_path: PathBuf::from(file_path),
                },
            );
        }
        Ok(records)
    }
}

impl IndexStore for SqliteIndexStore {
    fn load(&self) -> IndexRecords {
        self.read_all().unwrap_or_else(|e| {
            warn!("Ignoring unreadable index database: {}", e);
            IndexRecords::new()
        })
    }

    fn save(&self, records: &IndexRecords) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM index_records", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO index_records
                 (key, model_name, model_id, model_version_id, content_hash, file_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (key, record) in records {
                insert.execute(params![
                    key,
                    record.model_name,
                    record.model_id.map(|id| id as i64),
                    serde_json::to_string(&record.model_version_id)?,
                    record.content_hash,
                    record.file_path.to_string_lossy(),
                ])?;
            }
        }
        tx.commit()?;
        debug!("Wrote {} index records to database", records.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_records() -> IndexRecords {
        let mut resolved = IndexRecord::resolved(7, 42, Some("Foo".into()), "/lib/foo.safetensors");
        resolved.set_hash_once("abc123");
        let mut unresolved = IndexRecord::unresolved("bar", "/lib/bar.safetensors");
        unresolved.set_hash_once("def456");

        let mut records = IndexRecords::new();
        records.insert("foo|/lib/foo.safetensors".into(), resolved);
        records.insert("bar|/lib/bar.safetensors".into(), unresolved);
        records
    }

    #[test]
    fn test_json_store_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = JsonIndexStore::new(tmp.path().join("model_index.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_json_store_malformed_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("model_index.json");
        std::fs::write(&path, "[1, 2, \"not an index\"").unwrap();

        let store = JsonIndexStore::new(&path);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_json_store_save_of_load_is_noop() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("model_index.json");
        let store = JsonIndexStore::new(&path);

        store.save(&sample_records()).unwrap();
        let before = std::fs::read(&path).unwrap();

        store.save(&store.load()).unwrap();
        let after = std::fs::read(&path).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn test_json_store_save_replaces() {
        let tmp = TempDir::new().unwrap();
        let store = JsonIndexStore::new(tmp.path().join("model_index.json"));

        store.save(&sample_records()).unwrap();
        let mut fewer = sample_records();
        fewer.remove("bar|/lib/bar.safetensors");
        store.save(&fewer).unwrap();

        assert_eq!(store.load(), fewer);
    }

    #[test]
    fn test_sqlite_store_roundtrip() {
        let store = SqliteIndexStore::in_memory().unwrap();
        assert!(store.load().is_empty());

        store.save(&sample_records()).unwrap();
        assert_eq!(store.load(), sample_records());

        store.save(&IndexRecords::new()).unwrap();
        assert!(store.load().is_empty());
    }
}
