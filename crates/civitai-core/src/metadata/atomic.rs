//! Atomic file writes for the index, settings and companion files.
//!
//! Content is written to a named temp file in the target's directory,
//! fsynced, then persisted over the target, so a crash mid-write leaves
//! either the old file or the new one.

use crate::{CivitaiError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Parse a JSON file; `Ok(None)` when it does not exist.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CivitaiError::io_with_path(e, path)),
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| CivitaiError::Json {
            message: format!("Failed to parse {}: {}", path.display(), e),
            source: Some(e),
        })
}

/// Pretty-print `data` and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let mut serialized = serde_json::to_vec_pretty(data).map_err(|e| CivitaiError::Json {
        message: format!("Failed to serialize {}: {}", path.display(), e),
        source: Some(e),
    })?;
    serialized.push(b'\n');

    atomic_write_bytes(path, &serialized)
}

/// Write `bytes` to `path`, creating parent directories as needed.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| CivitaiError::io_with_path(e, dir))?;

    // Dropping an unpersisted temp file deletes it.
    let mut staged = NamedTempFile::new_in(dir).map_err(|e| CivitaiError::io_with_path(e, dir))?;
    staged
        .write_all(bytes)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|e| CivitaiError::io_with_path(e, staged.path()))?;

    staged
        .persist(path)
        .map_err(|e| CivitaiError::io_with_path(e.error, path))?;

    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::fs;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sidecar {
        notes: String,
        weight: f64,
    }

    #[test]
    fn test_write_then_read_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("foo.json");
        let sidecar = Sidecar {
            notes: "N/A".into(),
            weight: 0.0,
        };

        atomic_write_json(&path, &sidecar).unwrap();

        assert_eq!(atomic_read_json::<Sidecar>(&path).unwrap(), Some(sidecar));
        assert!(fs::read_to_string(&path).unwrap().ends_with("}\n"));
    }

    #[test]
    fn test_missing_file_reads_as_none() {
        let temp_dir = TempDir::new().unwrap();
        let result = atomic_read_json::<Sidecar>(&temp_dir.path().join("absent.json")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_malformed_file_is_json_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("foo.civitai.info");
        fs::write(&path, "{ truncated").unwrap();

        let result = atomic_read_json::<Sidecar>(&path);
        assert!(matches!(result, Err(CivitaiError::Json { .. })));
    }

    #[test]
    fn test_overwrite_leaves_only_target() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("models/Lora/foo.preview.png");

        atomic_write_bytes(&path, b"old").unwrap();
        atomic_write_bytes(&path, b"\x89PNG").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"\x89PNG");
        let entries = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
