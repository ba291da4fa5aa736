//! Streaming SHA-256 for artifact files.
//!
//! Files are read in fixed-size chunks so memory stays bounded no matter
//! how large the weights are.

use crate::config::ScanConfig;
use crate::error::{CivitaiError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Lowercase hex SHA-256 of a file.
pub fn compute_sha256(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| CivitaiError::io_with_path(e, path))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; ScanConfig::HASH_CHUNK_SIZE];
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| CivitaiError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// [`compute_sha256`] on the blocking pool.
pub async fn compute_sha256_blocking(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || compute_sha256(&path))
        .await
        .map_err(|e| CivitaiError::Other(format!("Hash computation task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sha256_empty_file() {
        let file = NamedTempFile::new().unwrap();
        assert_eq!(
            compute_sha256(file.path()).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_spans_chunks() {
        let mut file = NamedTempFile::new().unwrap();
        let content = vec![7u8; ScanConfig::HASH_CHUNK_SIZE * 3 + 17];
        file.write_all(&content).unwrap();
        file.flush().unwrap();

        let expected = hex::encode(Sha256::digest(&content));
        assert_eq!(compute_sha256(file.path()).unwrap(), expected);
    }

    #[test]
    fn test_sha256_missing_file() {
        let result = compute_sha256("/nonexistent/foo.safetensors");
        assert!(matches!(result, Err(CivitaiError::Io { .. })));
    }

    #[tokio::test]
    async fn test_sha256_blocking() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"Hello, World!").unwrap();
        file.flush().unwrap();

        let hash = compute_sha256_blocking(file.path()).await.unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, compute_sha256(file.path()).unwrap());
    }
}
