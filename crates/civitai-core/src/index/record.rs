//! Index record types.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Version identity of an indexed file.
///
/// Numeric once the catalog version is known; before that, a name derived
/// from the file's base name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionRef {
    Remote(u64),
    Derived(String),
}

impl VersionRef {
    pub fn remote_id(&self) -> Option<u64> {
        match self {
            VersionRef::Remote(id) => Some(*id),
            VersionRef::Derived(_) => None,
        }
    }
}

impl std::fmt::Display for VersionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionRef::Remote(id) => write!(f, "{}", id),
            VersionRef::Derived(name) => write!(f, "{}", name),
        }
    }
}

/// One on-disk artifact and its remote identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<u64>,
    pub model_version_id: VersionRef,
    /// Lowercase hex SHA-256; set once, never recomputed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub file_path: PathBuf,
}

impl IndexRecord {
    /// Record for a file whose remote identity is not yet known.
    pub fn unresolved(base_name: &str, file_path: impl Into<PathBuf>) -> Self {
        Self {
            model_name: None,
            model_id: None,
            model_version_id: VersionRef::Derived(base_name.to_string()),
            content_hash: None,
            file_path: file_path.into(),
        }
    }

    /// Record with full remote identity.
    pub fn resolved(
        model_id: u64,
        version_id: u64,
        model_name: Option<String>,
        file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model_name,
            model_id: Some(model_id),
            model_version_id: VersionRef::Remote(version_id),
            content_hash: None,
            file_path: file_path.into(),
        }
    }

    /// Both model id and a numeric version id are known.
    pub fn is_resolved(&self) -> bool {
        self.model_id.is_some() && self.model_version_id.remote_id().is_some()
    }

    /// Set the hash unless one is already recorded.
    pub fn set_hash_once(&mut self, hash: impl Into<String>) {
        if self.content_hash.is_none() {
            self.content_hash = Some(hash.into().to_lowercase());
        }
    }

    /// Fill in remote identity; the content hash is left untouched.
    pub fn resolve(&mut self, model_id: u64, version_id: u64, model_name: Option<String>) {
        self.model_id = Some(model_id);
        self.model_version_id = VersionRef::Remote(version_id);
        if model_name.is_some() {
            self.model_name = model_name;
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ref_serializes_untagged() {
        assert_eq!(serde_json::to_string(&VersionRef::Remote(42)).unwrap(), "42");
        assert_eq!(
            serde_json::to_string(&VersionRef::Derived("foo".into())).unwrap(),
            "\"foo\""
        );

        let parsed: VersionRef = serde_json::from_str("42").unwrap();
        assert_eq!(parsed, VersionRef::Remote(42));
        let parsed: VersionRef = serde_json::from_str("\"foo_v2\"").unwrap();
        assert_eq!(parsed, VersionRef::Derived("foo_v2".into()));
    }

    #[test]
    fn test_hash_is_set_once() {
        let mut record = IndexRecord::unresolved("bar", "/lib/bar.safetensors");
        record.set_hash_once("ABC");
        record.set_hash_once("def");
        assert_eq!(record.content_hash.as_deref(), Some("abc"));
    }

    #[test]
    fn test_resolve_keeps_hash() {
        let mut record = IndexRecord::unresolved("bar", "/lib/bar.safetensors");
        record.set_hash_once("abc");
        assert!(!record.is_resolved());

        record.resolve(7, 42, Some("Bar".into()));

        assert!(record.is_resolved());
        assert_eq!(record.model_version_id, VersionRef::Remote(42));
        assert_eq!(record.content_hash.as_deref(), Some("abc"));
    }

    #[test]
    fn test_record_json_shape() {
        let record = IndexRecord::resolved(7, 42, None, "/lib/foo.safetensors");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["modelId"], 7);
        assert_eq!(json["modelVersionId"], 42);
        assert_eq!(json["filePath"], "/lib/foo.safetensors");
        assert!(json.get("contentHash").is_none());
    }
}
