//! Pending-retry list for failed or interrupted downloads.
//!
//! Persists every job that did not finish to a JSON file so a later
//! "resume" can re-drive it. Entries are keyed by version id and removed
//! once the version downloads successfully.

use super::orchestrator::{DownloadJob, DownloadOrchestrator, JobReport};
use crate::config::PathsConfig;
use crate::error::Result;
use crate::index::ModelIndex;
use crate::library::ModelType;
use crate::metadata::{atomic_read_json, atomic_write_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A job waiting to be retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDownload {
    pub model_id: u64,
    pub version_id: u64,
    pub model_type: ModelType,
    pub last_error: String,
    pub failed_at: DateTime<Utc>,
}

impl PendingDownload {
    pub fn new(job: &DownloadJob, error: impl Into<String>) -> Self {
        Self {
            model_id: job.model_id,
            version_id: job.version_id,
            model_type: job.model_type.clone(),
            last_error: error.into(),
            failed_at: Utc::now(),
        }
    }

    pub fn job(&self) -> DownloadJob {
        DownloadJob {
            model_id: self.model_id,
            version_id: self.version_id,
            model_type: self.model_type.clone(),
        }
    }
}

/// The JSON root object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PendingData {
    downloads: Vec<PendingDownload>,
}

/// Manages `pending_downloads.json`.
#[derive(Debug, Clone)]
pub struct PendingRetryList {
    path: PathBuf,
}

impl PendingRetryList {
    /// List stored at `{data_dir}/pending_downloads.json`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(PathsConfig::PENDING_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a failure; an existing entry for the same version is replaced.
    pub fn push(&self, entry: PendingDownload) -> Result<()> {
        let mut data = self.load_data();
        if let Some(existing) = data
            .downloads
            .iter_mut()
            .find(|d| d.version_id == entry.version_id)
        {
            *existing = entry;
        } else {
            data.downloads.push(entry);
        }
        self.write_data(&data)
    }

    /// Remove the entry for a version; returns whether one existed.
    pub fn remove(&self, version_id: u64) -> Result<bool> {
        let mut data = self.load_data();
        let before = data.downloads.len();
        data.downloads.retain(|d| d.version_id != version_id);
        if data.downloads.len() < before {
            self.write_data(&data)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn clear(&self) -> Result<()> {
        self.write_data(&PendingData::default())
    }

    pub fn load_all(&self) -> Vec<PendingDownload> {
        self.load_data().downloads
    }

    /// Return all entries and empty the list.
    pub fn take_all(&self) -> Result<Vec<PendingDownload>> {
        let data = self.load_data();
        if !data.downloads.is_empty() {
            self.clear()?;
        }
        Ok(data.downloads)
    }

    pub fn is_empty(&self) -> bool {
        self.load_all().is_empty()
    }

    /// Re-drive every pending job; successful ones leave the list.
    ///
    /// Jobs that fail again stay queued with their new error. Stops early
    /// when the orchestrator is cancelled.
    pub async fn resume(
        &self,
        orchestrator: &DownloadOrchestrator,
        index: &mut ModelIndex,
    ) -> Result<Vec<JobReport>> {
        let entries = self.load_all();
        info!("Resuming {} interrupted downloads", entries.len());

        let mut reports = Vec::with_capacity(entries.len());
        for entry in entries {
            if orchestrator.is_cancelled() {
                break;
            }
            let report = orchestrator.run_job(index, &entry.job()).await;
            if report.succeeded() {
                self.remove(entry.version_id)?;
            }
            reports.push(report);
        }
        Ok(reports)
    }

    /// Read store data, returning empty on any error.
    fn load_data(&self) -> PendingData {
        match atomic_read_json::<PendingData>(&self.path) {
            Ok(Some(data)) => data,
            Ok(None) => PendingData::default(),
            Err(e) => {
                warn!("Failed to read pending list at {}: {}", self.path.display(), e);
                PendingData::default()
            }
        }
    }

    fn write_data(&self, data: &PendingData) -> Result<()> {
        debug!(
            "Writing {} pending downloads to {}",
            data.downloads.len(),
            self.path.display()
        );
        atomic_write_json(&self.path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn job(version_id: u64) -> DownloadJob {
        DownloadJob {
            model_id: 7,
            version_id,
            model_type: ModelType::Lora,
        }
    }

    #[test]
    fn test_push_and_load() {
        let tmp = TempDir::new().unwrap();
        let list = PendingRetryList::new(tmp.path());

        list.push(PendingDownload::new(&job(42), "connection reset")).unwrap();

        let loaded = list.load_all();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].version_id, 42);
        assert_eq!(loaded[0].model_type, ModelType::Lora);
        assert_eq!(loaded[0].job(), job(42));
    }

    #[test]
    fn test_push_dedups_by_version() {
        let tmp = TempDir::new().unwrap();
        let list = PendingRetryList::new(tmp.path());

        list.push(PendingDownload::new(&job(42), "first")).unwrap();
        list.push(PendingDownload::new(&job(42), "second")).unwrap();
        list.push(PendingDownload::new(&job(43), "other")).unwrap();

        let loaded = list.load_all();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].last_error, "second");
    }

    #[test]
    fn test_remove_and_take_all() {
        let tmp = TempDir::new().unwrap();
        let list = PendingRetryList::new(tmp.path());
        list.push(PendingDownload::new(&job(1), "e")).unwrap();
        list.push(PendingDownload::new(&job(2), "e")).unwrap();

        assert!(list.remove(1).unwrap());
        assert!(!list.remove(1).unwrap());

        let taken = list.take_all().unwrap();
        assert_eq!(taken.len(), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn test_load_empty_and_corrupt() {
        let tmp = TempDir::new().unwrap();
        let list = PendingRetryList::new(tmp.path());
        assert!(list.load_all().is_empty());

        std::fs::write(list.path(), "not json").unwrap();
        assert!(list.load_all().is_empty());
    }
}
