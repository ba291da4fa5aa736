//! End-to-end retrieval of one model version.
//!
//! A job fetches version detail, streams the primary artifact into a
//! staging directory under the library root, moves it into its type
//! directory, writes companion metadata and records it in the index.
//! Anything that fails before the artifact is placed lands on the
//! pending-retry list.

use super::pending::{PendingDownload, PendingRetryList};
use crate::cancel::CancellationToken;
use crate::catalog::{CatalogApi, Model, ModelVersion};
use crate::error::{CivitaiError, Result};
use crate::index::{IndexRecord, ModelIndex};
use crate::library::{
    compute_sha256_blocking, published_hash, CompanionOutcome, LibraryLayout, MetadataReconciler,
    ModelType, VersionHint,
};
use crate::network::{promote, sanitize_file_name, DownloadManager, DownloadProgress};
use crate::ui::Presenter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Stage of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Pending,
    FetchingDetail,
    Downloading,
    SavingMetadata,
    Indexing,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::FetchingDetail => "fetching detail",
            JobState::Downloading => "downloading",
            JobState::SavingMetadata => "saving metadata",
            JobState::Indexing => "indexing",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One version to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub model_id: u64,
    pub version_id: u64,
    pub model_type: ModelType,
}

impl DownloadJob {
    pub fn for_version(model: &Model, version: &ModelVersion) -> Self {
        Self {
            model_id: model.id,
            version_id: version.id,
            model_type: model.model_type.clone(),
        }
    }
}

/// What happened to a job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: DownloadJob,
    pub state: JobState,
    /// States entered, in order, starting with `Pending`.
    pub transitions: Vec<JobState>,
    pub artifact: Option<PathBuf>,
    pub metadata_written: Vec<PathBuf>,
    pub error: Option<String>,
    pub cancelled: bool,
}

impl JobReport {
    fn new(job: &DownloadJob) -> Self {
        Self {
            job: job.clone(),
            state: JobState::Pending,
            transitions: vec![JobState::Pending],
            artifact: None,
            metadata_written: Vec::new(),
            error: None,
            cancelled: false,
        }
    }

    fn enter(&mut self, state: JobState) {
        debug!(
            "Version {}: {} -> {}",
            self.job.version_id, self.state, state
        );
        self.state = state;
        self.transitions.push(state);
    }

    pub fn succeeded(&self) -> bool {
        self.state == JobState::Done
    }
}

/// Coordinates download jobs against one library.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    catalog: Arc<dyn CatalogApi>,
    layout: LibraryLayout,
    reconciler: MetadataReconciler,
    pending: PendingRetryList,
    downloads: DownloadManager,
    cancel: CancellationToken,
    progress_tx: Option<mpsc::Sender<DownloadProgress>>,
}

impl DownloadOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        layout: LibraryLayout,
        pending: PendingRetryList,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reconciler: MetadataReconciler::new(catalog.clone(), layout.clone()),
            catalog,
            layout,
            pending,
            downloads: DownloadManager::new(cancel.clone()),
            cancel,
            progress_tx: None,
        }
    }

    /// Send artifact progress to `tx`.
    pub fn with_progress(mut self, tx: mpsc::Sender<DownloadProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn pending(&self) -> &PendingRetryList {
        &self.pending
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Delete staging directories left by an aborted run.
    ///
    /// Only call while no job is running.
    pub fn discard_stale_staging(&self) -> usize {
        let staging_root = self.layout.staging_dir();
        let Ok(entries) = std::fs::read_dir(&staging_root) else {
            return 0;
        };

        let mut removed = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove stale staging {}: {}", path.display(), e),
            }
        }
        if removed > 0 {
            info!("Discarded {} stale staging entries", removed);
        }
        removed
    }

    /// Run one job to completion.
    ///
    /// Never returns an error: the outcome is in the report, and a job that
    /// failed before its artifact was placed is added to the pending list.
    pub async fn run_job(&self, index: &mut ModelIndex, job: &DownloadJob) -> JobReport {
        let mut report = JobReport::new(job);

        report.enter(JobState::FetchingDetail);
        let version = match self.catalog.get_version_by_id(job.version_id).await {
            Ok(version) => version,
            Err(e) => return self.fail(report, e),
        };

        report.enter(JobState::Downloading);
        let (artifact, model_type) = match self.download_artifact(job, &version).await {
            Ok(placed) => placed,
            Err(e) => return self.fail(report, e),
        };
        report.artifact = Some(artifact.clone());

        report.enter(JobState::SavingMetadata);
        report.metadata_written = self.save_metadata(&artifact, &version).await;

        report.enter(JobState::Indexing);
        self.index_artifact(index, job, &version, &artifact).await;

        report.enter(JobState::Done);
        if let Err(e) = self.pending.remove(job.version_id) {
            warn!("Failed to update pending list: {}", e);
        }
        info!(
            "Downloaded version {} ({}) to {}",
            version.id,
            model_type,
            artifact.display()
        );
        report
    }

    /// Run jobs one after another.
    ///
    /// A failed job does not stop the batch. Cancellation does; jobs not yet
    /// started are queued on the pending list.
    pub async fn run_batch(&self, index: &mut ModelIndex, jobs: &[DownloadJob]) -> Vec<JobReport> {
        let mut reports = Vec::with_capacity(jobs.len());
        for (i, job) in jobs.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!("Batch cancelled with {} jobs remaining", jobs.len() - i);
                for remaining in &jobs[i..] {
                    self.record_pending(remaining, "cancelled before start");
                }
                break;
            }

            let report = self.run_job(index, job).await;
            let cancelled = report.cancelled;
            reports.push(report);
            if cancelled {
                for remaining in &jobs[i + 1..] {
                    self.record_pending(remaining, "cancelled before start");
                }
                break;
            }
        }
        reports
    }

    /// Stream the artifact to staging, then move it into place.
    ///
    /// Returns the final path and the model type used for the directory.
    async fn download_artifact(
        &self,
        job: &DownloadJob,
        version: &ModelVersion,
    ) -> Result<(PathBuf, ModelType)> {
        self.cancel.check()?;

        let model_type = match &job.model_type {
            ModelType::Other => version.model_type(),
            known => known.clone(),
        };

        let staging_root = self.layout.staging_dir();
        std::fs::create_dir_all(&staging_root)
            .map_err(|e| CivitaiError::io_with_path(e, &staging_root))?;
        // Removed on drop, so a failed or cancelled job leaves nothing behind.
        let staging = tempfile::Builder::new()
            .prefix("download-")
            .tempdir_in(&staging_root)
            .map_err(|e| CivitaiError::io_with_path(e, &staging_root))?;

        let url = version.artifact_url();
        let stream = self.catalog.open_download(&url).await?;
        let file_name = stream
            .file_name
            .clone()
            .or_else(|| {
                version
                    .primary_file()
                    .and_then(|f| sanitize_file_name(&f.name))
            })
            .unwrap_or_else(|| format!("{}.safetensors", version.id));

        let staged = staging.path().join(&file_name);
        let bytes = self
            .downloads
            .stream_to_file(stream, &staged, self.progress_tx.clone())
            .await?;
        debug!("Received {} bytes for version {}", bytes, version.id);

        let destination = self.layout.type_dir(&model_type).join(&file_name);
        promote(&staged, &destination)?;
        Ok((destination, model_type))
    }

    async fn save_metadata(&self, artifact: &Path, version: &ModelVersion) -> Vec<PathBuf> {
        let (Some(directory), Some(base_name)) = (
            artifact.parent(),
            artifact.file_stem().and_then(|s| s.to_str()),
        ) else {
            return Vec::new();
        };

        let hint = VersionHint::Known(Box::new(version.clone()));
        match self
            .reconciler
            .ensure_companion_files(directory, base_name, hint)
            .await
        {
            Ok(CompanionOutcome::Updated { written, .. }) => written,
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!("Failed to save metadata for {}: {}", base_name, e);
                Vec::new()
            }
        }
    }

    async fn index_artifact(
        &self,
        index: &mut ModelIndex,
        job: &DownloadJob,
        version: &ModelVersion,
        artifact: &Path,
    ) {
        let mut record = IndexRecord::resolved(
            version.model_id.unwrap_or(job.model_id),
            version.id,
            version.model_name().map(str::to_string),
            artifact,
        );

        let hash = match published_hash(version, artifact) {
            Some(hash) => Some(hash),
            None => match compute_sha256_blocking(artifact).await {
                Ok(hash) => Some(hash),
                Err(e) => {
                    warn!("Failed to hash {}: {}", artifact.display(), e);
                    None
                }
            },
        };
        if let Some(hash) = hash {
            record.set_hash_once(hash);
        }

        index.upsert(record);
        if let Err(e) = index.save() {
            warn!("Failed to save index after download: {}", e);
        }
    }

    fn fail(&self, mut report: JobReport, err: CivitaiError) -> JobReport {
        report.cancelled = matches!(err, CivitaiError::DownloadCancelled);
        let message = err.to_string();
        if report.cancelled {
            warn!("Download of version {} cancelled", report.job.version_id);
        } else {
            error!(
                "Download of version {} failed while {} ({}): {}",
                report.job.version_id,
                report.state,
                err.failure_class(),
                message
            );
        }

        self.record_pending(&report.job, &message);
        report.error = Some(message);
        report.enter(JobState::Failed);
        report
    }

    fn record_pending(&self, job: &DownloadJob, message: &str) {
        if let Err(e) = self.pending.push(PendingDownload::new(job, message)) {
            error!(
                "Failed to queue version {} for retry: {}",
                job.version_id, e
            );
        }
    }
}

/// Pick the versions of `model` to download.
///
/// A single version is taken as is. With several, the presenter is asked
/// for a multi-selection; versions already in the index are marked.
pub fn select_versions(
    model: &Model,
    presenter: &dyn Presenter,
    index: &ModelIndex,
) -> Vec<DownloadJob> {
    match model.model_versions.as_slice() {
        [] => {
            info!("Model {} has no versions", model.id);
            Vec::new()
        }
        [only] => vec![DownloadJob::for_version(model, only)],
        versions => {
            let options: Vec<String> = versions
                .iter()
                .map(|v| {
                    let marker = if index.is_version_downloaded(v.id) {
                        " [downloaded]"
                    } else {
                        ""
                    };
                    format!("{} - {}{}", model.name, v.name, marker)
                })
                .collect();

            presenter
                .present_choice("Which versions would you like to download?", &options, true)
                .into_iter()
                .filter_map(|i| versions.get(i))
                .map(|v| DownloadJob::for_version(model, v))
                .collect()
        }
    }
}

/// Jobs for explicitly requested version ids; unknown ids are skipped.
pub fn jobs_for_versions(model: &Model, version_ids: &[u64]) -> Vec<DownloadJob> {
    version_ids
        .iter()
        .filter_map(|&id| match model.version(id) {
            Some(version) => Some(DownloadJob::for_version(model, version)),
            None => {
                warn!("Model {} has no version {}", model.id, id);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::JsonIndexStore;
    use crate::ui::ImageDisplay;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Scripted {
        answer: Vec<usize>,
        asked: Mutex<Vec<String>>,
    }

    impl Presenter for Scripted {
        fn present_choice(&self, _prompt: &str, options: &[String], _multi: bool) -> Vec<usize> {
            self.asked.lock().unwrap().extend(options.iter().cloned());
            self.answer.clone()
        }

        fn present_image(&self, _bytes: &[u8], _display: ImageDisplay) {}
    }

    fn model_with_versions(ids: &[u64]) -> Model {
        Model {
            id: 7,
            name: "Foo".into(),
            model_type: ModelType::Lora,
            model_versions: ids
                .iter()
                .map(|&id| ModelVersion {
                    id,
                    name: format!("v{}", id),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn empty_index(tmp: &TempDir) -> ModelIndex {
        ModelIndex::load(Arc::new(JsonIndexStore::new(tmp.path().join("index.json"))))
    }

    #[test]
    fn test_single_version_auto_selected() {
        let tmp = TempDir::new().unwrap();
        let presenter = Scripted {
            answer: vec![],
            asked: Mutex::new(vec![]),
        };

        let jobs = select_versions(&model_with_versions(&[99]), &presenter, &empty_index(&tmp));

        assert_eq!(
            jobs,
            vec![DownloadJob {
                model_id: 7,
                version_id: 99,
                model_type: ModelType::Lora
            }]
        );
        assert!(presenter.asked.lock().unwrap().is_empty());
    }

    #[test]
    fn test_multiple_versions_ask_presenter() {
        let tmp = TempDir::new().unwrap();
        let mut index = empty_index(&tmp);
        index.upsert(IndexRecord::resolved(7, 2, None, "/lib/foo_v2.safetensors"));
        let presenter = Scripted {
            answer: vec![0, 2, 9],
            asked: Mutex::new(vec![]),
        };

        let jobs = select_versions(&model_with_versions(&[1, 2, 3]), &presenter, &index);

        assert_eq!(jobs.iter().map(|j| j.version_id).collect::<Vec<_>>(), vec![1, 3]);
        let asked = presenter.asked.lock().unwrap();
        assert_eq!(asked[1], "Foo - v2 [downloaded]");
        assert_eq!(asked[0], "Foo - v1");
    }

    #[test]
    fn test_jobs_for_versions_skips_unknown() {
        let jobs = jobs_for_versions(&model_with_versions(&[1, 2]), &[2, 5]);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].version_id, 2);
    }

    #[test]
    fn test_job_state_terminal() {
        assert!(JobState::Done.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Downloading.is_terminal());
    }
}
