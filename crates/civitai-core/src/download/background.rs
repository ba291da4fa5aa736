//! Background download worker.
//!
//! The foreground hands jobs to a queue; one spawned task drains it
//! serially, so two jobs never race on the same destination file.

use super::orchestrator::{DownloadJob, DownloadOrchestrator, JobReport};
use crate::error::{CivitaiError, Result};
use crate::index::ModelIndex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const QUEUE_CAPACITY: usize = 64;

/// Handle to the worker task.
pub struct BackgroundDownloader {
    tx: mpsc::Sender<DownloadJob>,
    worker: JoinHandle<Vec<JobReport>>,
}

impl BackgroundDownloader {
    /// Spawn the worker on the current runtime.
    ///
    /// The worker re-reads the index before each job so it sees changes
    /// made by foreground scans.
    ///
    /// After each job it saves its whole record set over the store. A
    /// foreground scan or download that saves the same store before
    /// [`shutdown`](Self::shutdown) returns can lose records to that write,
    /// so callers must not touch the index until the worker is drained.
    pub fn spawn(orchestrator: DownloadOrchestrator, mut index: ModelIndex) -> Self {
        let (tx, mut rx) = mpsc::channel::<DownloadJob>(QUEUE_CAPACITY);

        let worker = tokio::spawn(async move {
            let mut reports = Vec::new();
            while let Some(job) = rx.recv().await {
                if orchestrator.is_cancelled() {
                    // Drain into the pending list without running.
                    reports.extend(orchestrator.run_batch(&mut index, &[job]).await);
                    continue;
                }
                debug!("Background worker picked up version {}", job.version_id);
                index.reload();
                reports.push(orchestrator.run_job(&mut index, &job).await);
            }
            info!("Background worker finished {} jobs", reports.len());
            reports
        });

        Self { tx, worker }
    }

    /// Queue a job.
    pub async fn enqueue(&self, job: DownloadJob) -> Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|e| CivitaiError::Other(format!("Background worker is gone: {}", e)))
    }

    /// Close the queue and wait for every queued job to finish.
    pub async fn shutdown(self) -> Result<Vec<JobReport>> {
        drop(self.tx);
        self.worker
            .await
            .map_err(|e| CivitaiError::Other(format!("Background worker panicked: {}", e)))
    }
}
