//! Download orchestration.
//!
//! Jobs run through [`DownloadOrchestrator`], either in the foreground as a
//! serial batch or on the [`BackgroundDownloader`] worker. Jobs that do not
//! finish are kept on the [`PendingRetryList`] for a later resume.

mod background;
mod orchestrator;
mod pending;

pub use background::BackgroundDownloader;
pub use orchestrator::{
    jobs_for_versions, select_versions, DownloadJob, DownloadOrchestrator, JobReport, JobState,
};
pub use pending::{PendingDownload, PendingRetryList};
