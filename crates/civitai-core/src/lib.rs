//! Civitai Core - Headless library for downloading and indexing Civitai models.
//!
//! This crate keeps a local model library in step with the Civitai catalog:
//! it indexes artifacts on disk by content hash and catalog identity, writes
//! the companion metadata the Stable Diffusion web UI reads, and downloads
//! new versions without ever leaving a partial file in the library.
//!
//! # Example
//!
//! ```rust,ignore
//! use civitai_core::Session;
//!
//! #[tokio::main]
//! async fn main() -> civitai_core::Result<()> {
//!     let session = Session::open_default()?;
//!     let mut index = session.open_index()?;
//!
//!     // Rebuild the index from disk
//!     let summary = session.scanner().scan(&mut index, None)?;
//!     println!("New files found: {}", summary.discovered_new);
//!
//!     // Fill in missing metadata
//!     let report = session.reconciler().reconcile(&mut index, None).await?;
//!     println!("Updated {} files", report.total_updated());
//!
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod index;
pub mod library;
pub mod metadata;
pub mod network;
pub mod session;
pub mod settings;
pub mod ui;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use catalog::{CatalogApi, CivitaiClient, Model, ModelVersion, SearchParams};
pub use download::{
    BackgroundDownloader, DownloadJob, DownloadOrchestrator, JobReport, JobState,
    PendingDownload, PendingRetryList,
};
pub use error::{CivitaiError, Result};
pub use index::{IndexRecord, IndexStore, ModelIndex, VersionRef};
pub use library::{DirectoryScanner, LibraryLayout, MetadataReconciler, ModelType};
pub use session::{IndexBackend, Session};
pub use settings::Settings;
pub use ui::{ImageDisplay, Presenter};
