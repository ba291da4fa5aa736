//! On-disk model library.
//!
//! Layout of the type-partitioned directory tree, the scanner that keeps the
//! index in step with it, and the reconciler that fills in companion
//! metadata.

mod companion;
mod hashing;
mod layout;
mod reconciler;
mod scanner;

pub use companion::{CompanionPaths, SidecarJson, ToolTag};
pub use hashing::{compute_sha256, compute_sha256_blocking};
pub use layout::{artifacts_under, is_artifact, LibraryLayout, ModelType};
pub use reconciler::{
    html_to_text, normalize_base_model, BaseModelFamily, CompanionOutcome, DirectoryReconcile,
    MetadataReconciler, ReconcileReport, ReconcileStatus, VersionHint,
};
pub use scanner::{published_hash, DirectoryScan, DirectoryScanner, ScanSummary};
