//! Remote model catalog.
//!
//! [`CatalogApi`] is the capability the core consumes: read-only lookups by
//! model id, version id and content hash, paged search, and the two byte
//! fetches (artifact stream, preview image). [`CivitaiClient`] implements it
//! over HTTP; tests substitute an in-memory catalog.

mod client;
mod types;

pub use client::CivitaiClient;
pub use types::{
    Creator, Model, ModelFile, ModelImage, ModelStats, ModelVersion, NsfwFilter, NsfwLevel,
    PageMetadata, Period, SearchPage, SearchParams, SortOrder, VersionModelRef,
};

use crate::error::Result;
use crate::network::DownloadStream;
use async_trait::async_trait;
use bytes::Bytes;

/// Read-only access to the model catalog.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn get_model_by_id(&self, model_id: u64) -> Result<Model>;

    async fn get_version_by_id(&self, version_id: u64) -> Result<ModelVersion>;

    /// Look a version up by the SHA-256 of one of its files.
    ///
    /// `Ok(None)` means the catalog does not know the hash.
    async fn get_version_by_hash(&self, hash: &str) -> Result<Option<ModelVersion>>;

    async fn search_models(&self, params: &SearchParams) -> Result<SearchPage>;

    /// Open the byte stream of an artifact.
    async fn open_download(&self, url: &str) -> Result<DownloadStream>;

    /// Fetch an image; `Ok(None)` when the server does not return it.
    async fn fetch_image(&self, url: &str) -> Result<Option<Bytes>>;
}
