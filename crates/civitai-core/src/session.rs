//! Per-run context.
//!
//! Holds the settings, the catalog handle and the cancellation token, and
//! builds the components that work on one library root.

use crate::cancel::CancellationToken;
use crate::catalog::{CatalogApi, CivitaiClient, Model, SearchPage, SearchParams};
use crate::config::PathsConfig;
use crate::download::{DownloadOrchestrator, PendingRetryList};
use crate::error::Result;
use crate::index::{IndexStore, JsonIndexStore, ModelIndex, SqliteIndexStore};
use crate::library::{DirectoryScanner, LibraryLayout, MetadataReconciler};
use crate::settings::{default_data_dir, default_settings_path, Settings};
use crate::ui::Presenter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Persistence backend for the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexBackend {
    #[default]
    Json,
    Sqlite,
}

/// Everything one CLI invocation works with.
pub struct Session {
    settings: Settings,
    settings_path: PathBuf,
    data_dir: PathBuf,
    catalog: Arc<dyn CatalogApi>,
    cancel: CancellationToken,
    index_backend: IndexBackend,
}

impl Session {
    pub fn new(
        settings: Settings,
        settings_path: PathBuf,
        data_dir: PathBuf,
        catalog: Arc<dyn CatalogApi>,
    ) -> Self {
        Self {
            settings,
            settings_path,
            data_dir,
            catalog,
            cancel: CancellationToken::new(),
            index_backend: IndexBackend::default(),
        }
    }

    /// Session from the platform config and data directories and the
    /// public catalog.
    pub fn open_default() -> Result<Self> {
        let settings_path = default_settings_path()?;
        let settings = Settings::load(&settings_path);
        let data_dir = default_data_dir()?;
        let cancel = CancellationToken::new();
        let catalog: Arc<dyn CatalogApi> =
            Arc::new(CivitaiClient::new()?.with_cancel(cancel.clone()));
        debug!(
            "Session: settings {}, data {}",
            settings_path.display(),
            data_dir.display()
        );
        Ok(Self {
            cancel,
            ..Self::new(settings, settings_path, data_dir, catalog)
        })
    }

    pub fn with_index_backend(mut self, backend: IndexBackend) -> Self {
        self.index_backend = backend;
        self
    }

    /// Use `root` for this run without saving it.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.settings.root_directory = root.into();
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn save_settings(&self) -> Result<()> {
        self.settings.save(&self.settings_path)?;
        info!("Saved settings to {}", self.settings_path.display());
        Ok(())
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn catalog(&self) -> Arc<dyn CatalogApi> {
        self.catalog.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn layout(&self) -> LibraryLayout {
        LibraryLayout::new(&self.settings.root_directory)
    }

    pub fn open_index(&self) -> Result<ModelIndex> {
        let store: Arc<dyn IndexStore> = match self.index_backend {
            IndexBackend::Json => Arc::new(JsonIndexStore::new(
                self.data_dir.join(PathsConfig::INDEX_FILENAME),
            )),
            IndexBackend::Sqlite => Arc::new(SqliteIndexStore::open(
                self.data_dir.join(PathsConfig::INDEX_DB_FILENAME),
            )?),
        };
        Ok(ModelIndex::load(store))
    }

    pub fn scanner(&self) -> DirectoryScanner {
        DirectoryScanner::new(self.layout())
    }

    pub fn reconciler(&self) -> MetadataReconciler {
        MetadataReconciler::new(self.catalog(), self.layout())
    }

    pub fn pending(&self) -> PendingRetryList {
        PendingRetryList::new(&self.data_dir)
    }

    pub fn orchestrator(&self) -> DownloadOrchestrator {
        DownloadOrchestrator::new(self.catalog(), self.layout(), self.pending(), self.cancel_token())
    }

    /// Search with the saved default query underneath `overrides`.
    pub async fn search(&self, overrides: &SearchParams) -> Result<SearchPage> {
        let params = self.settings.default_query.merged_with(overrides);
        self.catalog.search_models(&params).await
    }

    /// Show the first preview image of a model, honouring the image filter.
    ///
    /// Returns whether an image was handed to the presenter.
    pub async fn show_preview(&self, model: &Model, presenter: &dyn Presenter) -> Result<bool> {
        if self.settings.text_only {
            return Ok(false);
        }
        let Some(image) = model
            .model_versions
            .iter()
            .flat_map(|v| v.images.iter())
            .find(|img| !img.url.is_empty())
        else {
            return Ok(false);
        };

        let display = self.settings.image_filter.decide(image.nsfw_level());
        if display == crate::ui::ImageDisplay::Hide {
            info!("NSFW content is blocked");
            return Ok(false);
        }

        match self.catalog.fetch_image(&image.url).await? {
            Some(bytes) => {
                presenter.present_image(&bytes, display);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
