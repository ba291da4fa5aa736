//! Centralized configuration for the Civitai client.
//!
//! Constant groups for the remote API, network behavior and the on-disk
//! layout of the model library.

use std::time::Duration;

/// Remote catalog configuration.
pub struct ApiConfig;

impl ApiConfig {
    pub const BASE_URL: &'static str = "https://civitai.com/api/v1";
    pub const DOWNLOAD_BASE_URL: &'static str = "https://civitai.com/api/download/models";
    pub const USER_AGENT: &'static str = "civitai-fetch/0.7";
    pub const API_KEY_ENV: &'static str = "CIVITAI_API_KEY";
    pub const DEFAULT_PAGE_SIZE: u32 = 100;
    pub const MAX_PAGE_SIZE: u32 = 100;
    /// Tool tag written into every sidecar json.
    pub const SIDECAR_TOOL_TAG: &'static str = "Civitai_cli";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    /// Artifacts can be many GB; only the connect phase is bounded.
    pub const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_DELAY: Duration = Duration::from_secs(5);
    pub const DOWNLOAD_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
}

/// Library layout and scan configuration.
pub struct ScanConfig;

impl ScanConfig {
    /// Read size for streaming SHA-256 (bounds memory per file).
    pub const HASH_CHUNK_SIZE: usize = 4096;
    /// Extensions recognized as model artifacts.
    pub const ARTIFACT_EXTENSIONS: &'static [&'static str] =
        &["ckpt", "pt", "safetensors", "bin", "pth"];
    pub const INFO_SUFFIX: &'static str = ".civitai.info";
    pub const SIDECAR_SUFFIX: &'static str = ".json";
    pub const PREVIEW_SUFFIX: &'static str = ".preview.png";
    pub const STAGING_DIR_NAME: &'static str = ".staging";
}

/// Files and directories owned by the client itself.
pub struct PathsConfig;

impl PathsConfig {
    pub const APP_DIR_NAME: &'static str = "civitai";
    pub const SETTINGS_FILENAME: &'static str = "settings.json";
    pub const INDEX_FILENAME: &'static str = "model_index.json";
    pub const INDEX_DB_FILENAME: &'static str = "model_index.db";
    pub const PENDING_FILENAME: &'static str = "pending_downloads.json";
    pub const DEFAULT_ROOT_DIR_NAME: &'static str = "Downloads";
}
