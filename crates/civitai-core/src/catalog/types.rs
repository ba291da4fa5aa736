//! Catalog data types.
//!
//! Typed views over the Civitai REST responses. Only the fields the client
//! reads are modelled; version detail keeps the raw JSON as well so the
//! `.civitai.info` companion can be written verbatim.

use crate::config::ApiConfig;
use crate::error::{CivitaiError, Result};
use crate::library::ModelType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

/// A catalog model with its versions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub model_type: ModelType,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub creator: Option<Creator>,
    #[serde(default)]
    pub stats: Option<ModelStats>,
    #[serde(default)]
    pub model_versions: Vec<ModelVersion>,
}

impl Model {
    /// Distinct base-model labels across all versions, in first-seen order.
    pub fn base_models(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for version in &self.model_versions {
            if let Some(ref base) = version.base_model {
                if !labels.contains(base) {
                    labels.push(base.clone());
                }
            }
        }
        labels
    }

    pub fn version(&self, version_id: u64) -> Option<&ModelVersion> {
        self.model_versions.iter().find(|v| v.id == version_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStats {
    #[serde(default)]
    pub download_count: Option<u64>,
    #[serde(default)]
    pub favorite_count: Option<u64>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub rating_count: Option<u64>,
}

/// Parent model summary embedded in version detail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionModelRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub model_type: ModelType,
    #[serde(default)]
    pub nsfw: Option<bool>,
}

/// One releasable revision of a model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelVersion {
    pub id: u64,
    /// Absent when embedded in a [`Model`] listing.
    #[serde(default)]
    pub model_id: Option<u64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub base_model: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub files: Vec<ModelFile>,
    #[serde(default)]
    pub images: Vec<ModelImage>,
    #[serde(default)]
    pub model: Option<VersionModelRef>,
    /// Response body exactly as served.
    #[serde(skip)]
    pub raw: Value,
}

impl ModelVersion {
    /// Parse a version response, keeping the raw document.
    pub fn from_json(raw: Value) -> Result<Self> {
        let mut version: ModelVersion =
            serde_json::from_value(raw.clone()).map_err(|e| CivitaiError::Json {
                message: format!("Failed to parse model version: {}", e),
                source: Some(e),
            })?;
        version.raw = raw;
        Ok(version)
    }

    /// The document to persist as `.civitai.info`.
    pub fn info_document(&self) -> Value {
        if self.raw.is_null() {
            serde_json::to_value(self).unwrap_or(Value::Null)
        } else {
            self.raw.clone()
        }
    }

    /// The file flagged primary, else the first file.
    pub fn primary_file(&self) -> Option<&ModelFile> {
        self.files
            .iter()
            .find(|f| f.primary)
            .or_else(|| self.files.first())
    }

    /// URL of the primary artifact.
    pub fn artifact_url(&self) -> String {
        self.primary_file()
            .and_then(|f| f.download_url.clone())
            .or_else(|| self.download_url.clone())
            .unwrap_or_else(|| format!("{}/{}", ApiConfig::DOWNLOAD_BASE_URL, self.id))
    }

    /// Published SHA-256 of the primary file, lowercased.
    pub fn primary_sha256(&self) -> Option<String> {
        self.primary_file().and_then(ModelFile::sha256)
    }

    pub fn first_image_url(&self) -> Option<&str> {
        self.images.first().map(|img| img.url.as_str()).filter(|url| !url.is_empty())
    }

    pub fn model_type(&self) -> ModelType {
        self.model
            .as_ref()
            .map(|m| m.model_type.clone())
            .unwrap_or_default()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model.as_ref().and_then(|m| m.name.as_deref())
    }
}

/// A downloadable file of a version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelFile {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "sizeKB", default)]
    pub size_kb: Option<f64>,
    #[serde(rename = "type", default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub hashes: HashMap<String, String>,
    #[serde(default)]
    pub pickle_scan_result: Option<String>,
    #[serde(default)]
    pub virus_scan_result: Option<String>,
    #[serde(default)]
    pub scanned_at: Option<String>,
}

impl ModelFile {
    pub fn sha256(&self) -> Option<String> {
        self.hashes
            .iter()
            .find(|(algo, _)| algo.eq_ignore_ascii_case("sha256"))
            .map(|(_, hash)| hash.to_lowercase())
    }
}

/// A preview image attached to a version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelImage {
    #[serde(default)]
    pub url: String,
    /// `"None" | "Soft" | "Mature" | "X"` on older responses, a bool on newer.
    #[serde(default)]
    pub nsfw: Option<Value>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Image maturity rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsfwLevel {
    None,
    Soft,
    Mature,
    X,
}

impl ModelImage {
    pub fn nsfw_level(&self) -> NsfwLevel {
        match &self.nsfw {
            Some(Value::String(level)) => match level.as_str() {
                "Soft" => NsfwLevel::Soft,
                "Mature" => NsfwLevel::Mature,
                "X" => NsfwLevel::X,
                _ => NsfwLevel::None,
            },
            Some(Value::Bool(true)) => NsfwLevel::Mature,
            _ => NsfwLevel::None,
        }
    }
}

/// Content filter applied to catalog searches.
///
/// `All` sends no `nsfw` parameter; `SfwOnly` sends `nsfw=false`;
/// `NsfwOnly` sends `nsfw=true` and additionally keeps only models flagged
/// nsfw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NsfwFilter {
    #[default]
    All,
    SfwOnly,
    NsfwOnly,
}

impl FromStr for NsfwFilter {
    type Err = CivitaiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "all" => Ok(NsfwFilter::All),
            "sfw" | "sfw_only" | "false" => Ok(NsfwFilter::SfwOnly),
            "nsfw" | "nsfw_only" | "true" => Ok(NsfwFilter::NsfwOnly),
            other => Err(CivitaiError::Validation {
                field: "nsfw".into(),
                message: format!("expected all, sfw or nsfw, got {}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    #[serde(rename = "Highest Rated")]
    HighestRated,
    #[serde(rename = "Most Downloaded")]
    MostDownloaded,
    #[serde(rename = "Newest")]
    Newest,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::HighestRated => "Highest Rated",
            SortOrder::MostDownloaded => "Most Downloaded",
            SortOrder::Newest => "Newest",
        }
    }
}

impl FromStr for SortOrder {
    type Err = CivitaiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(['-', '_'], " ").as_str() {
            "highest rated" | "rated" => Ok(SortOrder::HighestRated),
            "most downloaded" | "downloaded" => Ok(SortOrder::MostDownloaded),
            "newest" => Ok(SortOrder::Newest),
            other => Err(CivitaiError::Validation {
                field: "sort".into(),
                message: format!("unknown sort order {}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    AllTime,
    Year,
    Month,
    Week,
    Day,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::AllTime => "AllTime",
            Period::Year => "Year",
            Period::Month => "Month",
            Period::Week => "Week",
            Period::Day => "Day",
        }
    }
}

impl FromStr for Period {
    type Err = CivitaiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "alltime" | "all" => Ok(Period::AllTime),
            "year" => Ok(Period::Year),
            "month" => Ok(Period::Month),
            "week" => Ok(Period::Week),
            "day" => Ok(Period::Day),
            other => Err(CivitaiError::Validation {
                field: "period".into(),
                message: format!("unknown period {}", other),
            }),
        }
    }
}

/// Catalog search filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    pub query: Option<String>,
    pub tag: Option<String>,
    pub username: Option<String>,
    pub types: Vec<ModelType>,
    pub sort: Option<SortOrder>,
    pub period: Option<Period>,
    pub nsfw: NsfwFilter,
    pub base_model: Option<String>,
    pub page: Option<u32>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

impl SearchParams {
    pub fn validate(&self) -> Result<()> {
        if let Some(limit) = self.limit {
            if !(1..=ApiConfig::MAX_PAGE_SIZE).contains(&limit) {
                return Err(CivitaiError::Validation {
                    field: "limit".into(),
                    message: format!(
                        "page size must be between 1 and {}, got {}",
                        ApiConfig::MAX_PAGE_SIZE,
                        limit
                    ),
                });
            }
        }
        if self.page == Some(0) {
            return Err(CivitaiError::Validation {
                field: "page".into(),
                message: "pages are numbered from 1".into(),
            });
        }
        Ok(())
    }

    /// Query-string pairs for `GET /models`.
    pub fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![(
            "limit",
            self.limit.unwrap_or(ApiConfig::DEFAULT_PAGE_SIZE).to_string(),
        )];

        let text = [
            ("query", &self.query),
            ("tag", &self.tag),
            ("username", &self.username),
            ("baseModels", &self.base_model),
        ];
        for (key, value) in text {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                query.push((key, value.to_string()));
            }
        }

        for model_type in &self.types {
            query.push(("types", model_type.as_str().to_string()));
        }
        if let Some(sort) = self.sort {
            query.push(("sort", sort.as_str().to_string()));
        }
        if let Some(period) = self.period {
            query.push(("period", period.as_str().to_string()));
        }
        match self.nsfw {
            NsfwFilter::All => {}
            NsfwFilter::SfwOnly => query.push(("nsfw", "false".to_string())),
            NsfwFilter::NsfwOnly => query.push(("nsfw", "true".to_string())),
        }
        if let Some(ref cursor) = self.cursor {
            query.push(("cursor", cursor.clone()));
        } else if let Some(page) = self.page {
            query.push(("page", page.to_string()));
        }

        query
    }

    /// Client-side filtering the server does not guarantee.
    pub fn post_filter(&self, models: Vec<Model>) -> Vec<Model> {
        models
            .into_iter()
            .filter(|model| match self.base_model.as_deref() {
                Some(base) => model
                    .model_versions
                    .iter()
                    .any(|v| v.base_model.as_deref() == Some(base)),
                None => true,
            })
            .filter(|model| self.nsfw != NsfwFilter::NsfwOnly || model.nsfw)
            .collect()
    }

    /// Merge: fields set in `overrides` replace those in `self`.
    pub fn merged_with(&self, overrides: &SearchParams) -> SearchParams {
        SearchParams {
            query: overrides.query.clone().or_else(|| self.query.clone()),
            tag: overrides.tag.clone().or_else(|| self.tag.clone()),
            username: overrides.username.clone().or_else(|| self.username.clone()),
            types: if overrides.types.is_empty() {
                self.types.clone()
            } else {
                overrides.types.clone()
            },
            sort: overrides.sort.or(self.sort),
            period: overrides.period.or(self.period),
            nsfw: if overrides.nsfw == NsfwFilter::All {
                self.nsfw
            } else {
                overrides.nsfw
            },
            base_model: overrides.base_model.clone().or_else(|| self.base_model.clone()),
            page: overrides.page.or(self.page),
            cursor: overrides.cursor.clone().or_else(|| self.cursor.clone()),
            limit: overrides.limit.or(self.limit),
        }
    }
}

/// Pagination metadata returned with a search page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    #[serde(default)]
    pub total_items: Option<u64>,
    #[serde(default)]
    pub current_page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub next_page: Option<String>,
    #[serde(default)]
    pub next_cursor: Option<Value>,
}

/// One page of search results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub items: Vec<Model>,
    #[serde(default)]
    pub metadata: PageMetadata,
}
