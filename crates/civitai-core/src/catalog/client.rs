//! HTTP implementation of [`CatalogApi`] against the Civitai REST API.

use super::types::{Model, ModelVersion, SearchPage, SearchParams};
use super::CatalogApi;
use crate::cancel::CancellationToken;
use crate::config::ApiConfig;
use crate::error::{CivitaiError, Result};
use crate::network::{retry_request, DownloadStream, HttpClient, RetryPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

/// Client for the Civitai catalog.
///
/// JSON lookups and the opening of artifact streams run under one
/// [`RetryPolicy`]; definitive client errors come back on the first
/// attempt. Tripping the client's token abandons a request or retry pause.
#[derive(Debug, Clone)]
pub struct CivitaiClient {
    http: HttpClient,
    base_url: String,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl CivitaiClient {
    /// Create a client for the public API.
    pub fn new() -> Result<Self> {
        Self::with_base_url(HttpClient::new()?, ApiConfig::BASE_URL)
    }

    /// Create a client for a custom API root (mirrors, proxies).
    pub fn with_base_url(http: HttpClient, base_url: &str) -> Result<Self> {
        Url::parse(base_url).map_err(|e| CivitaiError::Config {
            message: format!("Invalid API base URL {}: {}", base_url, e),
        })?;
        debug!(
            "Catalog client for {} (authenticated: {})",
            base_url,
            http.has_api_key()
        );

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Share the run's cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&'static str, String)],
    ) -> Result<T> {
        let url = self.endpoint(path);
        let url = url.as_str();
        let http = &self.http;
        let what = format!("GET {}", path);
        let outcome = retry_request(&self.retry, &self.cancel, &what, || async move {
            let response = http.get(url, query).await?;
            response.json::<T>().await.map_err(|e| CivitaiError::Json {
                message: format!("Failed to parse response from {}: {}", url, e),
                source: None,
            })
        })
        .await;

        if outcome.attempts > 1 {
            debug!(
                "GET {} took {} attempts, {:?} waiting",
                path, outcome.attempts, outcome.waited
            );
        }
        outcome.into_result()
    }
}

#[async_trait]
impl CatalogApi for CivitaiClient {
    async fn get_model_by_id(&self, model_id: u64) -> Result<Model> {
        self.get_json(&format!("models/{}", model_id), &[]).await
    }

    async fn get_version_by_id(&self, version_id: u64) -> Result<ModelVersion> {
        let raw: Value = self
            .get_json(&format!("model-versions/{}", version_id), &[])
            .await?;
        ModelVersion::from_json(raw)
    }

    async fn get_version_by_hash(&self, hash: &str) -> Result<Option<ModelVersion>> {
        let path = format!("model-versions/by-hash/{}", urlencoding::encode(hash));
        match self.get_json::<Value>(&path, &[]).await {
            Ok(raw) => ModelVersion::from_json(raw).map(Some),
            Err(CivitaiError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn search_models(&self, params: &SearchParams) -> Result<SearchPage> {
        params.validate()?;
        let query = params.to_query();
        debug!("Searching models with {:?}", query);

        let mut page: SearchPage = self.get_json("models", &query).await?;
        let fetched = page.items.len();
        page.items = params.post_filter(page.items);
        if page.items.len() != fetched {
            debug!(
                "Post-filter kept {} of {} models",
                page.items.len(),
                fetched
            );
        }
        Ok(page)
    }

    async fn open_download(&self, url: &str) -> Result<DownloadStream> {
        let what = format!("download {}", url);
        let response = retry_request(&self.retry, &self.cancel, &what, || {
            self.http.get_download(url)
        })
        .await
        .into_result()?;
        info!("Downloading {}", response.url());
        Ok(DownloadStream::from_response(response))
    }

    async fn fetch_image(&self, url: &str) -> Result<Option<Bytes>> {
        let response = self.http.get_unchecked(url).await?;
        if !response.status().is_success() {
            debug!("Image {} returned {}", url, response.status());
            return Ok(None);
        }
        Ok(Some(response.bytes().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_endpoint_joins_paths() {
        let http = HttpClient::with_options(Duration::from_secs(5), None).unwrap();
        let client = CivitaiClient::with_base_url(http, "https://example.test/api/v1/").unwrap();
        assert_eq!(
            client.endpoint("model-versions/42"),
            "https://example.test/api/v1/model-versions/42"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let http = HttpClient::with_options(Duration::from_secs(5), None).unwrap();
        let result = CivitaiClient::with_base_url(http, "not a url");
        assert!(matches!(result, Err(CivitaiError::Config { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_client_sends_nothing() {
        let http = HttpClient::with_options(Duration::from_secs(5), None).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = CivitaiClient::with_base_url(http, "http://127.0.0.1:9/api/v1")
            .unwrap()
            .with_cancel(cancel);

        let result = client.get_model_by_id(1).await;
        assert!(matches!(result, Err(CivitaiError::DownloadCancelled)));
    }
}
