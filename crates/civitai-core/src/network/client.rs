//! HTTP client wrapper around reqwest.
//!
//! Adds the bearer token when an API key is configured, maps non-success
//! statuses onto [`CivitaiError`] with the server's message, and keeps a
//! second client without a total timeout for multi-GB artifact streams.

use crate::config::{ApiConfig, NetworkConfig};
use crate::{CivitaiError, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// HTTP client for catalog lookups and artifact downloads.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    download_client: Client,
    api_key: Option<String>,
}

impl HttpClient {
    /// Create a client, reading the API key from `CIVITAI_API_KEY` if set.
    pub fn new() -> Result<Self> {
        let api_key = std::env::var(ApiConfig::API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty());
        Self::with_options(NetworkConfig::REQUEST_TIMEOUT, api_key)
    }

    pub fn with_options(timeout: Duration, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(ApiConfig::USER_AGENT)
            .build()
            .map_err(|e| CivitaiError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        let download_client = Client::builder()
            .connect_timeout(NetworkConfig::DOWNLOAD_CONNECT_TIMEOUT)
            .user_agent(ApiConfig::USER_AGENT)
            .build()
            .map_err(|e| CivitaiError::Network {
                message: format!("Failed to create download client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            client,
            download_client,
            api_key,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// GET with query parameters; non-success statuses become errors.
    pub async fn get<Q: Serialize + ?Sized>(&self, url: &str, query: &Q) -> Result<Response> {
        let request = self.authorized(self.client.get(url).query(query));
        let response = send(request, url).await?;
        Self::into_success(response, url).await
    }

    /// GET an artifact on the client without a total timeout; the caller
    /// streams the body.
    pub async fn get_download(&self, url: &str) -> Result<Response> {
        let request = self.authorized(self.download_client.get(url));
        let response = send(request, url).await?;
        Self::into_success(response, url).await
    }

    /// GET without auth or status mapping, for image CDNs.
    pub async fn get_unchecked(&self, url: &str) -> Result<Response> {
        send(self.client.get(url), url).await
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn into_success(response: Response, url: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!("GET {} returned {}: {}", url, status, body);
        Err(CivitaiError::from_status(status.as_u16(), url, &body))
    }
}

async fn send(request: RequestBuilder, url: &str) -> Result<Response> {
    request.send().await.map_err(|e| {
        if e.is_timeout() {
            return CivitaiError::Timeout(NetworkConfig::REQUEST_TIMEOUT);
        }
        CivitaiError::Network {
            message: format!("GET {} failed: {}", url, e),
            cause: Some(e.to_string()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_with_api_key() {
        let client =
            HttpClient::with_options(Duration::from_secs(5), Some("secret".to_string())).unwrap();
        assert!(client.has_api_key());

        let anonymous = HttpClient::with_options(Duration::from_secs(5), None).unwrap();
        assert!(!anonymous.has_api_key());
    }
}
