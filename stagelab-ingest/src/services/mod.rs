//! HTTP clients for the collaborator services
//!
//! - [`StorageClient`]: object storage write destinations and uploads
//! - [`JobClient`]: analysis job trigger
//! - [`RestPersistence`]: remote persistence service
//! - [`AssistClient`]: filename-parsing assist
//!
//! All clients share [`ServiceClient`]: one `reqwest::Client` with a request
//! timeout, optional bearer authentication, and uniform mapping of transport
//! and HTTP failures onto [`stagelab_common::Error::Remote`].

pub mod assist_client;
pub mod job_client;
pub mod rest_persistence;
pub mod storage_client;

pub use assist_client::AssistClient;
pub use job_client::JobClient;
pub use rest_persistence::RestPersistence;
pub use storage_client::StorageClient;

use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use stagelab_common::{Error, Result};
use std::time::Duration;

const USER_AGENT: &str = concat!("stagelab-ingest/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Base URL, HTTP client and credentials for one collaborator
#[derive(Clone)]
pub struct ServiceClient {
    service: &'static str,
    base_url: Url,
    http_client: reqwest::Client,
    api_key: Option<String>,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("service", &self.service)
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ServiceClient {
    pub fn new(
        service: &'static str,
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        // A trailing slash makes `join` append instead of replacing the last segment
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| Error::Config(format!("Invalid {} URL '{}': {}", service, base_url, e)))?;

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build {} HTTP client: {}", service, e)))?;

        Ok(Self {
            service,
            base_url,
            http_client,
            api_key,
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a path relative to the base URL
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Internal(format!("Invalid {} path '{}': {}", self.service, path, e)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    pub fn get(&self, path: &str) -> Result<RequestBuilder> {
        Ok(self.authorize(self.http_client.get(self.url(path)?)))
    }

    pub fn post(&self, path: &str) -> Result<RequestBuilder> {
        Ok(self.authorize(self.http_client.post(self.url(path)?)))
    }

    pub fn patch(&self, path: &str) -> Result<RequestBuilder> {
        Ok(self.authorize(self.http_client.patch(self.url(path)?)))
    }

    /// Absolute-URL request without credentials (pre-authorized destinations)
    pub fn put_absolute(&self, url: &str) -> RequestBuilder {
        self.http_client.put(url)
    }

    /// Send and require a 2xx status
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::remote(self.service, format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(service = self.service, status = status.as_u16(), body = %body, "Request rejected");
            return Err(Error::remote(
                self.service,
                format!("{} {}", status.as_u16(), body.trim()),
            ));
        }
        Ok(response)
    }

    /// Send, require 2xx and decode a JSON body
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| Error::remote(self.service, format!("invalid response body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_relative_to_base_path() {
        let client =
            ServiceClient::new("storage", "http://localhost:9000/api/v1", None, DEFAULT_REQUEST_TIMEOUT)
                .unwrap();
        assert_eq!(
            client.url("/destinations").unwrap().as_str(),
            "http://localhost:9000/api/v1/destinations"
        );
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let err = ServiceClient::new("jobs", "not a url", None, DEFAULT_REQUEST_TIMEOUT).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let client = ServiceClient::new(
            "assist",
            "http://localhost:1",
            Some("secret".into()),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .unwrap();
        assert!(!format!("{:?}", client).contains("secret"));
    }
}
