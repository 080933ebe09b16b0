//! Typed requests against the daemon HTTP API.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, RequestBuilder};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use url::Url;

use common::queue::{RuntimeStatus, SyncStatus, UploadAction, UploadList};
use common::tree::DiscoveryFile;

use super::ControlPlaneError;

/// A request the [`ApiClient`] knows how to send
pub trait ApiRequest {
    /// Has a response type
    type Response: DeserializeOwned;

    /// Builds a Reqwest request
    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder;
}

fn endpoint(base_url: &Url, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    pub remote: Url,
    token: Option<String>,
    client: Client,
}

impl ApiClient {
    pub fn new(remote: &Url, token: Option<String>, timeout: Duration) -> Result<Self, ControlPlaneError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ControlPlaneError::NotConfigured(e.to_string()))?;

        Ok(Self {
            remote: remote.clone(),
            token,
            client,
        })
    }

    pub async fn call<T: ApiRequest>(&self, request: T) -> Result<T::Response, ControlPlaneError> {
        let mut request_builder = request.build_request(&self.remote, &self.client);
        if let Some(token) = &self.token {
            request_builder = request_builder.bearer_auth(token);
        }
        let response = request_builder.send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ControlPlaneError::HttpStatus(status, body));
        }
        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        serde_json::from_str(body).map_err(|e| ControlPlaneError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusRequest;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default, alias = "txBytes")]
    pub tx_bytes: u64,
    #[serde(default, alias = "rxBytes")]
    pub rx_bytes: u64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub runtime: Option<RuntimeStatus>,
}

impl ApiRequest for StatusRequest {
    type Response = StatusResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, "/v1/status"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncStatusRequest;

impl ApiRequest for SyncStatusRequest {
    type Response = SyncStatus;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, "/v1/sync/status"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadsRequest;

impl ApiRequest for UploadsRequest {
    type Response = UploadList;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, "/v1/uploads/"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryRequest;

/// The discovery endpoint answers with either a bare list or `{files: [...]}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DiscoveryResponse {
    Wrapped { files: Vec<DiscoveryFile> },
    List(Vec<DiscoveryFile>),
}

impl DiscoveryResponse {
    pub fn into_files(self) -> Vec<DiscoveryFile> {
        match self {
            DiscoveryResponse::Wrapped { files } | DiscoveryResponse::List(files) => files,
        }
    }
}

impl ApiRequest for DiscoveryRequest {
    type Response = DiscoveryResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, "/v1/discovery/files"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
pub struct SubscribeRequest {
    /// Datasite-relative path to subscribe to
    #[cfg_attr(feature = "clap", arg(long))]
    pub path: String,

    /// Subscribe to everything under the path
    #[cfg_attr(feature = "clap", arg(long))]
    pub is_folder: bool,
}

impl ApiRequest for SubscribeRequest {
    type Response = IgnoredAny;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.post(endpoint(base_url, "/v1/subscriptions")).json(&self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncNowRequest;

impl ApiRequest for SyncNowRequest {
    type Response = IgnoredAny;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.post(endpoint(base_url, "/v1/sync/now"))
    }
}

/// Pause, resume, restart or cancel one upload
#[derive(Debug, Clone)]
pub struct UploadActionRequest {
    pub id: String,
    pub action: UploadAction,
}

impl UploadActionRequest {
    /// `/v1/uploads/{id}` plus the action verb; cancel has no verb. The id
    /// is percent-encoded as a single path segment.
    fn url(&self, base_url: &Url) -> String {
        let mut url = base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["v1", "uploads", self.id.as_str()]);
            if self.action != UploadAction::Cancel {
                segments.push(self.action.as_str());
            }
        }
        url.to_string()
    }
}

impl ApiRequest for UploadActionRequest {
    type Response = IgnoredAny;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        let url = self.url(base_url);
        match self.action {
            UploadAction::Cancel => client.delete(url),
            _ => client.post(url),
        }
    }
}
