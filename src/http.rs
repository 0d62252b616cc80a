// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::ApiError;
use crate::session::PlaybackSession;
use crate::sync::SyncData;

/// Per-session outcome of a batch upload of cached sessions
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSessionSyncResult {
    pub id: String,
    pub success: bool,
    /// Whether the server's stored progress moved because of this session
    #[serde(default)]
    pub progress_synced: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Identifies this device to the server when uploading cached sessions
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub client_version: String,
}

impl DeviceInfo {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            manufacturer: None,
            model: None,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Serialize)]
struct LocalSessionsPayload<'a> {
    sessions: &'a [PlaybackSession],
    #[serde(rename = "deviceInfo")]
    device_info: &'a DeviceInfo,
}

#[derive(Deserialize)]
struct LocalSessionsResponse {
    #[serde(default)]
    results: Vec<LocalSessionSyncResult>,
}

/// Library server API used by the progress syncer, abstracted for testability
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Push progress of a server-backed session
    async fn send_progress_sync(&self, session_id: &str, payload: &SyncData)
    -> Result<(), ApiError>;

    /// Push a whole session played from a local copy of a server item
    async fn send_local_progress_sync(&self, session: &PlaybackSession) -> Result<(), ApiError>;

    /// Upload cached sessions in one batch
    async fn send_local_sessions(
        &self,
        sessions: &[PlaybackSession],
    ) -> Result<Vec<LocalSessionSyncResult>, ApiError>;
}

/// A shared reference to an API client
pub type SharedApiClient = Arc<dyn ApiClient>;

/// Default API client implementation using reqwest
#[derive(Clone)]
pub struct ReqwestApiClient {
    client: reqwest::Client,
    base_url: Url,
    token: String,
    device_info: DeviceInfo,
}

impl ReqwestApiClient {
    /// Create a client for the server at `server_address`, authenticating with `token`
    pub fn new(server_address: &str, token: impl Into<String>) -> Result<Self, ApiError> {
        Self::with_client(reqwest::Client::new(), server_address, token)
    }

    /// Create a client with a custom reqwest::Client
    pub fn with_client(
        client: reqwest::Client,
        server_address: &str,
        token: impl Into<String>,
    ) -> Result<Self, ApiError> {
        // Url::join replaces the last path segment unless the base ends in '/'
        let mut base_url = Url::parse(server_address)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            token: token.into(),
            device_info: DeviceInfo::new("shelfsync"),
        })
    }

    pub fn with_device_info(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = device_info;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &T,
    ) -> Result<reqwest::Response, ApiError> {
        let response = self
            .client
            .post(url.clone())
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::RequestFailed {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status().as_u16();
        if status >= 400 {
            warn!("POST {} answered {}", url, status);
            return Err(ApiError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ApiClient for ReqwestApiClient {
    async fn send_progress_sync(
        &self,
        session_id: &str,
        payload: &SyncData,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("api/session/{session_id}/sync"))?;
        self.post(url, payload).await?;
        debug!("sendProgressSync success for session={}", session_id);
        Ok(())
    }

    async fn send_local_progress_sync(&self, session: &PlaybackSession) -> Result<(), ApiError> {
        let url = self.endpoint("api/session/local")?;
        self.post(url, session).await?;
        debug!("sendLocalProgressSync success for session={}", session.id);
        Ok(())
    }

    async fn send_local_sessions(
        &self,
        sessions: &[PlaybackSession],
    ) -> Result<Vec<LocalSessionSyncResult>, ApiError> {
        let url = self.endpoint("api/session/local-all")?;
        let payload = LocalSessionsPayload {
            sessions,
            device_info: &self.device_info,
        };
        let response = self.post(url.clone(), &payload).await?;

        let body: LocalSessionsResponse =
            response.json().await.map_err(|e| ApiError::DecodeFailed {
                url: url.to_string(),
                source: e,
            })?;
        Ok(body.results)
    }
}
