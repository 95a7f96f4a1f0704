//! HTTP API client for the notification endpoints.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notifeed_shared::{ApiError, Notification, NotificationId};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::credentials::CredentialSource;

/// Request/response operations the notification store depends on.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn list_notifications(&self) -> Result<Vec<Notification>, ApiError>;
    async fn mark_notification_read(&self, id: &NotificationId) -> Result<(), ApiError>;
    async fn mark_all_notifications_read(&self) -> Result<(), ApiError>;
}

/// HTTP client that authenticates every request with the current bearer token.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl ApiClient {
    pub fn new(credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            credentials,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Bound every request by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ApiError> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(self)
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        match self.credentials.token() {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn send(&self, rb: RequestBuilder) -> Result<String, ApiError> {
        let resp = self
            .authorize(rb)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            if status == 401 {
                tracing::warn!("notification API rejected the credential");
            }
            return Err(ApiError::Http { status, body: text });
        }
        Ok(text)
    }

    /// GET a JSON document
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let text = self.send(self.client.get(self.url(path))).await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    /// POST without a body; an empty response decodes as `null`.
    pub async fn post_empty<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let rb = self
            .client
            .post(self.url(path))
            .header("Content-Type", "application/json");
        let text = self.send(rb).await?;

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }
}

#[async_trait]
impl NotificationApi for ApiClient {
    async fn list_notifications(&self) -> Result<Vec<Notification>, ApiError> {
        self.get_json("/notification").await
    }

    async fn mark_notification_read(&self, id: &NotificationId) -> Result<(), ApiError> {
        let path = format!("/notification/{}/read", urlencoding::encode(id.as_str()));
        self.post_empty::<serde_json::Value>(&path).await.map(drop)
    }

    async fn mark_all_notifications_read(&self) -> Result<(), ApiError> {
        self.post_empty::<serde_json::Value>("/notification/mark-all-read")
            .await
            .map(drop)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
