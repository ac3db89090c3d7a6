//! HTTP client for the metadata API.
//!
//! Endpoints:
//! - `GET    /api/users/{username}`
//! - `GET    /api/projects/{project_id}`
//! - `PUT    /api/projects/{project_id}/files?key=...`
//! - `DELETE /api/projects/{project_id}/files?key=...`
//!
//! A 404 on a lookup means "does not exist" and maps to `None`.

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, DeliveryResult};
use crate::store::{FileEntry, MetadataStore, Project, User};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

pub struct HttpMetadataStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpMetadataStore {
    pub fn new(config: &DeliveryConfig) -> DeliveryResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DeliveryError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// GET returning `None` on 404.
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> DeliveryResult<Option<T>> {
        let resp = self
            .authorized(self.client.get(self.url(path)))
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!("GET {path}: not found");
            return Ok(None);
        }
        let resp = check_status(resp, path).await?;
        Ok(Some(resp.json().await?))
    }
}

/// Turns non-success responses into store errors carrying the body text.
async fn check_status(resp: Response, path: &str) -> DeliveryResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };
    Err(DeliveryError::Store(format!("{path}: {detail}")))
}

#[async_trait]
impl MetadataStore for HttpMetadataStore {
    async fn user_by_username(&self, username: &str) -> DeliveryResult<Option<User>> {
        self.get_optional(&format!("/api/users/{username}")).await
    }

    async fn project(&self, project_id: &str) -> DeliveryResult<Option<Project>> {
        self.get_optional(&format!("/api/projects/{project_id}")).await
    }

    async fn put_file(&self, project_id: &str, key: &str, entry: &FileEntry) -> DeliveryResult<()> {
        let path = format!("/api/projects/{project_id}/files");
        let resp = self
            .authorized(self.client.put(self.url(&path)))
            .query(&[("key", key)])
            .json(entry)
            .send()
            .await?;
        check_status(resp, &path).await?;
        debug!("registered {key} in project {project_id}");
        Ok(())
    }

    async fn delete_file(&self, project_id: &str, key: &str) -> DeliveryResult<()> {
        let path = format!("/api/projects/{project_id}/files");
        let resp = self
            .authorized(self.client.delete(self.url(&path)))
            .query(&[("key", key)])
            .send()
            .await?;

        // Already gone counts as deleted.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(resp, &path).await?;
        debug!("removed {key} from project {project_id}");
        Ok(())
    }
}
