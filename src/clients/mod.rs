//! Collaborator interfaces the core consumes, plus their HTTP-backed
//! implementations: the external recording scheduler, the stream
//! registry, and the upload-target presigner. The core only ever sees
//! the traits; tests substitute in-memory fakes.

use crate::config::{SchedulerConfig, StreamRegistryConfig, UploadConfig};
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// Recurring-job scheduler that executes the per-window recording
/// triggers. Jobs live in per-location groups.
#[async_trait]
pub trait ExternalScheduler: Send + Sync {
    async fn create_job_group(&self, id: &str) -> Result<()>;

    /// Request deletion of a group. Deletion is asynchronous on the
    /// scheduler side; callers poll `group_exists` until it is gone.
    async fn delete_job_group(&self, id: &str) -> Result<()>;

    async fn group_exists(&self, id: &str) -> Result<bool>;

    async fn create_recurring_job(
        &self,
        group: &str,
        cron_expr: &str,
        timezone: &str,
        target_payload: Value,
    ) -> Result<()>;
}

/// Registry of the video streams recordings land in.
#[async_trait]
pub trait StreamRegistry: Send + Sync {
    async fn stream_exists(&self, name: &str) -> Result<bool>;

    async fn create_stream(&self, name: &str, retention_hours: i32) -> Result<()>;
}

/// Issues one upload target per video under the UserUpload strategy.
#[async_trait]
pub trait UploadIssuer: Send + Sync {
    async fn issue_upload_target(&self, video_id: Uuid) -> Result<String>;
}

/// HTTP client for the external scheduler service.
pub struct SchedulerClient {
    http: reqwest::Client,
    base_url: Url,
}

impl SchedulerClient {
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("Invalid scheduler base URL: {}", e)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid scheduler endpoint {}: {}", path, e)).into())
    }
}

#[async_trait]
impl ExternalScheduler for SchedulerClient {
    async fn create_job_group(&self, id: &str) -> Result<()> {
        let url = self.endpoint("groups")?;
        self.http
            .post(url)
            .json(&json!({"name": id}))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Scheduler(format!("Failed to create job group {}: {}", id, e)))?;
        debug!("Created job group {}", id);
        Ok(())
    }

    async fn delete_job_group(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&format!("groups/{}", id))?;
        let response = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(|e| Error::Scheduler(format!("Failed to delete job group {}: {}", id, e)))?;

        // Deleting an absent group is not an error.
        if response.status() != StatusCode::NOT_FOUND {
            response.error_for_status().map_err(|e| {
                Error::Scheduler(format!("Failed to delete job group {}: {}", id, e))
            })?;
        }
        Ok(())
    }

    async fn group_exists(&self, id: &str) -> Result<bool> {
        let url = self.endpoint(&format!("groups/{}", id))?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Scheduler(format!("Failed to look up job group {}: {}", id, e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response
            .error_for_status()
            .map_err(|e| Error::Scheduler(format!("Failed to look up job group {}: {}", id, e)))?;
        Ok(true)
    }

    async fn create_recurring_job(
        &self,
        group: &str,
        cron_expr: &str,
        timezone: &str,
        target_payload: Value,
    ) -> Result<()> {
        let url = self.endpoint(&format!("groups/{}/jobs", group))?;
        self.http
            .post(url)
            .json(&json!({
                "schedule_expression": cron_expr,
                "timezone": timezone,
                "target": target_payload,
            }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                Error::Scheduler(format!("Failed to create job in group {}: {}", group, e))
            })?;
        Ok(())
    }
}

/// HTTP client for the stream registry service.
pub struct StreamRegistryClient {
    http: reqwest::Client,
    base_url: Url,
}

impl StreamRegistryClient {
    pub fn new(config: &StreamRegistryConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("Invalid stream registry base URL: {}", e)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }
}

#[async_trait]
impl StreamRegistry for StreamRegistryClient {
    async fn stream_exists(&self, name: &str) -> Result<bool> {
        let url = self
            .base_url
            .join(&format!("streams/{}", name))
            .map_err(|e| Error::Config(format!("Invalid stream endpoint: {}", e)))?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::StreamRegistry(format!("Failed to look up stream {}: {}", name, e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status().map_err(|e| {
            Error::StreamRegistry(format!("Failed to look up stream {}: {}", name, e))
        })?;
        Ok(true)
    }

    async fn create_stream(&self, name: &str, retention_hours: i32) -> Result<()> {
        let url = self
            .base_url
            .join("streams")
            .map_err(|e| Error::Config(format!("Invalid stream endpoint: {}", e)))?;
        self.http
            .post(url)
            .json(&json!({"name": name, "retention_hours": retention_hours}))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                Error::StreamRegistry(format!("Failed to create stream {}: {}", name, e))
            })?;
        debug!("Created stream {} ({}h retention)", name, retention_hours);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PresignResponse {
    url: String,
}

/// HTTP client for the object-storage presigner service.
pub struct PresignClient {
    http: reqwest::Client,
    base_url: Url,
    expiry_secs: u64,
}

impl PresignClient {
    pub fn new(config: &UploadConfig) -> Result<Self> {
        let base_url = Url::parse(&config.presigner_url)
            .map_err(|e| Error::Config(format!("Invalid presigner URL: {}", e)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            expiry_secs: config.expiry_secs,
        })
    }
}

#[async_trait]
impl UploadIssuer for PresignClient {
    async fn issue_upload_target(&self, video_id: Uuid) -> Result<String> {
        let url = self
            .base_url
            .join("presign")
            .map_err(|e| Error::Config(format!("Invalid presigner endpoint: {}", e)))?;
        let response = self
            .http
            .post(url)
            .json(&json!({
                "key": format!("videos/{}.mp4", video_id),
                "expires_in": self.expiry_secs,
            }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                Error::Upload(format!("Failed to issue upload target for {}: {}", video_id, e))
            })?;

        let presigned: PresignResponse = response.json().await.map_err(|e| {
            Error::Upload(format!("Unreadable presigner response for {}: {}", video_id, e))
        })?;

        Ok(presigned.url)
    }
}
