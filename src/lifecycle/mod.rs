//! Status state machines for entries and videos, plus the service that
//! drives them: upload confirmation with the all-siblings barrier join,
//! admin status overrides, and soft deletion.

use crate::db::models::Camera;
use crate::db::repositories::{ConfirmedUpload, EntryStore, VideoStore};
use crate::error::Error;
use crate::messaging::JobQueue;
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Video lifecycle states. Persisted as the numeric wire codes, exposed
/// by name over the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStatus {
    Created,
    UploadInProgress,
    UploadFailed,
    ProcessReady,
    ReviewReady,
    Deleted,
}

impl VideoStatus {
    pub fn code(&self) -> &'static str {
        match self {
            VideoStatus::Created => "100",
            VideoStatus::UploadInProgress => "210",
            VideoStatus::UploadFailed => "410",
            VideoStatus::ProcessReady => "120",
            VideoStatus::ReviewReady => "130",
            VideoStatus::Deleted => "900",
        }
    }

    pub fn from_code(code: &str) -> Option<VideoStatus> {
        match code {
            "100" => Some(VideoStatus::Created),
            "210" => Some(VideoStatus::UploadInProgress),
            "410" => Some(VideoStatus::UploadFailed),
            "120" => Some(VideoStatus::ProcessReady),
            "130" => Some(VideoStatus::ReviewReady),
            "900" => Some(VideoStatus::Deleted),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VideoStatus::Created => "CREATED",
            VideoStatus::UploadInProgress => "UPLOAD_IN_PROGRESS",
            VideoStatus::UploadFailed => "UPLOAD_FAILED",
            VideoStatus::ProcessReady => "PROCESS_READY",
            VideoStatus::ReviewReady => "REVIEW_READY",
            VideoStatus::Deleted => "DELETED",
        }
    }

    pub fn from_name(name: &str) -> Option<VideoStatus> {
        match name {
            "CREATED" => Some(VideoStatus::Created),
            "UPLOAD_IN_PROGRESS" => Some(VideoStatus::UploadInProgress),
            "UPLOAD_FAILED" => Some(VideoStatus::UploadFailed),
            "PROCESS_READY" => Some(VideoStatus::ProcessReady),
            "REVIEW_READY" => Some(VideoStatus::ReviewReady),
            "DELETED" => Some(VideoStatus::Deleted),
            _ => None,
        }
    }

    /// Legal transitions. Deleted is terminal; UploadFailed can only be
    /// re-entered into the upload path by an external retry.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        use VideoStatus::*;
        match (self, next) {
            (Deleted, _) => false,
            (_, Deleted) => true,
            (Created, UploadInProgress) | (Created, UploadFailed) | (Created, ProcessReady) => true,
            (UploadInProgress, ProcessReady) | (UploadInProgress, UploadFailed) => true,
            (UploadFailed, UploadInProgress) => true,
            (ProcessReady, ReviewReady) => true,
            // A reviewed video may take further review actions.
            (ReviewReady, ReviewReady) => true,
            _ => false,
        }
    }

    /// Whether a sibling in this state holds its entry back from the
    /// ProcessReady barrier. Soft-deleted videos do not.
    pub fn blocks_entry_join(&self) -> bool {
        matches!(
            self,
            VideoStatus::Created | VideoStatus::UploadInProgress | VideoStatus::UploadFailed
        )
    }
}

/// Entry lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Created,
    ProcessReady,
    ReviewReady,
    Deleted,
}

impl EntryStatus {
    pub fn code(&self) -> &'static str {
        match self {
            EntryStatus::Created => "100",
            EntryStatus::ProcessReady => "120",
            EntryStatus::ReviewReady => "130",
            EntryStatus::Deleted => "900",
        }
    }

    pub fn from_code(code: &str) -> Option<EntryStatus> {
        match code {
            "100" => Some(EntryStatus::Created),
            "120" => Some(EntryStatus::ProcessReady),
            "130" => Some(EntryStatus::ReviewReady),
            "900" => Some(EntryStatus::Deleted),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EntryStatus::Created => "CREATED",
            EntryStatus::ProcessReady => "PROCESS_READY",
            EntryStatus::ReviewReady => "REVIEW_READY",
            EntryStatus::Deleted => "DELETED",
        }
    }

    pub fn from_name(name: &str) -> Option<EntryStatus> {
        match name {
            "CREATED" => Some(EntryStatus::Created),
            "PROCESS_READY" => Some(EntryStatus::ProcessReady),
            "REVIEW_READY" => Some(EntryStatus::ReviewReady),
            "DELETED" => Some(EntryStatus::Deleted),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: EntryStatus) -> bool {
        use EntryStatus::*;
        match (self, next) {
            (Deleted, _) => false,
            (_, Deleted) => true,
            (Created, ProcessReady) => true,
            (ProcessReady, ReviewReady) => true,
            (ReviewReady, ReviewReady) => true,
            _ => false,
        }
    }
}

/// Drives status transitions for persisted entries and videos.
pub struct LifecycleService {
    entries: Arc<dyn EntryStore>,
    videos: Arc<dyn VideoStore>,
    queue: Arc<dyn JobQueue>,
    processing_topic: String,
}

impl LifecycleService {
    pub fn new(
        entries: Arc<dyn EntryStore>,
        videos: Arc<dyn VideoStore>,
        queue: Arc<dyn JobQueue>,
        processing_topic: String,
    ) -> Self {
        Self {
            entries,
            videos,
            queue,
            processing_topic,
        }
    }

    /// Confirm that a video's capture/upload finished. The video moves to
    /// ProcessReady and gets its processing job enqueued; the parent entry
    /// advances iff no sibling still pends (the barrier join, evaluated
    /// atomically by the store).
    pub async fn confirm_upload(&self, video_id: Uuid) -> Result<ConfirmedUpload> {
        let confirmed = self.videos.confirm_upload(video_id, Utc::now()).await?;

        info!(
            "Upload confirmed for video {} (entry {} {})",
            video_id,
            confirmed.video.entry_id,
            if confirmed.entry_advanced {
                "advanced to PROCESS_READY"
            } else {
                "still waiting on siblings"
            }
        );

        self.enqueue_processing_job(&confirmed.video.id, &confirmed.camera)
            .await?;

        Ok(confirmed)
    }

    /// One processing job per confirmed video, carrying the camera
    /// geometry the downstream analysis consumes. Independent of sibling
    /// state; duplicate delivery is a downstream no-op.
    async fn enqueue_processing_job(&self, video_id: &Uuid, camera: &Camera) -> Result<()> {
        let payload = json!({
            "video": {"id": video_id},
            "camera": {
                "id": camera.id,
                "geometry": camera.geometry(),
            },
        });

        debug!("Enqueueing processing job for video {}", video_id);
        self.queue.enqueue(&self.processing_topic, payload).await
    }

    /// Admin override for a video status. Transition legality is checked
    /// against the current persisted state; mutating a deleted video is an
    /// error, not a no-op.
    pub async fn set_video_status(&self, id: Uuid, status: VideoStatus) -> Result<VideoStatus> {
        let video = self
            .videos
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Video {} not found", id)))?;

        if !video.status.can_transition_to(status) {
            return Err(Error::State(format!(
                "Video {} cannot move from {} to {}",
                id,
                video.status.name(),
                status.name()
            ))
            .into());
        }

        self.videos.set_status(id, video.status, status).await?;
        Ok(video.status)
    }

    /// Admin override for an entry status.
    pub async fn set_entry_status(&self, id: Uuid, status: EntryStatus) -> Result<EntryStatus> {
        let entry = self
            .entries
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Entry {} not found", id)))?;

        if !entry.status.can_transition_to(status) {
            return Err(Error::State(format!(
                "Entry {} cannot move from {} to {}",
                id,
                entry.status.name(),
                status.name()
            ))
            .into());
        }

        self.entries.set_status(id, entry.status, status).await?;
        Ok(entry.status)
    }

    /// Soft-delete an entry. Terminal: any later mutation fails.
    pub async fn delete_entry(&self, id: Uuid) -> Result<()> {
        self.set_entry_status(id, EntryStatus::Deleted).await?;
        Ok(())
    }

    pub async fn video_exists(&self, id: Uuid) -> Result<bool> {
        Ok(self.videos.get(id).await?.is_some())
    }
}
