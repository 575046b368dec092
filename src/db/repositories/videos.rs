use crate::db::models::{Camera, Video, VideoDb};
use crate::db::repositories::{ConfirmedUpload, VideoStore};
use crate::error::Error;
use crate::lifecycle::VideoStatus;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Videos repository for handling video persistence and the upload
/// confirmation barrier
#[derive(Clone)]
pub struct VideosRepository {
    pool: Arc<PgPool>,
}

impl VideosRepository {
    /// Create a new videos repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VideoStore for VideosRepository {
    /// Get video by ID
    async fn get(&self, id: Uuid) -> Result<Option<Video>> {
        let result = sqlx::query_as::<_, VideoDb>(
            r#"
            SELECT id, entry_id, camera_id, status, uploaded_at, created_at
            FROM videos
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get video by ID: {}", e)))?;

        result.map(Video::try_from).transpose().map_err(Into::into)
    }

    /// Compare-and-set the video status
    async fn set_status(&self, id: Uuid, from: VideoStatus, to: VideoStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE videos
            SET status = $1
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(to.code())
        .bind(id)
        .bind(from.code())
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update video status: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "Video {} was no longer at {} when moving to {}",
                id,
                from.name(),
                to.name()
            ))
            .into());
        }

        info!("Video {} moved from {} to {}", id, from.name(), to.name());
        Ok(())
    }

    /// Confirm the upload of one video. The parent entry row is locked
    /// for the duration, so sibling confirmations arriving concurrently
    /// evaluate the barrier one at a time and exactly one of them
    /// advances the entry.
    async fn confirm_upload(&self, id: Uuid, at: DateTime<Utc>) -> Result<ConfirmedUpload> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;

        let video_db = sqlx::query_as::<_, VideoDb>(
            r#"
            SELECT id, entry_id, camera_id, status, uploaded_at, created_at
            FROM videos
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to get video for confirmation: {}", e)))?;

        let Some(video_db) = video_db else {
            return Err(Error::NotFound(format!("Video {} not found", id)).into());
        };
        let video = Video::try_from(video_db)?;

        // Lock the parent entry row: this is the barrier's critical
        // section.
        let entry_status = sqlx::query_scalar::<_, String>(
            r#"
            SELECT status
            FROM entries
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(video.entry_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to lock parent entry: {}", e)))?;

        let entry_status =
            crate::lifecycle::EntryStatus::from_code(&entry_status).ok_or_else(|| {
                Error::Database(format!(
                    "Unknown entry status code {:?} on entry {}",
                    entry_status, video.entry_id
                ))
            })?;

        if entry_status == crate::lifecycle::EntryStatus::Deleted {
            return Err(Error::State(format!(
                "Entry {} is deleted; video {} cannot be confirmed",
                video.entry_id, id
            ))
            .into());
        }

        if !video.status.can_transition_to(VideoStatus::ProcessReady) {
            return Err(Error::State(format!(
                "Video {} cannot be confirmed from {}",
                id,
                video.status.name()
            ))
            .into());
        }

        sqlx::query(
            r#"
            UPDATE videos
            SET status = $1, uploaded_at = $2
            WHERE id = $3
            "#,
        )
        .bind(VideoStatus::ProcessReady.code())
        .bind(at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to confirm video upload: {}", e)))?;

        // Siblings still on the upload path hold the entry back.
        let pending = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM videos
            WHERE entry_id = $1
              AND id <> $2
              AND status IN ($3, $4, $5)
            "#,
        )
        .bind(video.entry_id)
        .bind(id)
        .bind(VideoStatus::Created.code())
        .bind(VideoStatus::UploadInProgress.code())
        .bind(VideoStatus::UploadFailed.code())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to count pending siblings: {}", e)))?;

        let entry_advanced =
            pending == 0 && entry_status == crate::lifecycle::EntryStatus::Created;

        if entry_advanced {
            sqlx::query(
                r#"
                UPDATE entries
                SET status = $1
                WHERE id = $2
                "#,
            )
            .bind(crate::lifecycle::EntryStatus::ProcessReady.code())
            .bind(video.entry_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to advance entry: {}", e)))?;
        }

        let camera = sqlx::query_as::<_, Camera>(
            r#"
            SELECT id, location_id, name, display_order, offset_amount, stream_url,
                   threshold, x1, y1, x2, y2, x3, y3, x4, y4, nx, ny,
                   created_at, updated_at
            FROM cameras
            WHERE id = $1
            "#,
        )
        .bind(video.camera_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera for video: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit confirmation: {}", e)))?;

        let video = Video {
            status: VideoStatus::ProcessReady,
            uploaded_at: Some(at),
            ..video
        };

        Ok(ConfirmedUpload {
            video,
            camera,
            entry_advanced,
        })
    }
}
