use crate::db::models::{Entry, EntryDb, Video, VideoDb};
use crate::db::repositories::{EntryStore, InsertOutcome};
use crate::error::Error;
use crate::lifecycle::EntryStatus;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Entries repository for handling entry persistence
#[derive(Clone)]
pub struct EntriesRepository {
    pool: Arc<PgPool>,
}

impl EntriesRepository {
    /// Create a new entries repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntryStore for EntriesRepository {
    /// Insert an entry and its fanned-out videos atomically, with the
    /// duplicate check serialized per member under an advisory
    /// transaction lock. A plain check-then-insert would let two
    /// near-simultaneous deliveries both pass the check.
    async fn create_with_videos(
        &self,
        entry: &Entry,
        videos: &[Video],
        dedup_threshold: Duration,
    ) -> Result<InsertOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(format!("Failed to begin transaction: {}", e)))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&entry.member_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to take member lock: {}", e)))?;

        let duplicate = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM entries
            WHERE member_id = $1
              AND entered_at <= $2
              AND entered_at >= $3
            LIMIT 1
            "#,
        )
        .bind(&entry.member_id)
        .bind(entry.entered_at)
        .bind(entry.entered_at - dedup_threshold)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to check for duplicate entry: {}", e)))?;

        if let Some(existing) = duplicate {
            debug!(
                "Duplicate entry for member {} within threshold (existing entry {})",
                entry.member_id, existing
            );
            tx.rollback()
                .await
                .map_err(|e| Error::Database(format!("Failed to roll back: {}", e)))?;
            return Ok(InsertOutcome::Duplicate);
        }

        let entry_db = EntryDb::from(entry.clone());
        sqlx::query(
            r#"
            INSERT INTO entries (id, location_id, member_id, member_meta, entered_at, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry_db.id)
        .bind(entry_db.location_id)
        .bind(&entry_db.member_id)
        .bind(&entry_db.member_meta)
        .bind(entry_db.entered_at)
        .bind(&entry_db.status)
        .bind(entry_db.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(format!("Failed to create entry: {}", e)))?;

        for video in videos {
            let video_db = VideoDb::from(video.clone());
            sqlx::query(
                r#"
                INSERT INTO videos (id, entry_id, camera_id, status, uploaded_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(video_db.id)
            .bind(video_db.entry_id)
            .bind(video_db.camera_id)
            .bind(&video_db.status)
            .bind(video_db.uploaded_at)
            .bind(video_db.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(format!("Failed to create video: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(format!("Failed to commit entry creation: {}", e)))?;

        info!(
            "Created entry {} with {} videos for member {}",
            entry.id,
            videos.len(),
            entry.member_id
        );

        Ok(InsertOutcome::Inserted)
    }

    /// Get entry by ID
    async fn get(&self, id: Uuid) -> Result<Option<Entry>> {
        let result = sqlx::query_as::<_, EntryDb>(
            r#"
            SELECT id, location_id, member_id, member_meta, entered_at, status, created_at
            FROM entries
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get entry by ID: {}", e)))?;

        result.map(Entry::try_from).transpose().map_err(Into::into)
    }

    /// Compare-and-set the entry status
    async fn set_status(&self, id: Uuid, from: EntryStatus, to: EntryStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE entries
            SET status = $1
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(to.code())
        .bind(id)
        .bind(from.code())
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update entry status: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "Entry {} was no longer at {} when moving to {}",
                id,
                from.name(),
                to.name()
            ))
            .into());
        }

        info!("Entry {} moved from {} to {}", id, from.name(), to.name());
        Ok(())
    }
}
