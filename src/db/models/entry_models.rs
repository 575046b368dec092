use crate::error::Error;
use crate::lifecycle::{EntryStatus, VideoStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One detection accepted by the ingestion pipeline. Owns one video per
/// camera attached to the location at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub location_id: Uuid,
    pub member_id: String,
    pub member_meta: serde_json::Value,
    pub entered_at: DateTime<Utc>,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
}

/// Database row for an entry; status travels as its wire code.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntryDb {
    pub id: Uuid,
    pub location_id: Uuid,
    pub member_id: String,
    pub member_meta: serde_json::Value,
    pub entered_at: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<EntryDb> for Entry {
    type Error = Error;

    fn try_from(db: EntryDb) -> Result<Self, Error> {
        let status = EntryStatus::from_code(&db.status).ok_or_else(|| {
            Error::Database(format!(
                "Unknown entry status code {:?} on entry {}",
                db.status, db.id
            ))
        })?;

        Ok(Self {
            id: db.id,
            location_id: db.location_id,
            member_id: db.member_id,
            member_meta: db.member_meta,
            entered_at: db.entered_at,
            status,
            created_at: db.created_at,
        })
    }
}

impl From<Entry> for EntryDb {
    fn from(entry: Entry) -> Self {
        Self {
            id: entry.id,
            location_id: entry.location_id,
            member_id: entry.member_id,
            member_meta: entry.member_meta,
            entered_at: entry.entered_at,
            status: entry.status.code().to_string(),
            created_at: entry.created_at,
        }
    }
}

/// One capture for one camera of one entry. Never physically deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub camera_id: Uuid,
    pub status: VideoStatus,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Video {
    pub fn new(entry_id: Uuid, camera_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_id,
            camera_id,
            status: VideoStatus::Created,
            uploaded_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Database row for a video; status travels as its wire code.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VideoDb {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub camera_id: Uuid,
    pub status: String,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<VideoDb> for Video {
    type Error = Error;

    fn try_from(db: VideoDb) -> Result<Self, Error> {
        let status = VideoStatus::from_code(&db.status).ok_or_else(|| {
            Error::Database(format!(
                "Unknown video status code {:?} on video {}",
                db.status, db.id
            ))
        })?;

        Ok(Self {
            id: db.id,
            entry_id: db.entry_id,
            camera_id: db.camera_id,
            status,
            uploaded_at: db.uploaded_at,
            created_at: db.created_at,
        })
    }
}

impl From<Video> for VideoDb {
    fn from(video: Video) -> Self {
        Self {
            id: video.id,
            entry_id: video.entry_id,
            camera_id: video.camera_id,
            status: video.status.code().to_string(),
            uploaded_at: video.uploaded_at,
            created_at: video.created_at,
        }
    }
}
