use crate::db::models::{Camera, Entry, Location, Video};
use crate::lifecycle::{EntryStatus, VideoStatus};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

pub mod entries;
pub mod locations;
pub mod videos;

pub use entries::EntriesRepository;
pub use locations::LocationsRepository;
pub use videos::VideosRepository;

/// Result of the atomic entry-plus-fanout insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Another entry for the member fell inside the dedup window; nothing
    /// was written.
    Duplicate,
}

/// What `confirm_upload` did: the confirmed video, its camera (for the
/// processing-job payload), and whether the parent entry cleared the
/// barrier.
#[derive(Debug, Clone)]
pub struct ConfirmedUpload {
    pub video: Video,
    pub camera: Camera,
    pub entry_advanced: bool,
}

/// Read/write access to locations and their cameras, always scoped to a
/// tenant on lookup.
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn get_for_tenant(&self, id: Uuid, tenant_id: Uuid) -> Result<Option<Location>>;

    async fn cameras(&self, location_id: Uuid) -> Result<Vec<Camera>>;

    async fn update_operational_hours(
        &self,
        id: Uuid,
        hours: &serde_json::Value,
    ) -> Result<()>;
}

/// Entry persistence. The fanout insert and the dedup check form one
/// atomic unit.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Insert an entry and its videos in one transaction, unless another
    /// entry for the same member has `entered_at` within
    /// `[entry.entered_at - dedup_threshold, entry.entered_at]`. The check
    /// and insert are serialized per member so two near-simultaneous
    /// calls cannot both insert.
    async fn create_with_videos(
        &self,
        entry: &Entry,
        videos: &[Video],
        dedup_threshold: Duration,
    ) -> Result<InsertOutcome>;

    async fn get(&self, id: Uuid) -> Result<Option<Entry>>;

    /// Compare-and-set status update; fails with `Conflict` if the row
    /// moved away from `from` in the meantime.
    async fn set_status(&self, id: Uuid, from: EntryStatus, to: EntryStatus) -> Result<()>;
}

/// Video persistence, including the barrier-join confirmation.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Video>>;

    /// Compare-and-set status update; fails with `Conflict` if the row
    /// moved away from `from` in the meantime.
    async fn set_status(&self, id: Uuid, from: VideoStatus, to: VideoStatus) -> Result<()>;

    /// Move the video to ProcessReady and stamp `uploaded_at`; advance the
    /// parent entry iff every sibling has passed the upload path. Runs as
    /// one atomic read-modify-write with the parent entry row locked, so
    /// concurrent sibling confirmations serialize.
    async fn confirm_upload(&self, id: Uuid, at: DateTime<Utc>) -> Result<ConfirmedUpload>;
}
