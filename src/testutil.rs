//! Shared in-memory fakes for unit tests: a store that honors the dedup
//! and barrier semantics of the real repositories, plus recording mocks
//! for the queue and the external services.

use crate::clients::{ExternalScheduler, StreamRegistry, UploadIssuer};
use crate::db::models::{Camera, Entry, Location, UploadMethod, Video};
use crate::db::repositories::{
    ConfirmedUpload, EntryStore, InsertOutcome, LocationStore, VideoStore,
};
use crate::error::Error;
use crate::lifecycle::{EntryStatus, VideoStatus};
use crate::messaging::JobQueue;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    locations: HashMap<Uuid, Location>,
    cameras: Vec<Camera>,
    entries: HashMap<Uuid, Entry>,
    videos: HashMap<Uuid, Video>,
}

/// In-memory implementation of all three stores.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_location(&self, location: Location) {
        let mut state = self.state.lock().unwrap();
        state.locations.insert(location.id, location);
    }

    pub fn add_camera(&self, camera: Camera) {
        let mut state = self.state.lock().unwrap();
        state.cameras.push(camera);
    }

    pub fn entry(&self, id: Uuid) -> Option<Entry> {
        self.state.lock().unwrap().entries.get(&id).cloned()
    }

    pub fn video(&self, id: Uuid) -> Option<Video> {
        self.state.lock().unwrap().videos.get(&id).cloned()
    }

    pub fn videos_for_entry(&self, entry_id: Uuid) -> Vec<Video> {
        let state = self.state.lock().unwrap();
        state
            .videos
            .values()
            .filter(|v| v.entry_id == entry_id)
            .cloned()
            .collect()
    }

    pub fn location(&self, id: Uuid) -> Option<Location> {
        self.state.lock().unwrap().locations.get(&id).cloned()
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn video_count(&self) -> usize {
        self.state.lock().unwrap().videos.len()
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn get_for_tenant(&self, id: Uuid, tenant_id: Uuid) -> Result<Option<Location>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .locations
            .get(&id)
            .filter(|l| l.tenant_id == tenant_id)
            .cloned())
    }

    async fn cameras(&self, location_id: Uuid) -> Result<Vec<Camera>> {
        let state = self.state.lock().unwrap();
        let mut cameras: Vec<Camera> = state
            .cameras
            .iter()
            .filter(|c| c.location_id == location_id)
            .cloned()
            .collect();
        // Same order as the Postgres repository: display_order NULLS
        // LAST, then name.
        cameras.sort_by(|a, b| match (a.display_order, b.display_order) {
            (None, None) => a.name.cmp(&b.name),
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (Some(_), None) => std::cmp::Ordering::Less,
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.name.cmp(&b.name)),
        });
        Ok(cameras)
    }

    async fn update_operational_hours(&self, id: Uuid, hours: &Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let location = state
            .locations
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Location {} not found", id)))?;
        location.operational_hours = Some(hours.clone());
        Ok(())
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn create_with_videos(
        &self,
        entry: &Entry,
        videos: &[Video],
        dedup_threshold: Duration,
    ) -> Result<InsertOutcome> {
        let mut state = self.state.lock().unwrap();

        let earliest = entry.entered_at - dedup_threshold;
        let duplicate = state.entries.values().any(|existing| {
            existing.member_id == entry.member_id
                && existing.entered_at >= earliest
                && existing.entered_at <= entry.entered_at
        });
        if duplicate {
            return Ok(InsertOutcome::Duplicate);
        }

        state.entries.insert(entry.id, entry.clone());
        for video in videos {
            state.videos.insert(video.id, video.clone());
        }
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Entry>> {
        Ok(self.state.lock().unwrap().entries.get(&id).cloned())
    }

    async fn set_status(&self, id: Uuid, from: EntryStatus, to: EntryStatus) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Entry {} not found", id)))?;
        if entry.status != from {
            return Err(Error::Conflict(format!(
                "Entry {} was no longer at {} when moving to {}",
                id,
                from.name(),
                to.name()
            ))
            .into());
        }
        entry.status = to;
        Ok(())
    }
}

#[async_trait]
impl VideoStore for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<Video>> {
        Ok(self.state.lock().unwrap().videos.get(&id).cloned())
    }

    async fn set_status(&self, id: Uuid, from: VideoStatus, to: VideoStatus) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let video = state
            .videos
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Video {} not found", id)))?;
        if video.status != from {
            return Err(Error::Conflict(format!(
                "Video {} was no longer at {} when moving to {}",
                id,
                from.name(),
                to.name()
            ))
            .into());
        }
        video.status = to;
        Ok(())
    }

    async fn confirm_upload(&self, id: Uuid, at: DateTime<Utc>) -> Result<ConfirmedUpload> {
        let mut state = self.state.lock().unwrap();

        let video = state
            .videos
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Video {} not found", id)))?;

        let entry_status = state
            .entries
            .get(&video.entry_id)
            .map(|e| e.status)
            .ok_or_else(|| Error::NotFound(format!("Entry {} not found", video.entry_id)))?;

        if entry_status == EntryStatus::Deleted {
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

        {
            let stored = state.videos.get_mut(&id).unwrap();
            stored.status = VideoStatus::ProcessReady;
            stored.uploaded_at = Some(at);
        }

        let pending = state
            .videos
            .values()
            .filter(|v| v.entry_id == video.entry_id && v.id != id)
            .filter(|v| v.status.blocks_entry_join())
            .count();

        let entry_advanced = pending == 0 && entry_status == EntryStatus::Created;
        if entry_advanced {
            state.entries.get_mut(&video.entry_id).unwrap().status = EntryStatus::ProcessReady;
        }

        let camera = state
            .cameras
            .iter()
            .find(|c| c.id == video.camera_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Camera {} not found", video.camera_id)))?;

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

/// Job queue that records every publish.
#[derive(Default)]
pub struct RecordingQueue {
    pub published: Mutex<Vec<(String, Value)>>,
    pub fail: AtomicBool,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue(&self, topic: &str, payload: Value) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Queue("broker unavailable".to_string()).into());
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// Upload issuer that hands out deterministic URLs.
#[derive(Default)]
pub struct MockUploadIssuer {
    pub issued: Mutex<Vec<Uuid>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl UploadIssuer for MockUploadIssuer {
    async fn issue_upload_target(&self, video_id: Uuid) -> Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Upload("presigner unavailable".to_string()).into());
        }
        self.issued.lock().unwrap().push(video_id);
        Ok(format!("https://uploads.test/{}", video_id))
    }
}

/// Scheduler mock with an operation log and a scripted sequence of
/// `group_exists` answers (defaults to false once the script runs out).
#[derive(Default)]
pub struct MockScheduler {
    pub ops: Mutex<Vec<String>>,
    pub exists_script: Mutex<VecDeque<bool>>,
}

impl MockScheduler {
    pub fn with_exists_script(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            exists_script: Mutex::new(answers.into_iter().collect()),
        }
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExternalScheduler for MockScheduler {
    async fn create_job_group(&self, id: &str) -> Result<()> {
        self.ops.lock().unwrap().push(format!("create_group {}", id));
        Ok(())
    }

    async fn delete_job_group(&self, id: &str) -> Result<()> {
        self.ops.lock().unwrap().push(format!("delete_group {}", id));
        Ok(())
    }

    async fn group_exists(&self, id: &str) -> Result<bool> {
        let answer = self
            .exists_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(false);
        self.ops
            .lock()
            .unwrap()
            .push(format!("exists {} -> {}", id, answer));
        Ok(answer)
    }

    async fn create_recurring_job(
        &self,
        group: &str,
        cron_expr: &str,
        timezone: &str,
        target_payload: Value,
    ) -> Result<()> {
        let camera_id = target_payload
            .get("camera_id")
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string();
        self.ops.lock().unwrap().push(format!(
            "job {} {} {} {}",
            group, cron_expr, timezone, camera_id
        ));
        Ok(())
    }
}

/// Stream registry mock tracking which streams exist.
#[derive(Default)]
pub struct MockStreamRegistry {
    pub existing: Mutex<HashSet<String>>,
    pub ops: Mutex<Vec<String>>,
}

impl MockStreamRegistry {
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamRegistry for MockStreamRegistry {
    async fn stream_exists(&self, name: &str) -> Result<bool> {
        Ok(self.existing.lock().unwrap().contains(name))
    }

    async fn create_stream(&self, name: &str, retention_hours: i32) -> Result<()> {
        self.existing.lock().unwrap().insert(name.to_string());
        self.ops
            .lock()
            .unwrap()
            .push(format!("create_stream {} {}h", name, retention_hours));
        Ok(())
    }
}

pub fn test_location(tenant_id: Uuid, upload_method: UploadMethod) -> Location {
    Location {
        id: Uuid::new_v4(),
        tenant_id,
        name: "Test Site".to_string(),
        upload_method,
        operational_hours: Some(json!({
            "mon": [{"start_time": "00:00:00", "duration": 23.5}],
            "tue": [{"start_time": "00:00:00", "duration": 23.5}],
            "wed": [{"start_time": "00:00:00", "duration": 23.5}],
            "thu": [{"start_time": "00:00:00", "duration": 23.5}],
            "fri": [{"start_time": "00:00:00", "duration": 23.5}],
            "sat": [{"start_time": "00:00:00", "duration": 23.5}],
            "sun": [{"start_time": "00:00:00", "duration": 23.5}],
        })),
        stream_retention_hours: 48,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn test_camera(location_id: Uuid, name: &str, offset_amount: f64) -> Camera {
    Camera {
        id: Uuid::new_v4(),
        location_id,
        name: name.to_string(),
        display_order: None,
        offset_amount,
        stream_url: Some(format!("rtsp://cameras.test/{}", name)),
        threshold: Some(0.5),
        x1: Some(0.0),
        y1: Some(0.0),
        x2: Some(1.0),
        y2: Some(0.0),
        x3: Some(1.0),
        y3: Some(1.0),
        x4: Some(0.0),
        y4: Some(1.0),
        nx: Some(0.5),
        ny: Some(0.5),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

mod tests {
    use super::*;

    #[tokio::test]
    async fn cameras_sort_with_unordered_ones_last() {
        let store = MemoryStore::new();
        let location_id = Uuid::new_v4();

        let mut unordered = test_camera(location_id, "aisle", 0.0);
        unordered.display_order = None;
        let mut second = test_camera(location_id, "door", 0.0);
        second.display_order = Some(2);
        let mut first = test_camera(location_id, "floor", 0.0);
        first.display_order = Some(1);

        store.add_camera(unordered);
        store.add_camera(second);
        store.add_camera(first);

        let names: Vec<String> = store
            .cameras(location_id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["floor", "door", "aisle"]);
    }
}
