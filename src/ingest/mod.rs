//! Entry ingestion: one detection event comes in, is gated on the
//! location's operational calendar, deduplicated against re-deliveries,
//! fanned out into one video per camera, and dispatched to the capture
//! strategy the location is configured for.

use crate::clients::UploadIssuer;
use crate::db::models::{Camera, Entry, Location, UploadMethod, Video};
use crate::db::repositories::{EntryStore, InsertOutcome, LocationStore, VideoStore};
use crate::error::Error;
use crate::lifecycle::{EntryStatus, VideoStatus};
use crate::messaging::JobQueue;
use crate::schedule::WeekSchedule;
use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Two detections for the same member within this window are one entry.
pub const DUPLICATE_THRESHOLD_SECS: i64 = 5;

/// Fixed length of every capture.
pub const VIDEO_LENGTH_SECS: i64 = 10;

pub fn duplicate_threshold() -> Duration {
    Duration::seconds(DUPLICATE_THRESHOLD_SECS)
}

pub fn video_length() -> Duration {
    Duration::seconds(VIDEO_LENGTH_SECS)
}

/// Tenant scope and timezone for a request, supplied by the upstream
/// auth layer. The core never authenticates.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant_id: Uuid,
    pub timezone: Tz,
}

/// Parsed detection event.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryRequest {
    pub location_id: Uuid,
    pub member_id: String,
    /// Wall-clock time in the caller's declared timezone. Absent means
    /// "now".
    #[serde(default)]
    pub entered_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub member_meta: Option<serde_json::Value>,
    /// Calendar overrides for the operational check.
    #[serde(default)]
    pub is_holiday: bool,
    #[serde(default)]
    pub is_yesterday_holiday: bool,
}

/// Per-video dispatch result returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct VideoDispatch {
    pub video_id: Uuid,
    pub camera_id: Uuid,
    /// Present under the UserUpload strategy when issuing succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
}

/// Outcome of one ingestion call. NotOperational and Duplicate are
/// successes that create nothing.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    NotOperational { location_name: String },
    Duplicate,
    Accepted {
        entry_id: Uuid,
        videos: Vec<VideoDispatch>,
    },
}

/// The ingestion pipeline and its collaborators.
pub struct EntryIngestionPipeline {
    locations: Arc<dyn LocationStore>,
    entries: Arc<dyn EntryStore>,
    videos: Arc<dyn VideoStore>,
    uploads: Arc<dyn UploadIssuer>,
    queue: Arc<dyn JobQueue>,
    capture_topic: String,
}

impl EntryIngestionPipeline {
    pub fn new(
        locations: Arc<dyn LocationStore>,
        entries: Arc<dyn EntryStore>,
        videos: Arc<dyn VideoStore>,
        uploads: Arc<dyn UploadIssuer>,
        queue: Arc<dyn JobQueue>,
        capture_topic: String,
    ) -> Self {
        Self {
            locations,
            entries,
            videos,
            uploads,
            queue,
            capture_topic,
        }
    }

    pub async fn ingest(&self, request: EntryRequest, auth: &AuthContext) -> Result<IngestOutcome> {
        if request.member_id.trim().is_empty() {
            return Err(Error::Validation("member_id must not be empty".to_string()).into());
        }

        let location = self
            .locations
            .get_for_tenant(request.location_id, auth.tenant_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("Location {} not found", request.location_id))
            })?;

        // Custom has no dispatch path; reject before anything persists.
        if location.upload_method == UploadMethod::Custom {
            return Err(Error::UnsupportedUploadMethod(format!(
                "Custom upload is not supported for location {}",
                location.name
            ))
            .into());
        }

        let current_time = self.resolve_entered_at(&request, auth)?;

        if !self.check_operational(&location, current_time, &request, auth) {
            info!("Location {} is not operational", location.name);
            return Ok(IngestOutcome::NotOperational {
                location_name: location.name,
            });
        }

        let cameras = self.locations.cameras(location.id).await?;
        if cameras.is_empty() {
            return Err(Error::NotFound(format!(
                "No cameras attached to location {}",
                location.name
            ))
            .into());
        }

        let entry = Entry {
            id: Uuid::new_v4(),
            location_id: location.id,
            member_id: request.member_id.clone(),
            member_meta: request.member_meta.clone().unwrap_or_else(|| json!({})),
            entered_at: current_time,
            status: EntryStatus::Created,
            created_at: Utc::now(),
        };

        // The video set is frozen here: cameras attached later do not
        // join this entry.
        let videos: Vec<Video> = cameras
            .iter()
            .map(|camera| Video::new(entry.id, camera.id))
            .collect();

        match self
            .entries
            .create_with_videos(&entry, &videos, duplicate_threshold())
            .await?
        {
            InsertOutcome::Duplicate => {
                info!(
                    "Duplicate entry detected in {} for {}",
                    location.name, request.member_id
                );
                return Ok(IngestOutcome::Duplicate);
            }
            InsertOutcome::Inserted => {}
        }

        let dispatches = match location.upload_method {
            UploadMethod::UserUpload => self.dispatch_user_upload(&videos, &cameras).await?,
            UploadMethod::Rtsp => {
                self.dispatch_rtsp(&location, &videos, &cameras, current_time)
                    .await?
            }
            // Rejected before the fanout insert.
            UploadMethod::Custom => Vec::new(),
        };

        Ok(IngestOutcome::Accepted {
            entry_id: entry.id,
            videos: dispatches,
        })
    }

    /// A supplied `entered_at` is wall-clock time in the caller's
    /// timezone; otherwise the ingestion instant is used.
    fn resolve_entered_at(
        &self,
        request: &EntryRequest,
        auth: &AuthContext,
    ) -> Result<DateTime<Utc>> {
        match request.entered_at {
            None => Ok(Utc::now()),
            Some(local) => {
                let resolved = local
                    .and_local_timezone(auth.timezone)
                    .single()
                    .ok_or_else(|| {
                        Error::Validation(format!(
                            "entered_at {} is ambiguous or invalid in {}",
                            local, auth.timezone
                        ))
                    })?;
                Ok(resolved.with_timezone(&Utc))
            }
        }
    }

    fn check_operational(
        &self,
        location: &Location,
        current_time: DateTime<Utc>,
        request: &EntryRequest,
        auth: &AuthContext,
    ) -> bool {
        let Some(hours) = &location.operational_hours else {
            info!("Operational hours not found for location {}", location.name);
            return false;
        };

        match WeekSchedule::from_value(hours) {
            Ok(schedule) => schedule.is_operational_at(
                current_time,
                auth.timezone,
                request.is_holiday,
                request.is_yesterday_holiday,
            ),
            Err(e) => {
                warn!(
                    "Stored schedule for location {} is unreadable: {}",
                    location.name, e
                );
                false
            }
        }
    }

    /// UserUpload: one presigned target per video. A failed issue marks
    /// that video UploadFailed instead of aborting the batch.
    async fn dispatch_user_upload(
        &self,
        videos: &[Video],
        cameras: &[Camera],
    ) -> Result<Vec<VideoDispatch>> {
        let mut dispatches = Vec::with_capacity(videos.len());

        for (video, camera) in videos.iter().zip(cameras) {
            let upload_url = match self.uploads.issue_upload_target(video.id).await {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!("Failed to issue upload target for video {}: {}", video.id, e);
                    self.mark_dispatch_failed(video).await?;
                    None
                }
            };

            dispatches.push(VideoDispatch {
                video_id: video.id,
                camera_id: camera.id,
                upload_url,
            });
        }

        Ok(dispatches)
    }

    /// RTSP: one capture request per (camera, video) pair, shifted by the
    /// camera's offset. Publish failures are tracked per video.
    async fn dispatch_rtsp(
        &self,
        location: &Location,
        videos: &[Video],
        cameras: &[Camera],
        current_time: DateTime<Utc>,
    ) -> Result<Vec<VideoDispatch>> {
        let mut dispatches = Vec::with_capacity(videos.len());

        for (video, camera) in videos.iter().zip(cameras) {
            let dispatched = match &camera.stream_url {
                None => {
                    warn!(
                        "Camera {} at {} has no stream URL; cannot capture video {}",
                        camera.id, location.name, video.id
                    );
                    false
                }
                Some(stream_url) => {
                    let offset =
                        Duration::milliseconds((camera.offset_amount * 1000.0).round() as i64);
                    let start = current_time + offset;
                    let end = start + video_length();

                    let payload = json!({
                        "video": {"id": video.id},
                        "stream_name": stream_url,
                        "start_timestamp": start.format("%Y-%m-%d %H:%M:%S").to_string(),
                        "end_timestamp": end.format("%Y-%m-%d %H:%M:%S").to_string(),
                    });

                    match self.queue.enqueue(&self.capture_topic, payload).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(
                                "Failed to enqueue capture for video {}: {}",
                                video.id, e
                            );
                            false
                        }
                    }
                }
            };

            if !dispatched {
                self.mark_dispatch_failed(video).await?;
            }

            debug!(
                "RTSP capture dispatch for video {} at {}: {}",
                video.id,
                location.name,
                if dispatched { "queued" } else { "failed" }
            );

            dispatches.push(VideoDispatch {
                video_id: video.id,
                camera_id: camera.id,
                upload_url: None,
            });
        }

        Ok(dispatches)
    }

    /// A video whose dispatch failed must not sit at Created forever.
    async fn mark_dispatch_failed(&self, video: &Video) -> Result<()> {
        self.videos
            .set_status(video.id, VideoStatus::Created, VideoStatus::UploadFailed)
            .await
    }
}
