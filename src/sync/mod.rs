//! Projects a location's weekly calendar into the set of recurring
//! recording jobs held by the external scheduler. Schedule changes
//! replace the whole job group: delete, wait until the deletion has
//! fully landed, recreate, repopulate. Regenerating is cheap and far
//! less error-prone than diffing recurring triggers; the cost is a
//! window with no scheduled recordings for that location.
//!
//! The replace runs as a cancellable background task with a
//! caller-visible status instead of blocking the request that triggered
//! it.

use crate::clients::{ExternalScheduler, StreamRegistry};
use crate::config::SchedulerConfig;
use crate::db::models::{Camera, Location, UploadMethod};
use crate::db::repositories::LocationStore;
use crate::error::Error;
use crate::schedule::{DayClass, TimeWindow, WeekSchedule};
use anyhow::Result;
use chrono::Timelike;
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Caller-visible state of a job-group replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// The location does not record over RTSP; no external jobs exist.
    NotRequired,
    Pending,
    DeletingGroup,
    CreatingJobs,
    Completed,
    Failed(String),
    Cancelled,
}

struct ActiveSync {
    status: Arc<RwLock<SyncStatus>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Validates and persists schedule changes and keeps the external job
/// group in step with them.
pub struct RecordingScheduleSynchronizer {
    locations: Arc<dyn LocationStore>,
    scheduler: Arc<dyn ExternalScheduler>,
    streams: Arc<dyn StreamRegistry>,
    config: SchedulerConfig,
    active: Arc<RwLock<HashMap<Uuid, Arc<ActiveSync>>>>,
}

impl RecordingScheduleSynchronizer {
    pub fn new(
        locations: Arc<dyn LocationStore>,
        scheduler: Arc<dyn ExternalScheduler>,
        streams: Arc<dyn StreamRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            locations,
            scheduler,
            streams,
            config,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validate and persist a new weekly schedule for the location, then
    /// kick off the job-group replacement when the location records over
    /// RTSP. Validation failure leaves both the stored schedule and the
    /// external jobs untouched.
    pub async fn update(
        &self,
        location: &Location,
        schedule_value: serde_json::Value,
        timezone: Tz,
    ) -> Result<SyncStatus> {
        let schedule = WeekSchedule::from_value(&schedule_value)?;
        if !schedule.validate() {
            return Err(Error::InvalidSchedule(format!(
                "Schedule for location {} has overlapping windows",
                location.name
            ))
            .into());
        }

        self.locations
            .update_operational_hours(location.id, &schedule_value)
            .await?;

        if location.upload_method != UploadMethod::Rtsp {
            info!(
                "Skipping job sync for location {}: upload method is {}",
                location.name,
                location.upload_method.as_str()
            );
            return Ok(SyncStatus::NotRequired);
        }

        let cameras = self.locations.cameras(location.id).await?;
        self.spawn_replace(location, cameras, schedule, timezone)
            .await;

        Ok(SyncStatus::Pending)
    }

    /// Current replacement status for a location, if one was ever started
    /// in this process.
    pub async fn status(&self, location_id: Uuid) -> Option<SyncStatus> {
        let active = self.active.read().await;
        match active.get(&location_id) {
            Some(sync) => Some(sync.status.read().await.clone()),
            None => None,
        }
    }

    /// Wait for a location's running replacement to finish. Used by tests
    /// and graceful shutdown.
    pub async fn wait(&self, location_id: Uuid) {
        let handle = {
            let active = self.active.read().await;
            match active.get(&location_id) {
                Some(sync) => sync.handle.lock().await.take(),
                None => None,
            }
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn spawn_replace(
        &self,
        location: &Location,
        cameras: Vec<Camera>,
        schedule: WeekSchedule,
        timezone: Tz,
    ) {
        let mut active = self.active.write().await;

        // A newer schedule supersedes any replacement still in flight.
        if let Some(previous) = active.remove(&location.id) {
            previous.cancel.cancel();
        }

        let status = Arc::new(RwLock::new(SyncStatus::Pending));
        let cancel = CancellationToken::new();

        let task_status = status.clone();
        let task_cancel = cancel.clone();
        let scheduler = self.scheduler.clone();
        let streams = self.streams.clone();
        let config = self.config.clone();
        let location_id = location.id;
        let retention_hours = location.stream_retention_hours;

        let handle = tokio::spawn(async move {
            let work = Self::replace_job_group(
                scheduler,
                streams,
                config,
                location_id,
                retention_hours,
                cameras,
                schedule,
                timezone,
                task_status.clone(),
            );

            tokio::select! {
                _ = task_cancel.cancelled() => {
                    info!("Job sync for location {} cancelled by a newer update", location_id);
                    *task_status.write().await = SyncStatus::Cancelled;
                }
                result = work => match result {
                    Ok(()) => {
                        info!("Job sync for location {} completed", location_id);
                        *task_status.write().await = SyncStatus::Completed;
                    }
                    Err(e) => {
                        error!("Job sync for location {} failed: {}", location_id, e);
                        *task_status.write().await = SyncStatus::Failed(e.to_string());
                    }
                },
            }
        });

        active.insert(
            location.id,
            Arc::new(ActiveSync {
                status,
                cancel,
                handle: Mutex::new(Some(handle)),
            }),
        );
    }

    /// The full replace: delete the old group and poll until the deletion
    /// has observably completed, recreate it, make sure every camera has
    /// its backing stream, then submit one recurring job per
    /// (classification, window, camera).
    #[allow(clippy::too_many_arguments)]
    async fn replace_job_group(
        scheduler: Arc<dyn ExternalScheduler>,
        streams: Arc<dyn StreamRegistry>,
        config: SchedulerConfig,
        location_id: Uuid,
        retention_hours: i32,
        cameras: Vec<Camera>,
        schedule: WeekSchedule,
        timezone: Tz,
        status: Arc<RwLock<SyncStatus>>,
    ) -> Result<()> {
        let group = location_id.to_string();

        *status.write().await = SyncStatus::DeletingGroup;

        if scheduler.group_exists(&group).await? {
            info!("Deleting job group for location {}", location_id);
            scheduler.delete_job_group(&group).await?;

            let mut delay = config.poll_initial_ms.max(1);
            let mut attempts = 0u32;
            while scheduler.group_exists(&group).await? {
                attempts += 1;
                if attempts >= config.poll_max_attempts {
                    return Err(Error::Scheduler(format!(
                        "Job group {} still exists after {} deletion polls",
                        group, attempts
                    ))
                    .into());
                }
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay = (delay * 2).min(config.poll_max_ms);
            }
        }

        scheduler.create_job_group(&group).await?;

        *status.write().await = SyncStatus::CreatingJobs;

        for camera in &cameras {
            let stream_name = camera.stream_name();
            if !streams.stream_exists(&stream_name).await? {
                info!(
                    "Stream {} missing; creating with {}h retention",
                    stream_name, retention_hours
                );
                streams.create_stream(&stream_name, retention_hours).await?;
            }
        }

        for class in DayClass::ALL {
            let windows = schedule.day(class).windows();
            if windows.is_empty() {
                continue;
            }

            let Some(dow) = cron_day_of_week(class, config.holiday_day_of_week) else {
                warn!(
                    "Location {} has {} holiday windows but scheduler.holiday_day_of_week \
                     is unset; no recording jobs created for them",
                    location_id,
                    windows.len()
                );
                continue;
            };

            for window in windows {
                for camera in &cameras {
                    let payload = json!({
                        "camera_id": camera.id,
                        "stream_name": camera.stream_name(),
                        "stream_url": camera.stream_url,
                        "execution_secs": window.duration().num_seconds(),
                    });

                    scheduler
                        .create_recurring_job(
                            &group,
                            &cron_expression(window, dow),
                            timezone.name(),
                            payload,
                        )
                        .await?;
                }
            }
        }

        Ok(())
    }
}

/// Scheduler cron convention: sun=1 .. sat=7. The holiday bucket has no
/// calendar day; it only maps when configured explicitly.
pub fn cron_day_of_week(class: DayClass, holiday_day_of_week: Option<u8>) -> Option<u8> {
    match class {
        DayClass::Sun => Some(1),
        DayClass::Mon => Some(2),
        DayClass::Tue => Some(3),
        DayClass::Wed => Some(4),
        DayClass::Thu => Some(5),
        DayClass::Fri => Some(6),
        DayClass::Sat => Some(7),
        DayClass::Pub => holiday_day_of_week,
    }
}

/// Cron trigger firing at the window's start on the given day.
pub fn cron_expression(window: &TimeWindow, day_of_week: u8) -> String {
    let start = window.start_time();
    format!(
        "cron({} {} ? * {} *)",
        start.minute(),
        start.hour(),
        day_of_week
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::TimeWindow;

    #[test]
    fn cron_days_cover_the_real_week() {
        assert_eq!(cron_day_of_week(DayClass::Sun, None), Some(1));
        assert_eq!(cron_day_of_week(DayClass::Mon, None), Some(2));
        assert_eq!(cron_day_of_week(DayClass::Sat, None), Some(7));
    }

    #[test]
    fn holiday_day_requires_configuration() {
        assert_eq!(cron_day_of_week(DayClass::Pub, None), None);
        assert_eq!(cron_day_of_week(DayClass::Pub, Some(5)), Some(5));
    }

    #[test]
    fn cron_expression_uses_window_start() {
        let window = TimeWindow::new("09:30:00", 8.0).unwrap();
        assert_eq!(cron_expression(&window, 2), "cron(30 9 ? * 2 *)");

        let midnight = TimeWindow::new("00:00:00", 1.0).unwrap();
        assert_eq!(cron_expression(&midnight, 1), "cron(0 0 ? * 1 *)");
    }

    mod replace {
        use super::*;
        use crate::testutil::{
            test_camera, test_location, MemoryStore, MockScheduler, MockStreamRegistry,
        };
        use serde_json::json;

        struct Fixture {
            store: Arc<MemoryStore>,
            scheduler: Arc<MockScheduler>,
            streams: Arc<MockStreamRegistry>,
            sync: RecordingScheduleSynchronizer,
        }

        fn fixture(scheduler: MockScheduler, config: SchedulerConfig) -> Fixture {
            let store = Arc::new(MemoryStore::new());
            let scheduler = Arc::new(scheduler);
            let streams = Arc::new(MockStreamRegistry::default());
            let sync = RecordingScheduleSynchronizer::new(
                store.clone(),
                scheduler.clone(),
                streams.clone(),
                config,
            );
            Fixture {
                store,
                scheduler,
                streams,
                sync,
            }
        }

        fn fast_poll() -> SchedulerConfig {
            SchedulerConfig {
                poll_initial_ms: 1,
                poll_max_ms: 2,
                poll_max_attempts: 5,
                ..SchedulerConfig::default()
            }
        }

        fn utc() -> Tz {
            "UTC".parse().unwrap()
        }

        #[tokio::test]
        async fn replace_deletes_polls_and_rebuilds() {
            let f = fixture(
                MockScheduler::with_exists_script([true, true, false]),
                fast_poll(),
            );
            let location = test_location(Uuid::new_v4(), UploadMethod::Rtsp);
            f.store.add_location(location.clone());
            let camera = test_camera(location.id, "door", 0.0);
            f.store.add_camera(camera.clone());

            let schedule = json!({"mon": [{"start_time": "09:30:00", "duration": 8.0}]});
            let status = f
                .sync
                .update(&location, schedule.clone(), utc())
                .await
                .unwrap();
            assert_eq!(status, SyncStatus::Pending);

            f.sync.wait(location.id).await;
            assert_eq!(f.sync.status(location.id).await, Some(SyncStatus::Completed));

            let group = location.id.to_string();
            let ops = f.scheduler.ops();
            assert_eq!(ops[0], format!("exists {} -> true", group));
            assert_eq!(ops[1], format!("delete_group {}", group));
            assert_eq!(ops[2], format!("exists {} -> true", group));
            assert_eq!(ops[3], format!("exists {} -> false", group));
            assert_eq!(ops[4], format!("create_group {}", group));
            assert_eq!(
                ops[5],
                format!("job {} cron(30 9 ? * 2 *) UTC {}", group, camera.id)
            );
            assert_eq!(ops.len(), 6);

            assert_eq!(
                f.streams.ops(),
                vec![format!("create_stream {}-stream 48h", camera.id)]
            );

            assert_eq!(
                f.store.location(location.id).unwrap().operational_hours,
                Some(schedule)
            );
        }

        #[tokio::test]
        async fn absent_group_skips_the_deletion_poll() {
            let f = fixture(MockScheduler::default(), fast_poll());
            let location = test_location(Uuid::new_v4(), UploadMethod::Rtsp);
            f.store.add_location(location.clone());
            f.store.add_camera(test_camera(location.id, "door", 0.0));

            f.sync
                .update(
                    &location,
                    json!({"mon": [{"start_time": "09:00:00", "duration": 1.0}]}),
                    utc(),
                )
                .await
                .unwrap();
            f.sync.wait(location.id).await;

            let group = location.id.to_string();
            let ops = f.scheduler.ops();
            assert_eq!(ops[0], format!("exists {} -> false", group));
            assert_eq!(ops[1], format!("create_group {}", group));
        }

        #[tokio::test]
        async fn stalled_deletion_fails_after_bounded_polls() {
            let f = fixture(
                MockScheduler::with_exists_script(std::iter::repeat(true).take(20)),
                fast_poll(),
            );
            let location = test_location(Uuid::new_v4(), UploadMethod::Rtsp);
            f.store.add_location(location.clone());
            f.store.add_camera(test_camera(location.id, "door", 0.0));

            f.sync
                .update(
                    &location,
                    json!({"mon": [{"start_time": "09:00:00", "duration": 1.0}]}),
                    utc(),
                )
                .await
                .unwrap();
            f.sync.wait(location.id).await;

            assert!(matches!(
                f.sync.status(location.id).await,
                Some(SyncStatus::Failed(_))
            ));
            let ops = f.scheduler.ops();
            assert!(!ops.iter().any(|op| op.starts_with("create_group")));
        }

        #[tokio::test]
        async fn non_rtsp_location_persists_without_scheduling() {
            let f = fixture(MockScheduler::default(), fast_poll());
            let location = test_location(Uuid::new_v4(), UploadMethod::UserUpload);
            f.store.add_location(location.clone());

            let schedule = json!({"mon": [{"start_time": "09:00:00", "duration": 1.0}]});
            let status = f
                .sync
                .update(&location, schedule.clone(), utc())
                .await
                .unwrap();

            assert_eq!(status, SyncStatus::NotRequired);
            assert!(f.scheduler.ops().is_empty());
            assert_eq!(
                f.store.location(location.id).unwrap().operational_hours,
                Some(schedule)
            );
        }

        #[tokio::test]
        async fn invalid_schedule_has_no_side_effects() {
            let f = fixture(MockScheduler::default(), fast_poll());
            let location = test_location(Uuid::new_v4(), UploadMethod::Rtsp);
            let original_hours = location.operational_hours.clone();
            f.store.add_location(location.clone());

            let overlapping = json!({"mon": [
                {"start_time": "09:00:00", "duration": 4.0},
                {"start_time": "11:00:00", "duration": 1.0},
            ]});
            let err = f.sync.update(&location, overlapping, utc()).await.unwrap_err();

            assert!(matches!(
                err.downcast_ref::<Error>(),
                Some(Error::InvalidSchedule(_))
            ));
            assert!(f.scheduler.ops().is_empty());
            assert_eq!(
                f.store.location(location.id).unwrap().operational_hours,
                original_hours
            );
        }

        #[tokio::test]
        async fn holiday_windows_need_a_configured_cron_day() {
            let schedule = json!({"pub": [{"start_time": "10:00:00", "duration": 2.0}]});

            let f = fixture(MockScheduler::default(), fast_poll());
            let location = test_location(Uuid::new_v4(), UploadMethod::Rtsp);
            f.store.add_location(location.clone());
            f.store.add_camera(test_camera(location.id, "door", 0.0));

            f.sync.update(&location, schedule.clone(), utc()).await.unwrap();
            f.sync.wait(location.id).await;
            assert!(!f.scheduler.ops().iter().any(|op| op.starts_with("job")));

            let f = fixture(
                MockScheduler::default(),
                SchedulerConfig {
                    holiday_day_of_week: Some(5),
                    ..fast_poll()
                },
            );
            let location = test_location(Uuid::new_v4(), UploadMethod::Rtsp);
            f.store.add_location(location.clone());
            f.store.add_camera(test_camera(location.id, "door", 0.0));

            f.sync.update(&location, schedule, utc()).await.unwrap();
            f.sync.wait(location.id).await;
            assert!(f
                .scheduler
                .ops()
                .iter()
                .any(|op| op.contains("cron(0 10 ? * 5 *)")));
        }
    }
}
