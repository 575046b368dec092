use crate::config::ApiConfig;
use crate::db::repositories::LocationStore;
use crate::error::Error;
use crate::ingest::{AuthContext, EntryIngestionPipeline, EntryRequest, IngestOutcome, VideoDispatch};
use crate::lifecycle::{EntryStatus, LifecycleService, VideoStatus};
use crate::schedule::WeekSchedule;
use crate::sync::{RecordingScheduleSynchronizer, SyncStatus};
use anyhow::Result;
use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<EntryIngestionPipeline>,
    pub lifecycle: Arc<LifecycleService>,
    pub synchronizer: Arc<RecordingScheduleSynchronizer>,
    pub locations: Arc<dyn LocationStore>,
    pub default_timezone: Tz,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(_)
            | Error::InvalidSchedule(_)
            | Error::UnsupportedUploadMethod(_)
            | Error::Config(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::BAD_REQUEST.as_u16(),
            },
            Error::NotFound(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::NOT_FOUND.as_u16(),
            },
            Error::Conflict(_) | Error::State(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::CONFLICT.as_u16(),
            },
            _ => ApiError {
                message: err.to_string(),
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            },
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return err.clone().into();
        }

        ApiError {
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError {
        message: message.into(),
        status: StatusCode::BAD_REQUEST.as_u16(),
    }
}

/// Tenant scope and timezone come from the upstream gateway as headers;
/// this service trusts them and never authenticates itself.
#[async_trait::async_trait]
impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let tenant_id = parts
            .headers
            .get("x-tenant-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| bad_request("Missing x-tenant-id header"))?;
        let tenant_id = Uuid::parse_str(tenant_id)
            .map_err(|_| bad_request(format!("Invalid tenant id {:?}", tenant_id)))?;

        let timezone = match parts.headers.get("x-timezone") {
            None => state.default_timezone,
            Some(value) => {
                let name = value
                    .to_str()
                    .map_err(|_| bad_request("Unreadable x-timezone header"))?;
                name.parse::<Tz>()
                    .map_err(|_| bad_request(format!("Unknown timezone {:?}", name)))?
            }
        };

        Ok(AuthContext {
            tenant_id,
            timezone,
        })
    }
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &ApiConfig, state: AppState) -> Self {
        Self {
            config: config.clone(),
            state,
        }
    }

    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/api/entry", post(submit_entry))
            .route("/api/upload/confirm/:video_id", post(confirm_upload))
            .route("/api/videos/:id/exists", get(video_exists))
            .route("/api/videos/:id/status/:status", post(set_video_status))
            .route("/api/entries/:id/status/:status", post(set_entry_status))
            .route("/api/entries/:id", delete(delete_entry))
            .route(
                "/api/schedule/:location_id",
                get(get_schedule).post(update_schedule),
            )
            .route("/api/schedule/:location_id/sync", get(sync_status))
            .route("/api/schedule/validate", post(validate_schedule))
            .with_state(state)
    }

    pub async fn run(&self) -> Result<()> {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .max_age(Duration::from_secs(3600));

        let app = Self::router(self.state.clone()).layer(cors);

        let addr = self.config.address.clone() + ":" + &self.config.port.to_string();
        let addr: SocketAddr = addr.parse()?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;
        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service())
            .await?;

        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub videos: Vec<VideoDispatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

async fn submit_entry(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<EntryRequest>,
) -> ApiResult<(StatusCode, Json<EntryResponse>)> {
    let outcome = state.pipeline.ingest(request, &auth).await?;

    let (status, response) = match outcome {
        IngestOutcome::NotOperational { location_name } => (
            StatusCode::OK,
            EntryResponse {
                result: "NOT_OPERATIONAL",
                entry_id: None,
                videos: Vec::new(),
                message: Some(format!("{} is outside its operational hours", location_name)),
            },
        ),
        IngestOutcome::Duplicate => (
            StatusCode::OK,
            EntryResponse {
                result: "DUPLICATE",
                entry_id: None,
                videos: Vec::new(),
                message: None,
            },
        ),
        IngestOutcome::Accepted { entry_id, videos } => (
            StatusCode::CREATED,
            EntryResponse {
                result: "ACCEPTED",
                entry_id: Some(entry_id),
                videos,
                message: None,
            },
        ),
    };

    Ok((status, Json(response)))
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub video_id: Uuid,
    pub video_status: &'static str,
    pub entry_advanced: bool,
}

async fn confirm_upload(
    State(state): State<AppState>,
    Path(video_id): Path<Uuid>,
) -> ApiResult<Json<ConfirmResponse>> {
    let confirmed = state.lifecycle.confirm_upload(video_id).await?;

    Ok(Json(ConfirmResponse {
        video_id,
        video_status: confirmed.video.status.name(),
        entry_advanced: confirmed.entry_advanced,
    }))
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

async fn video_exists(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExistsResponse>> {
    let exists = state.lifecycle.video_exists(id).await?;
    Ok(Json(ExistsResponse { exists }))
}

#[derive(Debug, Serialize)]
pub struct StatusChangeResponse {
    pub id: Uuid,
    pub previous: &'static str,
    pub current: &'static str,
}

async fn set_video_status(
    State(state): State<AppState>,
    Path((id, status)): Path<(Uuid, String)>,
) -> ApiResult<Json<StatusChangeResponse>> {
    let status = VideoStatus::from_name(&status)
        .ok_or_else(|| bad_request(format!("Unknown video status {:?}", status)))?;
    let previous = state.lifecycle.set_video_status(id, status).await?;

    Ok(Json(StatusChangeResponse {
        id,
        previous: previous.name(),
        current: status.name(),
    }))
}

async fn set_entry_status(
    State(state): State<AppState>,
    Path((id, status)): Path<(Uuid, String)>,
) -> ApiResult<Json<StatusChangeResponse>> {
    let status = EntryStatus::from_name(&status)
        .ok_or_else(|| bad_request(format!("Unknown entry status {:?}", status)))?;
    let previous = state.lifecycle.set_entry_status(id, status).await?;

    Ok(Json(StatusChangeResponse {
        id,
        previous: previous.name(),
        current: status.name(),
    }))
}

async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.lifecycle.delete_entry(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(location_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let location = state
        .locations
        .get_for_tenant(location_id, auth.tenant_id)
        .await?
        .ok_or(Error::NotFound(format!("Location {} not found", location_id)))?;

    // Locations that never had hours set read back as an empty week.
    let schedule = match &location.operational_hours {
        Some(hours) => WeekSchedule::from_value(hours)?,
        None => WeekSchedule::from_value(&Value::Object(Default::default()))?,
    };

    Ok(Json(schedule.to_value()))
}

#[derive(Debug, Serialize)]
pub struct ScheduleUpdateResponse {
    pub location_id: Uuid,
    pub sync: SyncStatus,
}

async fn update_schedule(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(location_id): Path<Uuid>,
    Json(schedule): Json<Value>,
) -> ApiResult<Json<ScheduleUpdateResponse>> {
    let location = state
        .locations
        .get_for_tenant(location_id, auth.tenant_id)
        .await?
        .ok_or(Error::NotFound(format!("Location {} not found", location_id)))?;

    let sync = state
        .synchronizer
        .update(&location, schedule, auth.timezone)
        .await?;

    Ok(Json(ScheduleUpdateResponse { location_id, sync }))
}

#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    pub location_id: Uuid,
    pub sync: SyncStatus,
}

async fn sync_status(
    State(state): State<AppState>,
    Path(location_id): Path<Uuid>,
) -> ApiResult<Json<SyncStatusResponse>> {
    let sync = state
        .synchronizer
        .status(location_id)
        .await
        .ok_or(Error::NotFound(format!(
            "No schedule sync recorded for location {}",
            location_id
        )))?;

    Ok(Json(SyncStatusResponse { location_id, sync }))
}

#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    /// Whether the body parsed as a weekly schedule at all.
    pub input_valid: bool,
    /// Whether the parsed schedule has no overlapping windows.
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

async fn validate_schedule(Json(schedule): Json<Value>) -> Json<ValidationResponse> {
    let response = match WeekSchedule::from_value(&schedule) {
        Err(e) => ValidationResponse {
            input_valid: false,
            valid: false,
            reason: Some(e.to_string()),
        },
        Ok(parsed) if !parsed.validate() => ValidationResponse {
            input_valid: true,
            valid: false,
            reason: Some("Schedule windows overlap or touch".to_string()),
        },
        Ok(_) => ValidationResponse {
            input_valid: true,
            valid: true,
            reason: None,
        },
    };

    Json(response)
}
