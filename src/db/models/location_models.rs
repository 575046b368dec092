use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// How captures are acquired for a location's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadMethod {
    UserUpload,
    Rtsp,
    Custom,
}

impl UploadMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadMethod::UserUpload => "UserUpload",
            UploadMethod::Rtsp => "RTSP",
            UploadMethod::Custom => "Custom",
        }
    }

    pub fn from_str(s: &str) -> Option<UploadMethod> {
        match s {
            "UserUpload" => Some(UploadMethod::UserUpload),
            "RTSP" => Some(UploadMethod::Rtsp),
            "Custom" => Some(UploadMethod::Custom),
            _ => None,
        }
    }
}

/// Location model: the unit of schedule ownership and upload-strategy
/// selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub upload_method: UploadMethod,
    /// Serialized WeekSchedule; absent means never operational.
    pub operational_hours: Option<serde_json::Value>,
    pub stream_retention_hours: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database row for a location; upload_method travels as its wire string.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LocationDb {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub upload_method: String,
    pub operational_hours: Option<serde_json::Value>,
    pub stream_retention_hours: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<LocationDb> for Location {
    type Error = Error;

    fn try_from(db: LocationDb) -> Result<Self, Error> {
        let upload_method = UploadMethod::from_str(&db.upload_method).ok_or_else(|| {
            Error::Database(format!(
                "Unknown upload method {:?} on location {}",
                db.upload_method, db.id
            ))
        })?;

        Ok(Self {
            id: db.id,
            tenant_id: db.tenant_id,
            name: db.name,
            upload_method,
            operational_hours: db.operational_hours,
            stream_retention_hours: db.stream_retention_hours,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

impl From<Location> for LocationDb {
    fn from(location: Location) -> Self {
        Self {
            id: location.id,
            tenant_id: location.tenant_id,
            name: location.name,
            upload_method: location.upload_method.as_str().to_string(),
            operational_hours: location.operational_hours,
            stream_retention_hours: location.stream_retention_hours,
            created_at: location.created_at,
            updated_at: location.updated_at,
        }
    }
}

/// Camera model. Geometry fields are passed through untouched to the
/// downstream processing jobs.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Camera {
    pub id: Uuid,
    pub location_id: Uuid,
    pub name: String,
    pub display_order: Option<i32>,
    /// Seconds between the entry instant and this camera's capture start.
    pub offset_amount: f64,
    pub stream_url: Option<String>,
    pub threshold: Option<f64>,
    pub x1: Option<f64>,
    pub y1: Option<f64>,
    pub x2: Option<f64>,
    pub y2: Option<f64>,
    pub x3: Option<f64>,
    pub y3: Option<f64>,
    pub x4: Option<f64>,
    pub y4: Option<f64>,
    pub nx: Option<f64>,
    pub ny: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Camera {
    /// Name of the camera's backing stream in the registry.
    pub fn stream_name(&self) -> String {
        format!("{}-stream", self.id)
    }

    pub fn geometry(&self) -> serde_json::Value {
        json!({
            "threshold": self.threshold,
            "x1": self.x1, "y1": self.y1,
            "x2": self.x2, "y2": self.y2,
            "x3": self.x3, "y3": self.y3,
            "x4": self.x4, "y4": self.y4,
            "nx": self.nx, "ny": self.ny,
        })
    }
}
