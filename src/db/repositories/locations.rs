use crate::db::models::{Camera, Location, LocationDb};
use crate::db::repositories::LocationStore;
use crate::error::Error;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Locations repository for handling location and camera reads
#[derive(Clone)]
pub struct LocationsRepository {
    pool: Arc<PgPool>,
}

impl LocationsRepository {
    /// Create a new locations repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocationStore for LocationsRepository {
    /// Get a location by ID, scoped to the owning tenant
    async fn get_for_tenant(&self, id: Uuid, tenant_id: Uuid) -> Result<Option<Location>> {
        let result = sqlx::query_as::<_, LocationDb>(
            r#"
            SELECT id, tenant_id, name, upload_method, operational_hours,
                   stream_retention_hours, created_at, updated_at
            FROM locations
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get location by ID: {}", e)))?;

        result.map(Location::try_from).transpose().map_err(Into::into)
    }

    /// Get all cameras attached to a location, in display order
    async fn cameras(&self, location_id: Uuid) -> Result<Vec<Camera>> {
        let cameras = sqlx::query_as::<_, Camera>(
            r#"
            SELECT id, location_id, name, display_order, offset_amount, stream_url,
                   threshold, x1, y1, x2, y2, x3, y3, x4, y4, nx, ny,
                   created_at, updated_at
            FROM cameras
            WHERE location_id = $1
            ORDER BY display_order NULLS LAST, name
            "#,
        )
        .bind(location_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get cameras for location: {}", e)))?;

        Ok(cameras)
    }

    /// Replace a location's serialized weekly schedule
    async fn update_operational_hours(
        &self,
        id: Uuid,
        hours: &serde_json::Value,
    ) -> Result<()> {
        info!("Updating operational hours for location {}", id);

        let result = sqlx::query(
            r#"
            UPDATE locations
            SET operational_hours = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(hours)
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update operational hours: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Location {} not found", id)).into());
        }

        Ok(())
    }
}
