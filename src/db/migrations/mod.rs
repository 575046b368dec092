use anyhow::{Context, Result};
use sqlx::{Executor, PgPool};
use tracing::info;

/// Migrations ship embedded in the binary and run in order. Every
/// statement is idempotent (IF NOT EXISTS), so re-running on startup is
/// safe.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_create_locations",
        include_str!("sql/001_create_locations.sql"),
    ),
    (
        "002_create_cameras",
        include_str!("sql/002_create_cameras.sql"),
    ),
    (
        "003_create_entries",
        include_str!("sql/003_create_entries.sql"),
    ),
    ("004_create_videos", include_str!("sql/004_create_videos.sql")),
];

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        pool.execute(*sql)
            .await
            .context(format!("Failed to apply migration {}", name))?;
        info!("Applied migration: {}", name);
    }

    Ok(())
}
