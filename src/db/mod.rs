//! Database module

pub mod memory;
pub mod queries;
pub mod store;

pub use memory::MemoryTeacherStore;
pub use store::{BatchError, PgTeacherStore, TeacherStore};

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Create a database connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}

/// Run database migrations.
///
/// `_sqlx_migrations` is first brought in line with the embedded list:
/// records of versions that are no longer shipped are dropped and stored
/// checksums are refreshed (line-ending differences change them).
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let shipped: Vec<i64> = MIGRATOR
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .map(|m| m.version)
        .collect();
    let applied = applied_versions(pool).await?;
    info!(?shipped, ?applied, "Running database migrations");

    for version in applied.iter().filter(|v| !shipped.contains(v)) {
        warn!(version, "Dropping record of a migration that is no longer shipped");
        sqlx::query("DELETE FROM _sqlx_migrations WHERE version = $1")
            .bind(version)
            .execute(pool)
            .await?;
    }

    sync_checksums(pool).await?;
    MIGRATOR.run(pool).await.context("Failed to run migrations")?;

    info!("Database migrations complete");
    Ok(())
}

async fn applied_versions(pool: &PgPool) -> Result<Vec<i64>> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = '_sqlx_migrations')",
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(vec![]);
    }

    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM _sqlx_migrations ORDER BY version")
        .fetch_all(pool)
        .await?;

    Ok(versions)
}

async fn sync_checksums(pool: &PgPool) -> Result<()> {
    for migration in MIGRATOR.iter().filter(|m| !m.migration_type.is_down_migration()) {
        let stored: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT checksum FROM _sqlx_migrations WHERE version = $1")
                .bind(migration.version)
                .fetch_optional(pool)
                .await?;

        let current: &[u8] = &migration.checksum;
        if matches!(&stored, Some(checksum) if checksum.as_slice() != current) {
            warn!(
                version = migration.version,
                description = %migration.description,
                "Migration checksum changed, updating stored value"
            );
            sqlx::query("UPDATE _sqlx_migrations SET checksum = $1 WHERE version = $2")
                .bind(current)
                .bind(migration.version)
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}
