//! Database migrations
//!
//! SQL files under `migrations/` are embedded at build time and applied in
//! version order on startup.
//!
//! ```ignore
//! let service = MigrationService::new(pool.pg_pool());
//! service.run_all().await?;
//! ```

use sqlx::migrate::{MigrateError, Migrator};
use sqlx::postgres::PgPool;
use thiserror::Error;
use tracing::info;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Errors that can occur during migration operations
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Database migration error: {source}")]
    Migration {
        #[from]
        source: MigrateError,
    },
}

#[derive(Clone)]
pub struct MigrationService {
    pool: PgPool,
}

impl MigrationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Versions of the embedded migrations, oldest first
    pub fn versions() -> Vec<i64> {
        MIGRATOR.iter().map(|m| m.version).collect()
    }

    /// Apply every pending migration
    pub async fn run_all(&self) -> Result<(), MigrationError> {
        info!(
            migrations = MIGRATOR.iter().count(),
            "Applying database migrations"
        );
        MIGRATOR.run(&self.pool).await?;
        info!("Database schema up to date");
        Ok(())
    }
}
