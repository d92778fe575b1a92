//! Database migration utilities

use crate::error::{DatabaseError, DatabaseResult};
use repoctx_config::DatabaseConfig;
use sqlx::PgPool;
use std::time::Duration;

/// Run all pending database migrations
///
/// # Errors
/// Returns `DatabaseError::MigrationFailed` if any migration fails to apply
pub async fn run_migrations(pool: &PgPool) -> DatabaseResult<()> {
    tracing::info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|source| DatabaseError::MigrationFailed {
            message: source.to_string(),
            source,
        })?;

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Create the connection pool, retrying while the database comes up
///
/// Runs migrations as well when `config.auto_migrate` is set.
///
/// # Errors
/// Returns the last connection error after `max_attempts` tries, or the
/// migration error
pub async fn connect_with_retry(
    config: &DatabaseConfig,
    max_attempts: u32,
    delay: Duration,
) -> anyhow::Result<PgPool> {
    let mut attempt = 0u32;

    let pool = loop {
        attempt = attempt.saturating_add(1);
        match config.create_pool().await {
            Ok(pool) => break pool,
            Err(e) if attempt < max_attempts => {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %e,
                    target = %config.safe_connection_string(),
                    "Database not ready, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e.into()),
        }
    };

    if config.auto_migrate {
        run_migrations(&pool).await?;
    }

    Ok(pool)
}
