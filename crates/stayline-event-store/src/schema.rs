//! Database schema management.

use sqlx::PgPool;
use sqlx::migrate::{MigrateError, Migrator};

/// Embedded workspace migrations: event log, checkpoint table and its stored
/// function, projection documents and dead letters.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Applies any pending migrations. Safe to call on every startup.
///
/// # Errors
///
/// Returns `MigrateError` if a migration fails or the recorded history does
/// not match the embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}
