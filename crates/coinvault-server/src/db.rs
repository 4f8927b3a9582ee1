//! Database connection and pool management.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Upper bound on waiting for a free connection. Completions hold theirs for a whole
/// transaction.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Creates a database connection pool.
///
/// # Arguments
/// * `database_url` - PostgreSQL connection string
/// * `max_connections` - pool size (`DATABASE_MAX_CONNECTIONS`)
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await
}

/// Applies the purchase-engine schema under `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
