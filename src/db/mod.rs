use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Pool size for the API server. Binaries that run one batch at a time use less.
pub const SERVER_POOL_SIZE: u32 = 10;
pub const CLI_POOL_SIZE: u32 = 2;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

pub mod provider_queries;
pub mod queries;
pub mod target_queries;
