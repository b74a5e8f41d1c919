//! PostgreSQL persistence for monitoring rules and alerts.
//!
//! Row models live in [`models`]; query operations in [`repositories`].
//! Every repository method is generic over [`sqlx::PgExecutor`] so the same
//! call works against the pool or inside an open transaction.

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify the pool can reach the server.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

/// Apply all pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}

/// Wrap a lookup conversion failure as a column decode error.
pub(crate) fn decode_error(e: fleet_core::error::CoreError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}
