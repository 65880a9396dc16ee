//! Database connection management using sqlx

use crate::config::PostgresConfig;
use crate::error::{PipelineError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub type DbPool = PgPool;

/// Open the relational store pool and probe it once. Any failure here is a
/// stage-startup failure.
pub async fn init_pool(config: &PostgresConfig) -> Result<PgPool> {
    let unavailable = |e: sqlx::Error| PipelineError::StoreUnavailable {
        store: "relational",
        reason: e.to_string(),
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.url())
        .await
        .map_err(unavailable)?;

    // Test the connection
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(unavailable)?;

    Ok(pool)
}
