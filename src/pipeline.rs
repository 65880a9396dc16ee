//! Stage entry points.
//!
//! Every stage opens its own store handles from the config, runs, and drops
//! them again; nothing is shared between runs. A store that cannot be opened
//! aborts the stage with `StoreUnavailable`.

use crate::cleaning::{Cleaner, CleaningTotals};
use crate::config::PipelineConfig;
use crate::db::analytical::{AnalyticalStore, StoreStatistics};
use crate::db::connection::init_pool;
use crate::db::document::MongoDocumentStore;
use crate::db::relational::PgRelationalStore;
use crate::error::{PipelineError, Result};
use crate::ingestion::{ColumnarIngestor, IngestionSummary};
use crate::migration::{MigrationReport, RelationalMigrator};
use serde::Serialize;
use tracing::info;

/// Stage 1: raw files into the analytical store.
pub fn run_ingestion(config: &PipelineConfig) -> Result<IngestionSummary> {
    let store = AnalyticalStore::open(&config.analytical_db_path)?;
    let summary = ColumnarIngestor::new(&store)
        .with_extension(config.source_extension.clone())
        .ingest_directory(&config.data_dir)?;
    store.log_statistics()?;
    Ok(summary)
}

/// Stage 1 on the blocking pool, for callers running inside the async
/// runtime. SQLite writes and Parquet decoding never run on a worker thread.
pub async fn run_ingestion_blocking(config: &PipelineConfig) -> Result<IngestionSummary> {
    let owned = config.clone();
    tokio::task::spawn_blocking(move || run_ingestion(&owned))
        .await
        .map_err(|e| PipelineError::ingestion(config.data_dir.display().to_string(), e))?
}

/// Stage 2: analytical store into PostgreSQL.
pub async fn run_migration(config: &PipelineConfig) -> Result<MigrationReport> {
    let source = AnalyticalStore::open(&config.analytical_db_path)?;
    let pool = init_pool(&config.postgres).await?;
    info!(host = %config.postgres.host, database = %config.postgres.database, "Connected to relational store");

    let target = PgRelationalStore::new(pool);
    let report = RelationalMigrator::new(&source, &target)
        .with_batch_size(config.migration_batch_size)
        .migrate_all()
        .await;
    target.pool().close().await;
    report
}

/// Stage 3: PostgreSQL trips into the MongoDB collection.
pub async fn run_cleaning(config: &PipelineConfig) -> Result<CleaningTotals> {
    let pool = init_pool(&config.postgres).await?;
    let source = PgRelationalStore::new(pool);
    let target = MongoDocumentStore::connect(
        &config.mongo.uri(),
        &config.mongo.database,
        &config.mongo.collection,
    )
    .await?;
    info!(collection = target.collection_name(), "Connected to document store");

    let totals = Cleaner::new(&source, &target)
        .with_chunk_size(config.cleaning_chunk_size)
        .run()
        .await;

    source.pool().close().await;
    target.shutdown().await;
    totals
}

pub fn store_statistics(config: &PipelineConfig) -> Result<StoreStatistics> {
    AnalyticalStore::open(&config.analytical_db_path)?.statistics()
}

/// Outcome of running all three stages in order.
#[derive(Debug, Serialize)]
pub struct PipelineRun {
    pub ingestion: IngestionSummary,
    pub migration: MigrationReport,
    pub cleaning: CleaningTotals,
}

/// Run every stage in sequence. A stage-level error stops the run; unit
/// failures inside a stage are left in that stage's summary.
pub async fn run_all(config: &PipelineConfig) -> Result<PipelineRun> {
    let ingestion = run_ingestion_blocking(config).await?;
    let migration = run_migration(config).await?;
    let cleaning = run_cleaning(config).await?;
    Ok(PipelineRun {
        ingestion,
        migration,
        cleaning,
    })
}
