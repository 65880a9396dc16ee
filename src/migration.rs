//! Relational Migrator - copies every analytical-store table into the
//! relational store.
//!
//! Each run is a full resync: target tables are created if missing, then
//! truncated and refilled batch by batch. A table is the unit of recovery;
//! a crash mid-table is repaired by re-running, which truncates again.

use crate::db::analytical::AnalyticalStore;
use crate::db::relational::RelationalStore;
use crate::error::{PipelineError, Result};
use crate::schema::{has_surrogate_key, relational_columns, SourceType};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;

pub struct RelationalMigrator<'a, R: RelationalStore + ?Sized> {
    source: &'a AnalyticalStore,
    target: &'a R,
    batch_size: usize,
}

/// Successful copy of one table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableMigration {
    pub table: String,
    pub rows_migrated: u64,
    pub batches: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    Succeeded { rows_migrated: u64, batches: usize },
    Failed { error: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableOutcome {
    pub table: String,
    #[serde(flatten)]
    pub status: TableStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MigrationReport {
    pub run_id: String,
    pub tables: Vec<TableOutcome>,
}

impl MigrationReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &TableOutcome> {
        self.tables
            .iter()
            .filter(|t| matches!(t.status, TableStatus::Succeeded { .. }))
    }

    pub fn failed(&self) -> impl Iterator<Item = &TableOutcome> {
        self.tables
            .iter()
            .filter(|t| matches!(t.status, TableStatus::Failed { .. }))
    }

    pub fn total_rows(&self) -> u64 {
        self.tables
            .iter()
            .map(|t| match t.status {
                TableStatus::Succeeded { rows_migrated, .. } => rows_migrated,
                TableStatus::Failed { .. } => 0,
            })
            .sum()
    }

    pub fn status_of(&self, table: &str) -> Option<&TableStatus> {
        self.tables.iter().find(|t| t.table == table).map(|t| &t.status)
    }
}

impl<'a, R: RelationalStore + ?Sized> RelationalMigrator<'a, R> {
    pub fn new(source: &'a AnalyticalStore, target: &'a R) -> Self {
        Self {
            source,
            target,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Migrate every table. Only a failure to list the source tables is
    /// returned as an error; per-table failures land in the report.
    pub async fn migrate_all(&self) -> Result<MigrationReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("migrate", run_id = %run_id);

        async {
            let tables = self.source.list_tables()?;
            info!(tables = ?tables, "Tables found in the analytical store");

            let mut outcomes = Vec::with_capacity(tables.len());
            for table in tables {
                let status = match self.migrate_table(&table).await {
                    Ok(done) => TableStatus::Succeeded {
                        rows_migrated: done.rows_migrated,
                        batches: done.batches,
                    },
                    Err(e) => {
                        error!(table = %table, error = %e, "Table migration failed");
                        TableStatus::Failed {
                            error: e.to_string(),
                        }
                    }
                };
                outcomes.push(TableOutcome { table, status });
            }

            let report = MigrationReport {
                run_id: run_id.clone(),
                tables: outcomes,
            };
            info!(
                succeeded = report.succeeded().count(),
                failed = report.failed().count(),
                rows = report.total_rows(),
                "Migration finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Create, truncate and refill one target table.
    pub async fn migrate_table(&self, table: &str) -> Result<TableMigration> {
        self.copy_table(table).await.map_err(|e| match e {
            PipelineError::Migration { .. } => e,
            other => PipelineError::migration(table, other),
        })
    }

    async fn copy_table(&self, table: &str) -> Result<TableMigration> {
        let source_columns = self.source.describe(table)?;
        if source_columns.is_empty() {
            return Err(PipelineError::migration(table, "table has no columns"));
        }

        for column in source_columns.iter().filter(|c| c.source_type == SourceType::Other) {
            warn!(table, column = %column.name, "Unrecognised column type, migrating as text");
        }
        let target_columns = relational_columns(&source_columns);

        info!(table, "Creating target table if missing");
        self.target
            .create_table(table, &target_columns, has_surrogate_key(table))
            .await?;

        info!(table, "Truncating target table");
        self.target.truncate(table).await?;

        let mut after = 0i64;
        let mut rows_migrated = 0u64;
        let mut batches = 0usize;
        loop {
            let (rows, last) = self
                .source
                .read_batch(table, &source_columns, after, self.batch_size)?;
            let Some(last) = last else { break };

            rows_migrated += self.target.insert_batch(table, &target_columns, &rows).await?;
            batches += 1;
            after = last;
            info!(table, batch = batches, rows = rows_migrated, "Batch committed");

            if rows.len() < self.batch_size {
                break;
            }
        }

        let target_rows = self.target.count_rows(table).await?;
        if target_rows != rows_migrated {
            return Err(PipelineError::migration(
                table,
                format!(
                    "row count mismatch after copy: {} written, {} in target",
                    rows_migrated, target_rows
                ),
            ));
        }

        if rows_migrated == 0 {
            info!(table, "Source table empty, nothing to insert");
        } else {
            info!(table, rows = rows_migrated, batches, "Table migrated");
        }

        Ok(TableMigration {
            table: table.to_string(),
            rows_migrated,
            batches,
        })
    }
}
