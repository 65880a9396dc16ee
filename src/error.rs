use crate::cleaning::CleaningTotals;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot open {store} store: {reason}")]
    StoreUnavailable { store: &'static str, reason: String },

    #[error("Analytical store error: {0}")]
    Analytical(#[from] rusqlite::Error),

    #[error("Relational store error: {0}")]
    Relational(#[from] sqlx::Error),

    #[error("Document store error: {0}")]
    Document(#[from] mongodb::error::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("Ingestion of {file} failed: {reason}")]
    Ingestion { file: String, reason: String },

    #[error("Source file lacks required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Import of {0} is already recorded in the import log")]
    DuplicateLedgerEntry(String),

    #[error("Migration of table {table} failed: {reason}")]
    Migration { table: String, reason: String },

    #[error("Cleaning failed on batch {batch}: {reason}")]
    Cleaning {
        batch: usize,
        reason: String,
        totals: CleaningTotals,
    },

    #[error("Cannot convert column {column}: {reason}")]
    Coercion { column: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn ingestion(file: impl Into<String>, err: impl std::fmt::Display) -> Self {
        PipelineError::Ingestion {
            file: file.into(),
            reason: err.to_string(),
        }
    }

    pub fn migration(table: impl Into<String>, err: impl std::fmt::Display) -> Self {
        PipelineError::Migration {
            table: table.into(),
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
