//! Ingestion Module - monthly columnar files into the analytical store
//!
//! - Parquet decoding onto the canonical trip schema
//! - Import log bookkeeping (idempotency per file)
//! - Directory driver with per-file outcomes

pub mod columnar;
pub mod ledger;
pub mod parquet;

pub use columnar::{ColumnarIngestor, FileOutcome};
pub use ledger::ImportLedger;

use serde::{Deserialize, Serialize};

/// What happened to one file during a directory run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Imported { rows: u64 },
    Skipped,
    Failed { error: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileReport {
    pub file_id: String,
    #[serde(flatten)]
    pub status: FileStatus,
}

/// Result of ingesting a directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub run_id: String,
    pub files: Vec<FileReport>,
}

impl IngestionSummary {
    /// Files newly imported in this run. Skips are not counted.
    pub fn imported_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Imported { .. }))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Skipped)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Failed { .. }))
            .count()
    }

    pub fn rows_imported(&self) -> u64 {
        self.files
            .iter()
            .map(|f| match f.status {
                FileStatus::Imported { rows } => rows,
                _ => 0,
            })
            .sum()
    }

    pub fn status_of(&self, file_id: &str) -> Option<&FileStatus> {
        self.files
            .iter()
            .find(|f| f.file_id == file_id)
            .map(|f| &f.status)
    }
}
