pub mod cleaning;
pub mod config;
pub mod db;
pub mod error;
pub mod ingestion;
pub mod migration;
pub mod model;
pub mod pipeline;
pub mod schema;

pub use cleaning::{clean_batch, Cleaner, CleaningStats, CleaningTotals};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use ingestion::{ColumnarIngestor, FileStatus, ImportLedger, IngestionSummary};
pub use migration::{MigrationReport, RelationalMigrator, TableStatus};
pub use model::{ImportLogEntry, TripRecord, Value};
