//! Columnar Ingestor - appends monthly trip files into the analytical store,
//! exactly once per file.

use crate::db::analytical::{count_rows, insert_rows, AnalyticalStore};
use crate::error::{PipelineError, Result};
use crate::ingestion::parquet::{TripFile, DEFAULT_SLICE_ROWS};
use crate::ingestion::{FileReport, FileStatus, ImportLedger, IngestionSummary};
use crate::schema::{trip_columns, TRIP_TABLE};
use chrono::Utc;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

pub const DEFAULT_EXTENSION: &str = "parquet";

pub struct ColumnarIngestor<'a> {
    store: &'a AnalyticalStore,
    extension: String,
    slice_rows: usize,
}

/// Outcome of ingesting a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Imported { rows: u64 },
    Skipped,
}

impl<'a> ColumnarIngestor<'a> {
    pub fn new(store: &'a AnalyticalStore) -> Self {
        Self {
            store,
            extension: DEFAULT_EXTENSION.to_string(),
            slice_rows: DEFAULT_SLICE_ROWS,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    /// Number of rows decoded and inserted per step within a file.
    pub fn with_slice_rows(mut self, slice_rows: usize) -> Self {
        self.slice_rows = slice_rows.max(1);
        self
    }

    /// Identifier recorded in the import log: the file name.
    pub fn file_id(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }

    pub fn is_imported(&self, path: &Path) -> Result<bool> {
        let file_id = Self::file_id(path);
        self.store
            .with_conn(|db| ImportLedger::new(db).is_imported(&file_id))
    }

    /// Ingest one file. Already-logged files are skipped without being read.
    ///
    /// Rows are decoded and inserted slice by slice, but all slices and the
    /// log entry land in one transaction: a failure anywhere leaves nothing
    /// behind, so a retry re-reads the whole file.
    pub fn ingest_file(&self, path: &Path) -> Result<FileOutcome> {
        let file_id = Self::file_id(path);

        if self.is_imported(path)? {
            info!(file = %file_id, "Already imported, skipping");
            return Ok(FileOutcome::Skipped);
        }

        if !is_monthly_file_name(&file_id) {
            warn!(file = %file_id, "File name does not follow the yellow_tripdata_YYYY-MM convention");
        }

        let columns = trip_columns();
        let source = TripFile::open(path).map_err(|e| PipelineError::ingestion(&file_id, e))?;

        let rows_imported = self
            .store
            .with_transaction(|tx| {
                let before = count_rows(tx, TRIP_TABLE)?;
                let mut offset = 0;
                while offset < source.height() {
                    let rows = source.rows(&columns, offset, self.slice_rows)?;
                    insert_rows(tx, TRIP_TABLE, &columns, &rows)?;
                    offset += rows.len();
                }
                let after = count_rows(tx, TRIP_TABLE)?;
                let rows_imported = after - before;

                ImportLedger::new(tx).record_import(&file_id, rows_imported, Utc::now().naive_utc())?;
                Ok(rows_imported)
            })
            .map_err(|e| match e {
                PipelineError::DuplicateLedgerEntry(_) => e,
                other => PipelineError::ingestion(&file_id, other),
            })?;

        info!(file = %file_id, rows = rows_imported, "Imported");
        Ok(FileOutcome::Imported { rows: rows_imported })
    }

    /// Source files in `dir` with the configured extension, in lexicographic
    /// (and therefore chronological) order.
    pub fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let matches = path.is_file()
                && path
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
                    .unwrap_or(false);
            if matches {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Ingest every source file in `dir`. One file failing does not stop the
    /// others; only an unreadable directory is an error.
    pub fn ingest_directory(&self, dir: &Path) -> Result<IngestionSummary> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("ingest", run_id = %run_id, dir = %dir.display());
        let _guard = span.enter();

        let files = self.list_files(dir)?;
        info!(files = files.len(), "Found source files");

        let mut reports = Vec::with_capacity(files.len());
        for path in files {
            let file_id = Self::file_id(&path);
            let status = match self.ingest_file(&path) {
                Ok(FileOutcome::Imported { rows }) => FileStatus::Imported { rows },
                Ok(FileOutcome::Skipped) => FileStatus::Skipped,
                Err(e) => {
                    error!(file = %file_id, error = %e, "Ingestion failed");
                    FileStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };
            reports.push(FileReport { file_id, status });
        }

        let summary = IngestionSummary { run_id, files: reports };
        info!(
            imported = summary.imported_count(),
            skipped = summary.skipped_count(),
            failed = summary.failed_count(),
            rows = summary.rows_imported(),
            "Ingestion finished"
        );
        Ok(summary)
    }
}

fn is_monthly_file_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^yellow_tripdata_\d{4}-(0[1-9]|1[0-2])\.[A-Za-z]+$")
                .expect("static regex")
        })
        .is_match(name)
}
