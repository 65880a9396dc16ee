//! Import Ledger - one entry per ingested source file
//!
//! An entry means the file's rows are already in the analytical store. It is
//! the only idempotency signal for ingestion, so it is written in the same
//! transaction as the rows it accounts for.

use crate::error::{PipelineError, Result};
use crate::model::{format_timestamp, parse_timestamp, ImportLogEntry};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

pub struct ImportLedger<'c> {
    conn: &'c Connection,
}

impl<'c> ImportLedger<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn ensure_schema(&self) -> Result<()> {
        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS import_log (
                file_name VARCHAR PRIMARY KEY,
                import_date TIMESTAMP,
                rows_imported BIGINT
            )
            "#,
            [],
        )?;
        Ok(())
    }

    pub fn is_imported(&self, file_id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM import_log WHERE file_name = ?1",
                [file_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert the entry for `file_id`. A second entry for the same file is a
    /// caller bug and comes back as `DuplicateLedgerEntry`.
    pub fn record_import(
        &self,
        file_id: &str,
        rows_imported: u64,
        imported_at: NaiveDateTime,
    ) -> Result<()> {
        let result = self.conn.execute(
            "INSERT INTO import_log (file_name, import_date, rows_imported) VALUES (?1, ?2, ?3)",
            params![file_id, format_timestamp(&imported_at), rows_imported as i64],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(PipelineError::DuplicateLedgerEntry(file_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, file_id: &str) -> Result<Option<ImportLogEntry>> {
        let row = self
            .conn
            .query_row(
                "SELECT file_name, import_date, rows_imported FROM import_log WHERE file_name = ?1",
                [file_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(to_entry).transpose()
    }

    /// All entries, ordered by file name.
    pub fn entries(&self) -> Result<Vec<ImportLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_name, import_date, rows_imported FROM import_log ORDER BY file_name",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<Vec<(String, String, i64)>>>()?;
        rows.into_iter().map(to_entry).collect()
    }
}

fn to_entry((file_name, import_date, rows_imported): (String, String, i64)) -> Result<ImportLogEntry> {
    let import_date = parse_timestamp(&import_date).ok_or_else(|| PipelineError::Coercion {
        column: "import_date".to_string(),
        reason: format!("unparseable timestamp {:?}", import_date),
    })?;
    Ok(ImportLogEntry {
        file_name,
        import_date,
        rows_imported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ledger_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ImportLedger::new(&conn).ensure_schema().unwrap();
        conn
    }

    #[test]
    fn test_record_then_lookup() {
        let conn = ledger_conn();
        let ledger = ImportLedger::new(&conn);
        let now = Utc::now().naive_utc();

        assert!(!ledger.is_imported("yellow_tripdata_2025-01.parquet").unwrap());
        ledger
            .record_import("yellow_tripdata_2025-01.parquet", 50_000, now)
            .unwrap();
        assert!(ledger.is_imported("yellow_tripdata_2025-01.parquet").unwrap());

        let entry = ledger.get("yellow_tripdata_2025-01.parquet").unwrap().unwrap();
        assert_eq!(entry.rows_imported, 50_000);
        assert_eq!(entry.import_date, now);
    }

    #[test]
    fn test_second_record_is_a_duplicate() {
        let conn = ledger_conn();
        let ledger = ImportLedger::new(&conn);
        let now = Utc::now().naive_utc();

        ledger.record_import("a.parquet", 1, now).unwrap();
        let err = ledger.record_import("a.parquet", 1, now).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateLedgerEntry(ref f) if f == "a.parquet"));
        assert_eq!(ledger.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_entries_are_sorted_by_file() {
        let conn = ledger_conn();
        let ledger = ImportLedger::new(&conn);
        let now = Utc::now().naive_utc();
        ledger.record_import("b.parquet", 2, now).unwrap();
        ledger.record_import("a.parquet", 1, now).unwrap();

        let names: Vec<_> = ledger.entries().unwrap().into_iter().map(|e| e.file_name).collect();
        assert_eq!(names, vec!["a.parquet", "b.parquet"]);
    }
}
