//! Analytical store - embedded, file-backed SQLite database that stages raw
//! trip files before they move on to the relational store.
//!
//! The connection sits behind a `Mutex` so the store can be shared by
//! reference across `.await` points; every method takes the lock for the
//! duration of one statement or one transaction only.

use crate::error::{PipelineError, Result};
use crate::ingestion::ImportLedger;
use crate::model::{parse_timestamp, Value};
use crate::schema::{
    analytical_type, column_list, quote_ident, trip_columns, ColumnDef, SourceType, TRIP_TABLE,
};
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, Transaction};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

pub struct AnalyticalStore {
    path: Option<PathBuf>,
    db: Mutex<Connection>,
}

/// Summary of the staged data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub total_trips: u64,
    pub files_imported: u64,
    pub earliest_pickup: Option<String>,
    pub latest_dropoff: Option<String>,
    pub database_size_bytes: u64,
}

impl AnalyticalStore {
    /// Open (or create) the store at `path` and make sure the trip table and
    /// import log exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Connection::open(&path).map_err(|e| PipelineError::StoreUnavailable {
            store: "analytical",
            reason: format!("{}: {}", path.display(), e),
        })?;

        let store = Self {
            path: Some(path.clone()),
            db: Mutex::new(db),
        };
        // A file that is not a database only fails on first use.
        store
            .init_schema()
            .map_err(|e| PipelineError::StoreUnavailable {
                store: "analytical",
                reason: format!("{}: {}", path.display(), e),
            })?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            path: None,
            db: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.lock()?;

        let defs: Vec<String> = trip_columns()
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), analytical_type(c.source_type)))
            .collect();
        db.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote_ident(TRIP_TABLE),
                defs.join(", ")
            ),
            [],
        )?;

        ImportLedger::new(&db).ensure_schema()?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| PipelineError::StoreUnavailable {
            store: "analytical",
            reason: "connection lock poisoned".to_string(),
        })
    }

    /// Run `f` against the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self.lock()?;
        f(&db)
    }

    /// Run `f` inside a transaction, committing only if it succeeds.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut db = self.lock()?;
        let tx = db.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// User tables, in name order.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        self.with_conn(|db| {
            let mut stmt = db.prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(names)
        })
    }

    /// Column names and declared types of `table`, in declaration order.
    pub fn describe(&self, table: &str) -> Result<Vec<ColumnDef>> {
        self.with_conn(|db| describe_table(db, table))
    }

    pub fn count_rows(&self, table: &str) -> Result<u64> {
        self.with_conn(|db| count_rows(db, table))
    }

    /// Read up to `limit` rows with a row id greater than `after`, in row id
    /// order. Returns the rows and the last row id seen.
    pub fn read_batch(
        &self,
        table: &str,
        columns: &[ColumnDef],
        after: i64,
        limit: usize,
    ) -> Result<(Vec<Vec<Value>>, Option<i64>)> {
        self.with_conn(|db| {
            let sql = format!(
                "SELECT rowid, {} FROM {} WHERE rowid > ?1 ORDER BY rowid LIMIT ?2",
                column_list(columns.iter().map(|c| c.name.as_str())),
                quote_ident(table)
            );
            let mut stmt = db.prepare(&sql)?;
            let mut rows = stmt.query(params![after, limit as i64])?;

            let mut batch = Vec::with_capacity(limit.min(16_384));
            let mut last = None;
            while let Some(row) = rows.next()? {
                last = Some(row.get::<_, i64>(0)?);
                let mut values = Vec::with_capacity(columns.len());
                for (i, column) in columns.iter().enumerate() {
                    values.push(decode_value(row.get_ref(i + 1)?, column)?);
                }
                batch.push(values);
            }
            Ok((batch, last))
        })
    }

    pub fn statistics(&self) -> Result<StoreStatistics> {
        self.with_conn(|db| {
            let total_trips = count_rows(db, TRIP_TABLE)?;
            let files_imported: i64 =
                db.query_row("SELECT COUNT(DISTINCT file_name) FROM import_log", [], |r| {
                    r.get(0)
                })?;
            let (earliest_pickup, latest_dropoff): (Option<String>, Option<String>) = db
                .query_row(
                    &format!(
                        "SELECT MIN(tpep_pickup_datetime), MAX(tpep_dropoff_datetime) FROM {}",
                        quote_ident(TRIP_TABLE)
                    ),
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?;
            let page_count: i64 = db.query_row("PRAGMA page_count", [], |r| r.get(0))?;
            let page_size: i64 = db.query_row("PRAGMA page_size", [], |r| r.get(0))?;

            Ok(StoreStatistics {
                total_trips,
                files_imported: files_imported as u64,
                earliest_pickup,
                latest_dropoff,
                database_size_bytes: (page_count * page_size) as u64,
            })
        })
    }

    pub fn log_statistics(&self) -> Result<()> {
        let stats = self.statistics()?;
        info!(
            total_trips = stats.total_trips,
            files_imported = stats.files_imported,
            earliest_pickup = stats.earliest_pickup.as_deref().unwrap_or("-"),
            latest_dropoff = stats.latest_dropoff.as_deref().unwrap_or("-"),
            size_bytes = stats.database_size_bytes,
            "Analytical store statistics"
        );
        Ok(())
    }
}

pub fn describe_table(db: &Connection, table: &str) -> Result<Vec<ColumnDef>> {
    let mut stmt = db.prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")?;
    let columns = stmt
        .query_map([table], |row| {
            let name: String = row.get(0)?;
            let declared: String = row.get(1)?;
            Ok(ColumnDef::new(name, SourceType::from_name(&declared)))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

pub fn count_rows(db: &Connection, table: &str) -> Result<u64> {
    let count: i64 = db.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
        [],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Insert rows positionally into `columns` of `table`. Returns rows written.
pub fn insert_rows(
    db: &Connection,
    table: &str,
    columns: &[ColumnDef],
    rows: &[Vec<Value>],
) -> Result<u64> {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        column_list(columns.iter().map(|c| c.name.as_str())),
        placeholders.join(", ")
    );
    let mut stmt = db.prepare_cached(&sql)?;
    let mut written = 0u64;
    for row in rows {
        written += stmt.execute(params_from_iter(row.iter()))? as u64;
    }
    Ok(written)
}

fn decode_value(value: ValueRef<'_>, column: &ColumnDef) -> Result<Value> {
    let mismatch = |found: &str| PipelineError::Coercion {
        column: column.name.clone(),
        reason: format!("{} value in a {:?} column", found, column.source_type),
    };

    let decoded = match (column.source_type, value) {
        (_, ValueRef::Null) => Value::Null,
        (SourceType::Int64 | SourceType::Int32, ValueRef::Integer(v)) => Value::Int(v),
        (SourceType::Int64 | SourceType::Int32, ValueRef::Real(v)) if v.fract() == 0.0 => {
            Value::Int(v as i64)
        }
        (SourceType::Double, ValueRef::Real(v)) => Value::Float(v),
        (SourceType::Double, ValueRef::Integer(v)) => Value::Float(v as f64),
        (SourceType::Boolean, ValueRef::Integer(v)) => Value::Bool(v != 0),
        (SourceType::Timestamp, ValueRef::Text(bytes)) => {
            let text = std::str::from_utf8(bytes).map_err(|_| mismatch("non-UTF-8 text"))?;
            Value::Timestamp(parse_timestamp(text).ok_or_else(|| mismatch("unparseable text"))?)
        }
        (SourceType::Text | SourceType::Other, ValueRef::Text(bytes)) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
        (SourceType::Text | SourceType::Other, ValueRef::Integer(v)) => Value::Text(v.to_string()),
        (SourceType::Text | SourceType::Other, ValueRef::Real(v)) => Value::Text(v.to_string()),
        (_, ValueRef::Integer(_)) => return Err(mismatch("integer")),
        (_, ValueRef::Real(_)) => return Err(mismatch("real")),
        (_, ValueRef::Text(_)) => return Err(mismatch("text")),
        (_, ValueRef::Blob(_)) => return Err(mismatch("blob")),
    };
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IMPORT_LOG_TABLE;

    #[test]
    fn test_open_creates_trip_table_and_import_log() {
        let store = AnalyticalStore::open_in_memory().unwrap();
        let tables = store.list_tables().unwrap();
        assert_eq!(tables, vec![IMPORT_LOG_TABLE.to_string(), TRIP_TABLE.to_string()]);

        let columns = store.describe(TRIP_TABLE).unwrap();
        assert_eq!(columns, trip_columns());
    }

    #[test]
    fn test_open_rejects_a_file_that_is_not_a_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("taxi.sqlite");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();

        let err = AnalyticalStore::open(&path).err().unwrap();
        assert!(matches!(
            err,
            PipelineError::StoreUnavailable { store: "analytical", .. }
        ));
    }

    #[test]
    fn test_read_batch_pages_by_rowid() {
        let store = AnalyticalStore::open_in_memory().unwrap();
        let columns = vec![ColumnDef::new("vendor_id", SourceType::Int64)];
        let rows: Vec<Vec<Value>> = (0..5).map(|i| vec![Value::Int(i)]).collect();
        store
            .with_transaction(|tx| insert_rows(tx, TRIP_TABLE, &columns, &rows))
            .unwrap();

        let (first, last) = store.read_batch(TRIP_TABLE, &columns, 0, 3).unwrap();
        assert_eq!(first.len(), 3);
        let (rest, _) = store
            .read_batch(TRIP_TABLE, &columns, last.unwrap(), 3)
            .unwrap();
        assert_eq!(rest, vec![vec![Value::Int(3)], vec![Value::Int(4)]]);
    }

    #[test]
    fn test_timestamps_round_trip_through_text() {
        let store = AnalyticalStore::open_in_memory().unwrap();
        let columns = vec![ColumnDef::new("tpep_pickup_datetime", SourceType::Timestamp)];
        let ts = parse_timestamp("2025-01-01 00:18:38.250").unwrap();
        store
            .with_transaction(|tx| {
                insert_rows(tx, TRIP_TABLE, &columns, &[vec![Value::Timestamp(ts)], vec![Value::Null]])
            })
            .unwrap();

        let (rows, _) = store.read_batch(TRIP_TABLE, &columns, 0, 10).unwrap();
        assert_eq!(rows, vec![vec![Value::Timestamp(ts)], vec![Value::Null]]);
    }

    #[test]
    fn test_failed_transaction_leaves_no_rows() {
        let store = AnalyticalStore::open_in_memory().unwrap();
        let columns = vec![ColumnDef::new("vendor_id", SourceType::Int64)];
        let result: Result<()> = store.with_transaction(|tx| {
            insert_rows(tx, TRIP_TABLE, &columns, &[vec![Value::Int(1)]])?;
            Err(PipelineError::Config("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(store.count_rows(TRIP_TABLE).unwrap(), 0);
    }
}
