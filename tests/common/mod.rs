#![allow(dead_code)]

use async_trait::async_trait;
use polars::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use taxi_pipeline::db::document::{DocumentStore, TripDocument};
use taxi_pipeline::db::relational::RelationalStore;
use taxi_pipeline::model::{parse_timestamp, TripRecord, TripRow, Value};
use taxi_pipeline::schema::{TargetColumn, TRIP_TABLE};
use taxi_pipeline::{PipelineError, Result};

/// A trip that passes every cleaning stage.
pub fn valid_trip() -> TripRecord {
    TripRecord {
        vendor_id: Some(2),
        tpep_pickup_datetime: parse_timestamp("2025-01-01 00:18:38"),
        tpep_dropoff_datetime: parse_timestamp("2025-01-01 00:26:59"),
        passenger_count: Some(1.0),
        trip_distance: Some(1.6),
        ratecode_id: Some(1.0),
        store_and_fwd_flag: Some("N".to_string()),
        pu_location_id: Some(229),
        do_location_id: Some(237),
        payment_type: Some(1),
        fare_amount: Some(10.0),
        extra: Some(3.5),
        mta_tax: Some(0.5),
        tip_amount: Some(3.0),
        tolls_amount: Some(0.0),
        improvement_surcharge: Some(1.0),
        total_amount: Some(18.0),
        congestion_surcharge: Some(2.5),
        airport_fee: Some(0.0),
        cbd_congestion_fee: None,
    }
}

fn micros(column: &str, values: Vec<Option<i64>>) -> PolarsResult<Series> {
    Series::new(column, values).cast(&DataType::Datetime(TimeUnit::Microseconds, None))
}

/// Write `trips` as a Parquet file using the source spelling of the column
/// names (`VendorID`, `PULocationID`, ...). `cbd_congestion_fee` is left out,
/// as in files from before 2025, and an extra column is added that is not
/// part of the trip schema.
pub fn write_trip_parquet(path: &Path, trips: &[TripRecord]) -> PolarsResult<()> {
    let ts = |f: fn(&TripRecord) -> Option<chrono::NaiveDateTime>| {
        trips
            .iter()
            .map(|t| f(t).map(|v| v.and_utc().timestamp_micros()))
            .collect::<Vec<_>>()
    };
    let ints = |f: fn(&TripRecord) -> Option<i64>| trips.iter().map(f).collect::<Vec<_>>();
    let floats = |f: fn(&TripRecord) -> Option<f64>| trips.iter().map(f).collect::<Vec<_>>();

    let mut df = DataFrame::new(vec![
        Series::new("VendorID", ints(|t| t.vendor_id)),
        micros("tpep_pickup_datetime", ts(|t| t.tpep_pickup_datetime))?,
        micros("tpep_dropoff_datetime", ts(|t| t.tpep_dropoff_datetime))?,
        Series::new("passenger_count", floats(|t| t.passenger_count)),
        Series::new("trip_distance", floats(|t| t.trip_distance)),
        Series::new("RatecodeID", floats(|t| t.ratecode_id)),
        Series::new(
            "store_and_fwd_flag",
            trips
                .iter()
                .map(|t| t.store_and_fwd_flag.clone())
                .collect::<Vec<_>>(),
        ),
        Series::new("PULocationID", ints(|t| t.pu_location_id)),
        Series::new("DOLocationID", ints(|t| t.do_location_id)),
        Series::new("payment_type", ints(|t| t.payment_type)),
        Series::new("fare_amount", floats(|t| t.fare_amount)),
        Series::new("extra", floats(|t| t.extra)),
        Series::new("mta_tax", floats(|t| t.mta_tax)),
        Series::new("tip_amount", floats(|t| t.tip_amount)),
        Series::new("tolls_amount", floats(|t| t.tolls_amount)),
        Series::new("improvement_surcharge", floats(|t| t.improvement_surcharge)),
        Series::new("total_amount", floats(|t| t.total_amount)),
        Series::new("congestion_surcharge", floats(|t| t.congestion_surcharge)),
        Series::new("Airport_fee", floats(|t| t.airport_fee)),
        Series::new("unexpected_col", vec![1i32; trips.len()]),
    ])?;

    let mut file = std::fs::File::create(path)?;
    ParquetWriter::new(&mut file).finish(&mut df)?;
    Ok(())
}

/// `n` copies of a valid trip, vendor ids counting up from 1.
pub fn numbered_trips(n: usize) -> Vec<TripRecord> {
    (0..n)
        .map(|i| TripRecord {
            vendor_id: Some(i as i64 + 1),
            ..valid_trip()
        })
        .collect()
}

fn fake_failure(what: &str) -> PipelineError {
    PipelineError::Relational(sqlx::Error::Protocol(format!("injected failure: {}", what)))
}

struct MemoryTable {
    columns: Vec<TargetColumn>,
    surrogate_key: bool,
    ids: Vec<i64>,
    rows: Vec<Vec<Value>>,
    next_id: i64,
}

/// In-memory relational store. Records the size of every inserted batch.
#[derive(Default)]
pub struct MemoryRelationalStore {
    tables: Mutex<HashMap<String, MemoryTable>>,
    batches: Mutex<Vec<(String, usize)>>,
    failing_table: Option<String>,
}

impl MemoryRelationalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation on `table` fails.
    pub fn failing_on(table: &str) -> Self {
        Self {
            failing_table: Some(table.to_string()),
            ..Self::default()
        }
    }

    pub fn batch_sizes(&self, table: &str) -> Vec<usize> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, n)| *n)
            .collect()
    }

    pub fn rows(&self, table: &str) -> Vec<Vec<Value>> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.lock().unwrap().contains_key(table)
    }

    fn check(&self, table: &str) -> Result<()> {
        match &self.failing_table {
            Some(failing) if failing == table => Err(fake_failure(table)),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RelationalStore for MemoryRelationalStore {
    async fn create_table(
        &self,
        table: &str,
        columns: &[TargetColumn],
        surrogate_key: bool,
    ) -> Result<()> {
        self.check(table)?;
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_insert_with(|| MemoryTable {
                columns: columns.to_vec(),
                surrogate_key,
                ids: Vec::new(),
                rows: Vec::new(),
                next_id: 1,
            });
        Ok(())
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        self.check(table)?;
        let mut tables = self.tables.lock().unwrap();
        let t = tables.get_mut(table).ok_or_else(|| fake_failure("no such table"))?;
        t.ids.clear();
        t.rows.clear();
        t.next_id = 1;
        Ok(())
    }

    async fn insert_batch(
        &self,
        table: &str,
        columns: &[TargetColumn],
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        self.check(table)?;
        let mut tables = self.tables.lock().unwrap();
        let t = tables.get_mut(table).ok_or_else(|| fake_failure("no such table"))?;
        assert_eq!(t.columns.len(), columns.len());
        for row in rows {
            assert_eq!(row.len(), columns.len());
            if t.surrogate_key {
                t.ids.push(t.next_id);
                t.next_id += 1;
            }
            t.rows.push(row.clone());
        }
        self.batches
            .lock()
            .unwrap()
            .push((table.to_string(), rows.len()));
        Ok(rows.len() as u64)
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        self.check(table)?;
        let tables = self.tables.lock().unwrap();
        Ok(tables.get(table).map(|t| t.rows.len() as u64).unwrap_or(0))
    }

    async fn fetch_trips(&self, after_id: i64, limit: usize) -> Result<Vec<TripRow>> {
        self.check(TRIP_TABLE)?;
        let tables = self.tables.lock().unwrap();
        let Some(t) = tables.get(TRIP_TABLE) else {
            return Ok(Vec::new());
        };
        Ok(t.ids
            .iter()
            .zip(&t.rows)
            .filter(|(id, _)| **id > after_id)
            .take(limit)
            .map(|(id, row)| TripRow {
                id: *id,
                record: to_record(&t.columns, row),
            })
            .collect())
    }
}

fn to_record(columns: &[TargetColumn], row: &[Value]) -> TripRecord {
    let mut r = TripRecord::default();
    for (column, value) in columns.iter().zip(row) {
        let int = match value {
            Value::Int(v) => Some(*v),
            _ => None,
        };
        let float = match value {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        };
        let ts = match value {
            Value::Timestamp(v) => Some(*v),
            _ => None,
        };
        match column.name.as_str() {
            "vendor_id" => r.vendor_id = int,
            "tpep_pickup_datetime" => r.tpep_pickup_datetime = ts,
            "tpep_dropoff_datetime" => r.tpep_dropoff_datetime = ts,
            "passenger_count" => r.passenger_count = float,
            "trip_distance" => r.trip_distance = float,
            "ratecode_id" => r.ratecode_id = float,
            "store_and_fwd_flag" => {
                r.store_and_fwd_flag = match value {
                    Value::Text(s) => Some(s.clone()),
                    _ => None,
                }
            }
            "pu_location_id" => r.pu_location_id = int,
            "do_location_id" => r.do_location_id = int,
            "payment_type" => r.payment_type = int,
            "fare_amount" => r.fare_amount = float,
            "extra" => r.extra = float,
            "mta_tax" => r.mta_tax = float,
            "tip_amount" => r.tip_amount = float,
            "tolls_amount" => r.tolls_amount = float,
            "improvement_surcharge" => r.improvement_surcharge = float,
            "total_amount" => r.total_amount = float,
            "congestion_surcharge" => r.congestion_surcharge = float,
            "airport_fee" => r.airport_fee = float,
            "cbd_congestion_fee" => r.cbd_congestion_fee = float,
            _ => {}
        }
    }
    r
}

/// In-memory document store. Optionally fails the n-th (1-based) insert.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<Vec<TripDocument>>,
    inserts: Mutex<usize>,
    fail_on_insert: Option<usize>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: Vec<TripDocument>) -> Self {
        Self {
            documents: Mutex::new(documents),
            ..Self::default()
        }
    }

    pub fn failing_on_insert(n: usize) -> Self {
        Self {
            fail_on_insert: Some(n),
            ..Self::default()
        }
    }

    pub fn documents(&self) -> Vec<TripDocument> {
        self.documents.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn clear(&self) -> Result<u64> {
        let mut docs = self.documents.lock().unwrap();
        let n = docs.len() as u64;
        docs.clear();
        Ok(n)
    }

    async fn insert_many(&self, documents: Vec<TripDocument>) -> Result<u64> {
        let call = {
            let mut inserts = self.inserts.lock().unwrap();
            *inserts += 1;
            *inserts
        };
        if self.fail_on_insert == Some(call) {
            return Err(PipelineError::StoreUnavailable {
                store: "document",
                reason: format!("injected failure on insert {}", call),
            });
        }
        let n = documents.len() as u64;
        self.documents.lock().unwrap().extend(documents);
        Ok(n)
    }
}
