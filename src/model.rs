//! Records moved through the pipeline

use chrono::NaiveDateTime;
use rusqlite::types::{ToSql, ToSqlOutput};
use serde::{Deserialize, Serialize};

/// Text encoding of timestamps in the analytical store.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

/// A single cell, typed by the column it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Bool(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Int(v) => ToSqlOutput::from(*v),
            Value::Float(v) => ToSqlOutput::from(*v),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
            Value::Timestamp(ts) => ToSqlOutput::from(format_timestamp(ts)),
            Value::Bool(v) => ToSqlOutput::from(*v),
        })
    }
}

/// One taxi trip as stored in the relational store.
///
/// Every field is optional: monthly files carry nulls in almost any column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TripRecord {
    pub vendor_id: Option<i64>,
    pub tpep_pickup_datetime: Option<NaiveDateTime>,
    pub tpep_dropoff_datetime: Option<NaiveDateTime>,
    pub passenger_count: Option<f64>,
    pub trip_distance: Option<f64>,
    pub ratecode_id: Option<f64>,
    pub store_and_fwd_flag: Option<String>,
    pub pu_location_id: Option<i64>,
    pub do_location_id: Option<i64>,
    pub payment_type: Option<i64>,
    pub fare_amount: Option<f64>,
    pub extra: Option<f64>,
    pub mta_tax: Option<f64>,
    pub tip_amount: Option<f64>,
    pub tolls_amount: Option<f64>,
    pub improvement_surcharge: Option<f64>,
    pub total_amount: Option<f64>,
    pub congestion_surcharge: Option<f64>,
    pub airport_fee: Option<f64>,
    pub cbd_congestion_fee: Option<f64>,
}

/// A trip record together with its relational surrogate key.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct TripRow {
    pub id: i64,
    #[sqlx(flatten)]
    pub record: TripRecord,
}

/// One row of the import log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportLogEntry {
    pub file_name: String,
    pub import_date: NaiveDateTime,
    pub rows_imported: i64,
}
