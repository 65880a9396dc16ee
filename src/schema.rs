//! Schema mapping between the columnar source files, the analytical store and
//! the relational store.
//!
//! Everything here is pure. Type mapping is total: a source type that is not
//! recognised maps to the target engine's generic text type so that schema
//! drift in a monthly file never aborts a run.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Trip table name, shared by every store.
pub const TRIP_TABLE: &str = "yellow_taxi_trips";

/// Import log table name (analytical store, mirrored into the relational store).
pub const IMPORT_LOG_TABLE: &str = "import_log";

/// Surrogate key column added to the trip table in the relational store.
pub const SURROGATE_KEY: &str = "id";

/// Column type as declared by a source (Parquet logical type or analytical
/// store declaration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    Int64,
    Int32,
    Double,
    Text,
    Timestamp,
    Boolean,
    /// Anything not recognised. Always mapped to text.
    Other,
}

impl SourceType {
    /// Parse a declared type name. Total: unknown names yield `Other`.
    pub fn from_name(name: &str) -> Self {
        let upper = name.trim().to_uppercase();
        // Drop precision/length suffixes such as VARCHAR(32) or TIMESTAMP(6)
        let base = upper.split('(').next().unwrap_or("").trim();

        match base {
            "BIGINT" | "INT64" | "INT8" | "LONG" | "UBIGINT" => SourceType::Int64,
            "INTEGER" | "INT" | "INT32" | "INT4" | "SMALLINT" | "INT16" | "TINYINT" => {
                SourceType::Int32
            }
            "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" | "FLOAT64" | "FLOAT8" | "REAL" | "FLOAT4"
            | "NUMERIC" | "DECIMAL" => SourceType::Double,
            "VARCHAR" | "TEXT" | "STRING" | "UTF8" | "CHAR" | "CHARACTER VARYING" => {
                SourceType::Text
            }
            "TIMESTAMP" | "DATETIME" | "TIMESTAMP_NS" | "TIMESTAMP_US" | "TIMESTAMP_MS"
            | "TIMESTAMP WITHOUT TIME ZONE" => SourceType::Timestamp,
            "BOOLEAN" | "BOOL" => SourceType::Boolean,
            _ => SourceType::Other,
        }
    }
}

/// Store whose type vocabulary a mapping targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetEngine {
    Analytical,
    Relational,
}

/// Declared type in the analytical store.
pub fn analytical_type(source: SourceType) -> &'static str {
    match source {
        SourceType::Int64 => "BIGINT",
        SourceType::Int32 => "INTEGER",
        SourceType::Double => "DOUBLE",
        SourceType::Text => "VARCHAR",
        SourceType::Timestamp => "TIMESTAMP",
        SourceType::Boolean => "BOOLEAN",
        SourceType::Other => "VARCHAR",
    }
}

/// Column type in the relational store.
pub fn relational_type(source: SourceType) -> &'static str {
    match source {
        SourceType::Int64 => "BIGINT",
        SourceType::Int32 => "INT",
        SourceType::Double => "DOUBLE PRECISION",
        SourceType::Text => "TEXT",
        SourceType::Timestamp => "TIMESTAMP",
        SourceType::Boolean => "BOOLEAN",
        SourceType::Other => "TEXT",
    }
}

/// Map a source type name to the target engine's type name.
pub fn map_type(source_type_name: &str, target: TargetEngine) -> &'static str {
    let source = SourceType::from_name(source_type_name);
    match target {
        TargetEngine::Analytical => analytical_type(source),
        TargetEngine::Relational => relational_type(source),
    }
}

/// A column as described by a source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub source_type: SourceType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            name: name.into(),
            source_type,
        }
    }
}

/// A column ready to be materialised in the relational store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetColumn {
    pub name: String,
    pub source_type: SourceType,
    pub target_type: &'static str,
}

pub fn relational_columns(columns: &[ColumnDef]) -> Vec<TargetColumn> {
    columns
        .iter()
        .map(|c| TargetColumn {
            name: c.name.clone(),
            source_type: c.source_type,
            target_type: relational_type(c.source_type),
        })
        .collect()
}

/// The canonical trip schema, in storage order.
pub const TRIP_COLUMNS: [(&str, SourceType); 20] = [
    ("vendor_id", SourceType::Int64),
    ("tpep_pickup_datetime", SourceType::Timestamp),
    ("tpep_dropoff_datetime", SourceType::Timestamp),
    ("passenger_count", SourceType::Double),
    ("trip_distance", SourceType::Double),
    ("ratecode_id", SourceType::Double),
    ("store_and_fwd_flag", SourceType::Text),
    ("pu_location_id", SourceType::Int64),
    ("do_location_id", SourceType::Int64),
    ("payment_type", SourceType::Int64),
    ("fare_amount", SourceType::Double),
    ("extra", SourceType::Double),
    ("mta_tax", SourceType::Double),
    ("tip_amount", SourceType::Double),
    ("tolls_amount", SourceType::Double),
    ("improvement_surcharge", SourceType::Double),
    ("total_amount", SourceType::Double),
    ("congestion_surcharge", SourceType::Double),
    ("airport_fee", SourceType::Double),
    ("cbd_congestion_fee", SourceType::Double),
];

/// Columns a source file must carry to be accepted as a trip file.
pub const REQUIRED_TRIP_COLUMNS: [&str; 2] = ["tpep_pickup_datetime", "tpep_dropoff_datetime"];

pub fn trip_columns() -> Vec<ColumnDef> {
    TRIP_COLUMNS
        .iter()
        .map(|(name, kind)| ColumnDef::new(*name, *kind))
        .collect()
}

pub fn import_log_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("file_name", SourceType::Text),
        ColumnDef::new("import_date", SourceType::Timestamp),
        ColumnDef::new("rows_imported", SourceType::Int64),
    ]
}

/// Source spellings that differ from the canonical name by more than case.
const COLUMN_ALIASES: [(&str, &str); 4] = [
    ("vendorid", "vendor_id"),
    ("ratecodeid", "ratecode_id"),
    ("pulocationid", "pu_location_id"),
    ("dolocationid", "do_location_id"),
];

/// Normalise a source column name to its canonical spelling.
pub fn normalize_column_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase().replace(' ', "_");
    COLUMN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lowered)
}

/// Whether a canonical column name belongs to the trip schema.
pub fn is_valid_column(name: &str) -> bool {
    TRIP_COLUMNS.iter().any(|(column, _)| *column == name)
}

/// Double-quote an identifier. Valid for both SQLite and PostgreSQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn column_list(columns: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    columns
        .into_iter()
        .map(|c| quote_ident(c.as_ref()))
        .join(", ")
}

/// Render the relational `CREATE TABLE IF NOT EXISTS` statement.
pub fn create_table_sql(table: &str, columns: &[TargetColumn], surrogate_key: bool) -> String {
    let mut defs = Vec::with_capacity(columns.len() + 1);
    if surrogate_key {
        defs.push(format!("{} BIGSERIAL PRIMARY KEY", quote_ident(SURROGATE_KEY)));
    }
    defs.extend(
        columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.target_type)),
    );
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        defs.join(", ")
    )
}

/// Whether a relational table carries the surrogate key.
pub fn has_surrogate_key(table: &str) -> bool {
    table == TRIP_TABLE
}
