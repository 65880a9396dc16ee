//! Parquet reader - decodes a monthly trip file into rows aligned with the
//! canonical trip schema.

use crate::error::{PipelineError, Result};
use crate::model::Value;
use crate::schema::{
    is_valid_column, normalize_column_name, ColumnDef, SourceType, REQUIRED_TRIP_COLUMNS,
};
use chrono::DateTime;
use polars::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Rows decoded and inserted at a time.
pub const DEFAULT_SLICE_ROWS: usize = 50_000;

/// A Parquet trip file mapped onto the canonical columns.
///
/// The file is held in columnar form; rows are only materialised one slice
/// at a time through [`TripFile::rows`].
pub struct TripFile {
    by_name: HashMap<String, Series>,
    height: usize,
}

impl TripFile {
    /// Read `path` and match its columns to the trip schema. Columns outside
    /// the allowlist are dropped. A file without both trip timestamps is not
    /// a trip file and is rejected.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let df = ParquetReader::new(file).finish()?;
        let height = df.height();

        let mut by_name: HashMap<String, Series> = HashMap::new();
        for series in df.get_columns() {
            let canonical = normalize_column_name(series.name());
            if is_valid_column(&canonical) {
                by_name.entry(canonical).or_insert_with(|| series.clone());
            } else {
                debug!(column = series.name(), file = %path.display(), "Dropping column outside the trip schema");
            }
        }

        let missing: Vec<String> = REQUIRED_TRIP_COLUMNS
            .iter()
            .filter(|c| !by_name.contains_key(**c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::MissingColumns(missing));
        }

        Ok(Self { by_name, height })
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Rows `offset..offset + len` (clamped to the file), one value per entry
    /// of `columns`. Columns absent from the file are null.
    pub fn rows(&self, columns: &[ColumnDef], offset: usize, len: usize) -> Result<Vec<Vec<Value>>> {
        let len = len.min(self.height.saturating_sub(offset));

        let decoded = columns
            .iter()
            .map(|column| {
                let slice = self
                    .by_name
                    .get(&column.name)
                    .map(|s| s.slice(offset as i64, len));
                column_values(slice.as_ref(), column.source_type, len)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut rows: Vec<Vec<Value>> = (0..len).map(|_| Vec::with_capacity(columns.len())).collect();
        for values in decoded {
            for (row, value) in rows.iter_mut().zip(values) {
                row.push(value);
            }
        }
        Ok(rows)
    }
}

fn column_values(series: Option<&Series>, kind: SourceType, height: usize) -> Result<Vec<Value>> {
    let Some(series) = series else {
        return Ok(vec![Value::Null; height]);
    };

    let values = match kind {
        SourceType::Int64 | SourceType::Int32 => series
            .cast(&DataType::Int64)?
            .i64()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::Int))
            .collect(),
        SourceType::Double => series
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::Float))
            .collect(),
        SourceType::Boolean => series
            .cast(&DataType::Boolean)?
            .bool()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, Value::Bool))
            .collect(),
        SourceType::Timestamp => series
            .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?
            .cast(&DataType::Int64)?
            .i64()?
            .into_iter()
            .map(|v| {
                v.and_then(DateTime::from_timestamp_micros)
                    .map_or(Value::Null, |dt| Value::Timestamp(dt.naive_utc()))
            })
            .collect(),
        SourceType::Text | SourceType::Other => series
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|v| v.map_or(Value::Null, |s| Value::Text(s.to_string())))
            .collect(),
    };
    Ok(values)
}
