//! Relational store - PostgreSQL target of the migration and source of the
//! cleaning pass.

use crate::error::Result;
use crate::model::{TripRow, Value};
use crate::schema::{
    column_list, create_table_sql, quote_ident, SourceType, TargetColumn, SURROGATE_KEY,
    TRIP_COLUMNS, TRIP_TABLE,
};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder};

/// PostgreSQL refuses statements with more bind parameters than this.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Operations the pipeline needs from the relational store.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// `CREATE TABLE IF NOT EXISTS`; an existing table is left untouched.
    async fn create_table(
        &self,
        table: &str,
        columns: &[TargetColumn],
        surrogate_key: bool,
    ) -> Result<()>;

    /// Remove every row of `table`.
    async fn truncate(&self, table: &str) -> Result<()>;

    /// Insert `rows` (positional over `columns`) and commit. Returns rows written.
    async fn insert_batch(
        &self,
        table: &str,
        columns: &[TargetColumn],
        rows: &[Vec<Value>],
    ) -> Result<u64>;

    async fn count_rows(&self, table: &str) -> Result<u64>;

    /// Up to `limit` trip rows with a surrogate key greater than `after_id`,
    /// in key order.
    async fn fetch_trips(&self, after_id: i64, limit: usize) -> Result<Vec<TripRow>>;
}

pub struct PgRelationalStore {
    pool: PgPool,
}

impl PgRelationalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RelationalStore for PgRelationalStore {
    async fn create_table(
        &self,
        table: &str,
        columns: &[TargetColumn],
        surrogate_key: bool,
    ) -> Result<()> {
        sqlx::query(&create_table_sql(table, columns, surrogate_key))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        sqlx::query(&format!("TRUNCATE TABLE {} RESTART IDENTITY", quote_ident(table)))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_batch(
        &self,
        table: &str,
        columns: &[TargetColumn],
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for mut statement in insert_statements(table, columns, rows) {
            written += statement.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        Ok(written)
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn fetch_trips(&self, after_id: i64, limit: usize) -> Result<Vec<TripRow>> {
        let sql = fetch_trips_sql();
        let rows = sqlx::query_as::<_, TripRow>(&sql)
            .bind(after_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

/// Rows per `INSERT` for a table of `column_count` columns, keeping every
/// statement under the bind-parameter limit.
pub fn rows_per_statement(column_count: usize) -> usize {
    (MAX_BIND_PARAMS / column_count.max(1)).max(1)
}

/// Multi-row `INSERT` statements covering `rows`, in order.
pub fn insert_statements(
    table: &str,
    columns: &[TargetColumn],
    rows: &[Vec<Value>],
) -> Vec<QueryBuilder<'static, Postgres>> {
    if rows.is_empty() || columns.is_empty() {
        return Vec::new();
    }

    let header = format!(
        "INSERT INTO {} ({}) ",
        quote_ident(table),
        column_list(columns.iter().map(|c| c.name.as_str()))
    );
    rows.chunks(rows_per_statement(columns.len()))
        .map(|chunk| {
            let mut qb: QueryBuilder<'static, Postgres> = QueryBuilder::new(header.as_str());
            qb.push_values(chunk, |mut b, row| {
                for (value, column) in row.iter().zip(columns) {
                    bind_value(&mut b, value, column.source_type);
                }
            });
            qb
        })
        .collect()
}

/// Keyset page over the trip table: `$1` is the last key seen, `$2` the limit.
pub fn fetch_trips_sql() -> String {
    format!(
        "SELECT {key}, {columns} FROM {table} WHERE {key} > $1 ORDER BY {key} LIMIT $2",
        key = quote_ident(SURROGATE_KEY),
        columns = column_list(TRIP_COLUMNS.iter().map(|(name, _)| *name)),
        table = quote_ident(TRIP_TABLE),
    )
}

/// Bind one cell. Nulls carry the column's mapped type so PostgreSQL never
/// has to guess a parameter type.
fn bind_value<'args>(
    b: &mut Separated<'_, 'args, Postgres, &'static str>,
    value: &Value,
    kind: SourceType,
) {
    match value {
        Value::Int(v) if kind == SourceType::Int32 => match i32::try_from(*v) {
            Ok(narrow) => b.push_bind(narrow),
            Err(_) => b.push_bind(*v),
        },
        Value::Int(v) => b.push_bind(*v),
        Value::Float(v) => b.push_bind(*v),
        Value::Text(s) => b.push_bind(s.clone()),
        Value::Timestamp(ts) => b.push_bind(*ts),
        Value::Bool(v) => b.push_bind(*v),
        Value::Null => match kind {
            SourceType::Int64 => b.push_bind(None::<i64>),
            SourceType::Int32 => b.push_bind(None::<i32>),
            SourceType::Double => b.push_bind(None::<f64>),
            SourceType::Timestamp => b.push_bind(None::<NaiveDateTime>),
            SourceType::Boolean => b.push_bind(None::<bool>),
            SourceType::Text | SourceType::Other => b.push_bind(None::<String>),
        },
    };
}
