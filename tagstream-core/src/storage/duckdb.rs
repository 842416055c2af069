//! DuckDB connector.
//!
//! Opens an embedded DuckDB database through the native driver. The
//! connection string is a file path, or `:memory:` for an in-memory database
//! that all pooled connections share.
//!
//! # Configuration
//!
//! ```toml
//! [[backends]]
//! name = "local"
//! technology = "duckdb"
//! database = "/var/lib/tagstream/tags.duckdb"   # or ":memory:"
//! placeholder = "question"                      # DuckDB binds ? and $n
//! setup = ["SET threads TO 4"]
//! ```

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use duckdb::types::{TimeUnit, Value as DuckValue};
use duckdb::{params_from_iter, DuckdbConnectionManager};
use r2d2::{CustomizeConnection, Pool};
use tracing::debug;

use super::pool::{self, SetupStatements};
use super::Connection;
use crate::config::BackendConfig;
use crate::error::{Result, StoreError};
use crate::query::{Placeholder, RenderedQuery};
use crate::tags::{Rows, Value};

impl CustomizeConnection<duckdb::Connection, duckdb::Error> for SetupStatements {
    fn on_acquire(&self, conn: &mut duckdb::Connection) -> std::result::Result<(), duckdb::Error> {
        for sql in &self.0 {
            conn.execute_batch(sql)?;
        }
        Ok(())
    }
}

/// Pooled DuckDB connection.
#[derive(Clone)]
pub struct DuckDbConnection {
    pool: Pool<DuckdbConnectionManager>,
    placeholder: Placeholder,
}

impl DuckDbConnection {
    /// Opens the database and fills the pool.
    pub async fn open(backend: &BackendConfig) -> Result<Self> {
        let path = backend.connection_string();
        let pool_config = backend.pool.clone();
        let setup = backend.setup.clone();
        debug!(backend = %backend.name, path = %path, "opening duckdb");

        let pool = tokio::task::spawn_blocking(move || {
            let manager = if path == ":memory:" {
                DuckdbConnectionManager::memory()?
            } else {
                DuckdbConnectionManager::file(&path)?
            };
            pool::build(manager, &pool_config, &setup)
        })
        .await??;

        Ok(Self {
            pool,
            placeholder: backend.placeholder,
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&duckdb::Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl Connection for DuckDbConnection {
    async fn query(&self, query: &RenderedQuery) -> Result<Rows> {
        let query = query.clone();
        self.with_conn(move |conn| read_rows(conn, &query)).await
    }

    async fn execute(&self, query: &RenderedQuery) -> Result<()> {
        let query = query.clone();
        self.with_conn(move |conn| {
            if query.params.is_empty() {
                conn.execute_batch(&query.sql)?;
            } else {
                conn.execute(&query.sql, params_from_iter(query.params.iter()))?;
            }
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("SELECT 1")?;
            Ok(())
        })
        .await
    }

    fn placeholder(&self) -> Placeholder {
        self.placeholder
    }
}

fn read_rows(conn: &duckdb::Connection, query: &RenderedQuery) -> Result<Rows> {
    let mut stmt = conn.prepare(&query.sql)?;
    let mut values = Vec::new();
    {
        let mut rows = stmt.query(params_from_iter(query.params.iter()))?;
        while let Some(row) = rows.next()? {
            let width = row.as_ref().column_count();
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                cells.push(convert(row.get::<_, DuckValue>(i)?)?);
            }
            values.push(cells);
        }
    }
    Ok(Rows {
        columns: stmt.column_names(),
        rows: values,
    })
}

fn convert(value: DuckValue) -> Result<Value> {
    Ok(match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(v) => Value::Bool(v),
        DuckValue::TinyInt(v) => Value::Int(v as i64),
        DuckValue::SmallInt(v) => Value::Int(v as i64),
        DuckValue::Int(v) => Value::Int(v as i64),
        DuckValue::BigInt(v) => Value::Int(v),
        DuckValue::HugeInt(v) => Value::Float(v as f64),
        DuckValue::UTinyInt(v) => Value::Int(v as i64),
        DuckValue::USmallInt(v) => Value::Int(v as i64),
        DuckValue::UInt(v) => Value::Int(v as i64),
        DuckValue::UBigInt(v) => Value::Float(v as f64),
        DuckValue::Float(v) => Value::Float(v as f64),
        DuckValue::Double(v) => Value::Float(v),
        DuckValue::Decimal(v) => Value::Float(
            v.to_string()
                .parse()
                .map_err(|_| StoreError::Query(format!("decimal '{}' out of range", v)))?,
        ),
        DuckValue::Timestamp(unit, v) => Value::Timestamp(timestamp(unit, v)?),
        DuckValue::Date32(days) => Value::Timestamp(
            NaiveDate::default()
                .checked_add_signed(chrono::Duration::days(days as i64))
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .ok_or_else(|| StoreError::Query(format!("date {} out of range", days)))?,
        ),
        DuckValue::Text(v) => Value::Text(v),
        other => Value::Text(format!("{:?}", other)),
    })
}

fn timestamp(unit: TimeUnit, value: i64) -> Result<NaiveDateTime> {
    DateTime::from_timestamp_micros(unit.to_micros(value))
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| StoreError::Query(format!("timestamp {} out of range", value)))
}
