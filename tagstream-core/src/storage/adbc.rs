//! ADBC (Arrow Database Connectivity) connector.
//!
//! Reaches the conventional relational engines through their ADBC drivers:
//! - `postgres` (`adbc_driver_postgresql`)
//! - `sqlite` (`adbc_driver_sqlite`)
//! - `mssql`, `mysql` (any ADBC-compliant driver, e.g. through Flight SQL)
//!
//! # Configuration
//!
//! ```toml
//! [[backends]]
//! name = "plant"
//! technology = "postgres"
//! host = "historian.local"
//! port = 5432
//! database = "plant"
//! connection_string = "postgresql://{host}:{port}/{database}"
//! driver = "/usr/local/lib/libadbc_driver_postgresql.so"   # or a driver name
//! ```
//!
//! For security, credentials should be provided via environment variables:
//! ```bash
//! export TAGSTREAM_DB_USER=reader
//! export TAGSTREAM_DB_PASSWORD=secret
//! ```
//!
//! Statements are sent as text. Value placeholders are rendered literally
//! with quotes escaped, whatever placeholder style the backend configures.

use adbc_core::{
    driver_manager::{ManagedConnection, ManagedDatabase, ManagedDriver},
    error::{Error as AdbcError, Status as AdbcStatus},
    options::{AdbcVersion, OptionDatabase, OptionValue},
    Connection as _, Database as _, Driver as _, Optionable as _, Statement as _,
};
use arrow::util::display::array_value_to_string;
use arrow_array::cast::AsArray;
use arrow_array::types::{
    Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType, UInt16Type,
    UInt32Type, UInt64Type, UInt8Type,
};
use arrow_array::{Array, RecordBatchReader};
use arrow_schema::{DataType, TimeUnit};
use async_trait::async_trait;
use r2d2::{CustomizeConnection, ManageConnection, Pool};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::pool::{self, SetupStatements};
use super::Connection;
use crate::config::BackendConfig;
use crate::error::{Result, StoreError};
use crate::query::{Placeholder, RenderedQuery};
use crate::tags::{Rows, Value};

impl CustomizeConnection<ManagedConnection, AdbcError> for SetupStatements {
    fn on_acquire(&self, conn: &mut ManagedConnection) -> std::result::Result<(), AdbcError> {
        for sql in &self.0 {
            let mut stmt = conn.new_statement()?;
            stmt.set_sql_query(sql)?;
            stmt.execute_update()?;
        }
        Ok(())
    }
}

/// r2d2 manager handing out connections of one ADBC database.
pub struct AdbcConnectionManager {
    database: Mutex<ManagedDatabase>,
}

impl AdbcConnectionManager {
    /// Loads the driver and configures the database handle.
    pub fn new(backend: &BackendConfig) -> Result<Self> {
        let driver_ref = backend.driver().ok_or_else(|| {
            StoreError::UnsupportedTechnology(backend.technology.as_str().to_string())
        })?;
        let mut driver = if is_library_path(&driver_ref) {
            ManagedDriver::load_dynamic_from_filename(&driver_ref, None, AdbcVersion::V100)?
        } else {
            ManagedDriver::load_dynamic_from_name(&driver_ref, None, AdbcVersion::V100)?
        };

        let mut database = driver.new_database()?;
        database.set_option(
            OptionDatabase::Uri,
            OptionValue::String(backend.connection_string()),
        )?;
        if !backend.user.is_empty() {
            database.set_option(
                OptionDatabase::Username,
                OptionValue::String(backend.user.clone()),
            )?;
        }
        if !backend.password.is_empty() {
            database.set_option(
                OptionDatabase::Password,
                OptionValue::String(backend.password.clone()),
            )?;
        }

        Ok(Self {
            database: Mutex::new(database),
        })
    }
}

fn is_library_path(driver: &str) -> bool {
    driver.contains('/')
        || driver.contains('\\')
        || [".so", ".dylib", ".dll"].iter().any(|ext| driver.ends_with(ext))
}

impl ManageConnection for AdbcConnectionManager {
    type Connection = ManagedConnection;
    type Error = AdbcError;

    fn connect(&self) -> std::result::Result<ManagedConnection, AdbcError> {
        let mut database = self.database.lock().map_err(|_| {
            AdbcError::with_message_and_status("database handle poisoned", AdbcStatus::Internal)
        })?;
        database.new_connection()
    }

    fn is_valid(&self, conn: &mut ManagedConnection) -> std::result::Result<(), AdbcError> {
        let mut stmt = conn.new_statement()?;
        stmt.set_sql_query("SELECT 1")?;
        for batch in stmt.execute()? {
            batch.map_err(|e| {
                AdbcError::with_message_and_status(e.to_string(), AdbcStatus::IO)
            })?;
        }
        Ok(())
    }

    fn has_broken(&self, _conn: &mut ManagedConnection) -> bool {
        false
    }
}

/// Pooled ADBC connection.
#[derive(Clone)]
pub struct AdbcConnection {
    pool: Pool<AdbcConnectionManager>,
}

impl AdbcConnection {
    pub async fn open(backend: &BackendConfig) -> Result<Self> {
        if backend.placeholder != Placeholder::Literal {
            warn!(
                backend = %backend.name,
                "ADBC statements are sent as text, rendering placeholders literally"
            );
        }
        let backend = backend.clone();
        debug!(backend = %backend.name, technology = backend.technology.as_str(), "opening adbc");

        let pool = tokio::task::spawn_blocking(move || {
            let manager = AdbcConnectionManager::new(&backend)?;
            pool::build(manager, &backend.pool, &backend.setup)
        })
        .await??;

        Ok(Self { pool })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ManagedConnection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl Connection for AdbcConnection {
    async fn query(&self, query: &RenderedQuery) -> Result<Rows> {
        let sql = query.sql.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.new_statement()?;
            stmt.set_sql_query(&sql)?;
            let rows = read_batches(stmt.execute()?);
            rows
        })
        .await
    }

    async fn execute(&self, query: &RenderedQuery) -> Result<()> {
        let sql = query.sql.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.new_statement()?;
            stmt.set_sql_query(&sql)?;
            stmt.execute_update()?;
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        // checkout runs `is_valid` on the connection
        self.with_conn(|_| Ok(())).await
    }

    fn placeholder(&self) -> Placeholder {
        Placeholder::Literal
    }
}

/// Collects every batch of `reader` into rows, named by the reader's schema.
fn read_batches(reader: impl RecordBatchReader) -> Result<Rows> {
    let mut rows = Rows::new(
        reader
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect(),
    );
    for batch in reader {
        let batch = batch.map_err(|e| StoreError::Driver(e.to_string()))?;
        for i in 0..batch.num_rows() {
            let row = batch
                .columns()
                .iter()
                .map(|col| cell(col.as_ref(), i))
                .collect::<Result<Vec<_>>>()?;
            rows.rows.push(row);
        }
    }
    Ok(rows)
}

/// Reads row `i` of an arrow column into a [`Value`].
fn cell(array: &dyn Array, i: usize) -> Result<Value> {
    if array.is_null(i) {
        return Ok(Value::Null);
    }
    let value = match array.data_type() {
        DataType::Boolean => Value::Bool(array.as_boolean().value(i)),
        DataType::Int8 => Value::Int(array.as_primitive::<Int8Type>().value(i) as i64),
        DataType::Int16 => Value::Int(array.as_primitive::<Int16Type>().value(i) as i64),
        DataType::Int32 => Value::Int(array.as_primitive::<Int32Type>().value(i) as i64),
        DataType::Int64 => Value::Int(array.as_primitive::<Int64Type>().value(i)),
        DataType::UInt8 => Value::Int(array.as_primitive::<UInt8Type>().value(i) as i64),
        DataType::UInt16 => Value::Int(array.as_primitive::<UInt16Type>().value(i) as i64),
        DataType::UInt32 => Value::Int(array.as_primitive::<UInt32Type>().value(i) as i64),
        DataType::UInt64 => Value::Float(array.as_primitive::<UInt64Type>().value(i) as f64),
        DataType::Float32 => Value::Float(array.as_primitive::<Float32Type>().value(i) as f64),
        DataType::Float64 => Value::Float(array.as_primitive::<Float64Type>().value(i)),
        DataType::Utf8 => Value::Text(array.as_string::<i32>().value(i).to_string()),
        DataType::LargeUtf8 => Value::Text(array.as_string::<i64>().value(i).to_string()),
        DataType::Timestamp(unit, _) => {
            let ts = match unit {
                TimeUnit::Second => array.as_primitive::<TimestampSecondType>().value_as_datetime(i),
                TimeUnit::Millisecond => {
                    array.as_primitive::<TimestampMillisecondType>().value_as_datetime(i)
                }
                TimeUnit::Microsecond => {
                    array.as_primitive::<TimestampMicrosecondType>().value_as_datetime(i)
                }
                TimeUnit::Nanosecond => {
                    array.as_primitive::<TimestampNanosecondType>().value_as_datetime(i)
                }
            };
            ts.map(Value::Timestamp).unwrap_or(Value::Null)
        }
        _ => Value::Text(
            array_value_to_string(array, i).map_err(|e| StoreError::Driver(e.to_string()))?,
        ),
    };
    Ok(value)
}
