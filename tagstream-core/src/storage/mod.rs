//! Backend connectors.
//!
//! This module provides two connection implementations behind one contract:
//! - `duckdb`: embedded analytical engine through the native driver
//! - `adbc`: Arrow Database Connectivity for the conventional relational
//!   engines (PostgreSQL, MySQL, SQL Server, SQLite)
//!
//! Both keep an r2d2 pool of physical connections and run every driver call
//! on the blocking thread pool, so concurrent store operations do not queue
//! behind a single connection.

pub mod adbc;
pub mod duckdb;
mod pool;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::{BackendConfig, Technology};
use crate::error::Result;
use crate::query::{Placeholder, RenderedQuery};
use crate::tags::Rows;

pub use self::adbc::AdbcConnection;
pub use self::duckdb::DuckDbConnection;

/// A live, pooled connection to one backend.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Runs a statement returning rows.
    async fn query(&self, query: &RenderedQuery) -> Result<Rows>;

    /// Runs a statement for its side effects.
    async fn execute(&self, query: &RenderedQuery) -> Result<()>;

    /// Checks the backend answers.
    async fn ping(&self) -> Result<()>;

    /// Placeholder style this connection can bind.
    fn placeholder(&self) -> Placeholder;
}

/// Opens connections for backend configurations.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, backend: &BackendConfig) -> Result<Arc<dyn Connection>>;
}

/// Connector dispatching on the backend's technology.
#[derive(Debug, Default, Clone)]
pub struct DriverConnector;

#[async_trait]
impl Connector for DriverConnector {
    async fn connect(&self, backend: &BackendConfig) -> Result<Arc<dyn Connection>> {
        let conn: Arc<dyn Connection> = match backend.technology {
            Technology::Duckdb => Arc::new(DuckDbConnection::open(backend).await?),
            Technology::Mssql | Technology::Mysql | Technology::Postgres | Technology::Sqlite => {
                Arc::new(AdbcConnection::open(backend).await?)
            }
        };
        conn.ping().await?;
        info!(
            backend = %backend.name,
            technology = backend.technology.as_str(),
            max_open = backend.pool.max_open,
            "connection pool ready"
        );
        Ok(conn)
    }
}
