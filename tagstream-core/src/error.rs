//! Error taxonomy for the tag store.
//!
//! Every data operation returns [`StoreError`]. Cache failures never surface
//! here: caches report a miss and the store falls through to the backend.
//! Driver errors are flattened to strings so the error stays `Clone`, which
//! lets the concurrent range fetch hand the first failure back to the caller.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// A date could not be parsed, is empty, or lies in the future.
    #[error("date is not valid")]
    InvalidDate,

    /// A numeric input could not be parsed.
    #[error("not a float")]
    NotAFloat,

    /// The store has no live connection.
    #[error("db connection failed")]
    DbConnectionFailed,

    /// The backend rejected a statement or returned malformed rows.
    #[error("query error: {0}")]
    Query(String),

    /// The current backend has no query template under this name.
    #[error("query '{0}' is not configured for the current backend")]
    QueryNotConfigured(String),

    /// Unrecognised group function.
    #[error("group error: unknown group function '{0}'")]
    GroupError(String),

    #[error("count is empty")]
    CountIsEmpty,

    #[error("count is less than 1")]
    CountIsLessThanOne,

    #[error("backend '{0}' not found")]
    BackendNotFound(String),

    #[error("cache '{0}' not found")]
    CacheNotFound(String),

    #[error("unsupported technology '{0}'")]
    UnsupportedTechnology(String),

    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    #[error("template '{0}' already exists")]
    TemplateExists(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Internal to the cache layer, logged and never returned by the store.
    #[error("cache error: {0}")]
    Cache(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("pool error: {0}")]
    Pool(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<duckdb::Error> for StoreError {
    fn from(err: duckdb::Error) -> Self {
        StoreError::Driver(err.to_string())
    }
}

impl From<adbc_core::error::Error> for StoreError {
    fn from(err: adbc_core::error::Error) -> Self {
        StoreError::Driver(err.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Pool(err.to_string())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Cache(err.to_string())
    }
}

impl From<config::ConfigError> for StoreError {
    fn from(err: config::ConfigError) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Internal(err.to_string())
    }
}
