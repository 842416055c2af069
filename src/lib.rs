//! tagstream: tag time-series service
//!
//! This crate wires the `tagstream-core` store into a service context that
//! owns configuration, cache and backend connections, accepts request inputs
//! as strings (tag lists, dates in configured formats or Excel serial days,
//! counts, group functions) and returns rounded, serializable results.
//!
//! # Example
//!
//! ```rust,no_run
//! use tagstream::TagService;
//! use tagstream_core::config::{CliArgs, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load layered configuration
//!     let settings = Settings::new(&CliArgs::default())?;
//!
//!     // Connect the current backend and cache
//!     let service = TagService::new(settings).await?;
//!
//!     // Hourly averages for two tags over one day
//!     let hourly = service
//!         .tag_count_group("TI-101,TI-102", "2024-01-01 00:00:00", "2024-01-02 00:00:00", "24", "avg", None)
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&hourly)?);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod service;
mod tests;

pub use service::{Context, TagService};
