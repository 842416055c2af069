/*!
# tagstream-core: tag time-series access over interchangeable SQL backends

tagstream-core retrieves, time-buckets, aggregates and caches timestamped
measurement points ("tags") kept in relational historians. The same
operations run against PostgreSQL, MySQL, SQL Server and SQLite through ADBC
drivers, or against an embedded DuckDB database, selected by configuration.

## Key Features

### Multi-Backend Access
- One connection contract for every backend technology
- Per-backend SQL templates, so each historian schema keeps its own queries
- Bound statement parameters where the driver supports them
- Pooled connections with configurable idle, lifetime and connect limits

### Cache-Aside Reads
- Point values keyed by `(tag, timestamp)`, aggregates by `(tag, range)`
- In-process caches with striped locks, or Redis with a sliding TTL
- A cache that is down behaves as empty; it never fails a request

### Windowed Aggregation
- `avg`, `sum`, `min`, `max`, `dif` and `count` pushed to the backend
- `avgm` averaged locally from one raw range fetch
- Even sampling and sub-window bucketing of arbitrary ranges
- Concurrent multi-tag range reads with a bounded fan-out

### Operator Templates
- Named SQL templates persisted in the backend
- Execution against any configured backend through long-lived stores

## Usage

```rust,no_run
use std::sync::Arc;
use tagstream_core::cache;
use tagstream_core::config::{CliArgs, Settings};
use tagstream_core::dates::parse_date;
use tagstream_core::store::Store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Arc::new(Settings::new(&CliArgs::default())?);
    let cache = cache::from_config(&settings.current_cache_config()?).await?;

    let store = Store::new(settings.clone());
    store.connect(&settings.current_backend, cache).await?;

    let from = parse_date("2024-01-01 00:00:00", &settings.date_formats)?;
    let to = parse_date("2024-01-02 00:00:00", &settings.date_formats)?;
    let hourly = store.get_tag_count_group("TI-101,TI-102", from, to, 24, "avg").await?;
    for tag in hourly.iter() {
        println!("{} {} {:?}", tag.name, tag.date, tag.value);
    }
    Ok(())
}
```

For detailed configuration options and examples, see:
- [`config`](crate::config) module for configuration options
- [`storage`](crate::storage) module for backend connector details
*/

pub mod aggregation;
pub mod cache;
pub mod config;
pub mod dates;
pub mod error;
pub mod query;
pub mod registry;
pub mod storage;
pub mod store;
pub mod tags;
pub mod templates;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::{Result, StoreError};
pub use registry::StoreRegistry;
pub use store::Store;
pub use tags::{BackendStatus, TabularOutput, Tag, Tags};
pub use templates::TemplateStore;
