//! Connection pool construction shared by the connectors.

use r2d2::{CustomizeConnection, ManageConnection, Pool};
use std::time::Duration;

use crate::config::PoolConfig;
use crate::error::Result;

/// Statements run on every new physical connection.
#[derive(Debug, Clone, Default)]
pub(crate) struct SetupStatements(pub Vec<String>);

/// Builds a pool with the backend's tuning. Blocks until `max_idle`
/// connections are open or the connect timeout expires.
pub(crate) fn build<M>(manager: M, config: &PoolConfig, setup: &[String]) -> Result<Pool<M>>
where
    M: ManageConnection,
    SetupStatements: CustomizeConnection<M::Connection, M::Error>,
{
    let max_size = config.max_open.max(1);
    let pool = Pool::builder()
        .max_size(max_size)
        .min_idle(Some(config.max_idle.min(max_size)))
        .idle_timeout(non_zero_secs(config.idle_timeout_secs))
        .max_lifetime(non_zero_secs(config.lifetime_secs))
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs.max(1)))
        .connection_customizer(Box::new(SetupStatements(setup.to_vec())))
        .build(manager)?;
    Ok(pool)
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_disables_timeouts() {
        assert_eq!(non_zero_secs(0), None);
        assert_eq!(non_zero_secs(5), Some(Duration::from_secs(5)));
    }
}
