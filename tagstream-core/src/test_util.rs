//! Mocks and fixtures shared by the unit tests.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use mockall::mock;
use std::sync::{Arc, Mutex};

use crate::config::{BackendConfig, Settings};
use crate::error::{Result, StoreError};
use crate::query::{Placeholder, RenderedQuery};
use crate::storage::{Connection, Connector};
use crate::tags::Rows;

mock! {
    pub Conn {}

    #[async_trait]
    impl Connection for Conn {
        async fn query(&self, query: &RenderedQuery) -> Result<Rows>;
        async fn execute(&self, query: &RenderedQuery) -> Result<()>;
        async fn ping(&self) -> Result<()>;
        fn placeholder(&self) -> Placeholder;
    }
}

/// A mock connection binding `?` parameters.
pub fn mock_conn() -> MockConn {
    let mut conn = MockConn::new();
    conn.expect_placeholder().return_const(Placeholder::Question);
    conn
}

/// Hands out one prepared connection, once.
pub struct StaticConnector {
    conn: Mutex<Option<Arc<dyn Connection>>>,
}

impl StaticConnector {
    pub fn new(conn: MockConn) -> Arc<Self> {
        Self::with_connection(Arc::new(conn))
    }

    pub fn with_connection(conn: Arc<dyn Connection>) -> Arc<Self> {
        Arc::new(Self {
            conn: Mutex::new(Some(conn)),
        })
    }
}

#[async_trait]
impl Connector for StaticConnector {
    async fn connect(&self, _backend: &BackendConfig) -> Result<Arc<dyn Connection>> {
        self.conn
            .lock()
            .unwrap()
            .take()
            .ok_or(StoreError::DbConnectionFailed)
    }
}

pub const SETTINGS: &str = r#"
    current_backend = "mock"

    [[backends]]
    name = "mock"
    technology = "sqlite"

    [backends.query]
    get_tag_date = "SELECT value FROM t WHERE name = '{tag}' AND date <= '{date}'"
    get_tag_from_to = "SELECT name, date, value FROM t WHERE name = '{tag}' AND date >= '{from}' AND date < '{to}'"
    get_tag_from_to_group = "SELECT {group}(value) FROM t WHERE name = '{tag}' AND date >= '{from}' AND date < '{to}'"
    get_tag_from_to_group_dif = "SELECT max(value) - min(value) FROM t WHERE name = '{tag}' AND date >= '{from}' AND date < '{to}'"
    get_tag_from_to_group_count = "SELECT count(value) FROM t WHERE name = '{tag}' AND date >= '{from}' AND date < '{to}'"
    get_tag_list = "SELECT DISTINCT name FROM t WHERE name LIKE '{tag}'"
    get_down_dates = "SELECT date FROM t WHERE name = '{tag}' AND value = 0 AND date >= '{from}' AND date < '{to}'"
    status = "SELECT 'v1', 0"
"#;

pub fn settings() -> Arc<Settings> {
    Arc::new(Settings::from_toml_str(SETTINGS).unwrap())
}

pub fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}
