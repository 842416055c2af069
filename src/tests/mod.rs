#[cfg(test)]
mod tests {
    use crate::service::TagService;
    use async_trait::async_trait;
    use mockall::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tagstream_core::config::{BackendConfig, Settings};
    use tagstream_core::query::{Placeholder, RenderedQuery};
    use tagstream_core::storage::{Connection, Connector};
    use tagstream_core::tags::{Rows, Value};
    use tagstream_core::{Result, StoreError};
    use tokio_test::{assert_err, assert_ok};

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

    mock! {
        pub Connector {}

        #[async_trait]
        impl Connector for Connector {
            async fn connect(&self, backend: &BackendConfig) -> Result<Arc<dyn Connection>>;
        }
    }

    const SETTINGS: &str = r#"
        round = 2
        current_backend = "mock"
        current_cache = "memory"
        date_formats = ["%Y-%m-%d %H:%M:%S", "%d.%m.%Y %H:%M:%S"]

        [[backends]]
        name = "mock"
        technology = "postgres"
        host = ""

        [backends.query]
        get_tag_date = "SELECT value FROM t WHERE name = '{tag}' AND date <= '{date}'"
        get_tag_from_to = "SELECT name, date, value FROM t WHERE name = '{tag}' AND date >= '{from}' AND date < '{to}'"
        get_tag_from_to_group = "SELECT {group}(value) FROM t WHERE name = '{tag}' AND date >= '{from}' AND date < '{to}'"
        status = "SELECT 'v1', 0"

        [[caches]]
        name = "memory"
        technology = "memory"

        [[caches]]
        name = "down"
        technology = "redis"
        host = "127.0.0.1"
        port = 1
    "#;

    fn settings() -> Settings {
        Settings::from_toml_str(SETTINGS).unwrap()
    }

    fn value(v: f64) -> Rows {
        Rows {
            columns: vec!["value".into()],
            rows: vec![vec![Value::Float(v)]],
        }
    }

    fn conn_returning(v: f64) -> Arc<dyn Connection> {
        let mut conn = MockConn::new();
        conn.expect_placeholder().return_const(Placeholder::Question);
        conn.expect_query().returning(move |_| Ok(value(v)));
        Arc::new(conn)
    }

    fn connector_for(conn: Arc<dyn Connection>) -> Arc<MockConnector> {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .returning(move |_| Ok(Arc::clone(&conn)));
        Arc::new(connector)
    }

    #[tokio::test]
    async fn test_tag_date_parses_and_rounds() {
        let mut conn = MockConn::new();
        conn.expect_placeholder().return_const(Placeholder::Question);
        conn.expect_query()
            .withf(|q| q.params == vec!["A".to_string(), "2024-01-01 06:30:00".to_string()])
            .times(1)
            .returning(|_| Ok(value(1.23456)));

        let service = TagService::with_connector(settings(), connector_for(Arc::new(conn)))
            .await
            .unwrap();

        let tags = service.tag_date("A", "01.01.2024 06:30:00", None).await.unwrap();
        assert_eq!(tags.0[0].value, Some(1.23));

        // second read is served from the memory cache with a per-call precision
        let tags = service.tag_date("A", "2024-01-01 06:30:00", Some(3)).await.unwrap();
        assert_eq!(tags.0[0].value, Some(1.235));
    }

    #[tokio::test]
    async fn test_excel_serial_dates() {
        let mut conn = MockConn::new();
        conn.expect_placeholder().return_const(Placeholder::Question);
        conn.expect_query()
            .withf(|q| q.params[1] == "2024-01-01 12:00:00")
            .times(1)
            .returning(|_| Ok(value(7.0)));

        let service = TagService::with_connector(settings(), connector_for(Arc::new(conn)))
            .await
            .unwrap();
        let tags = service.tag_date("B", "45292,5", None).await.unwrap();
        assert_eq!(tags.0[0].value, Some(7.0));
    }

    #[tokio::test]
    async fn test_bad_inputs_never_reach_backend() {
        let mut conn = MockConn::new();
        conn.expect_placeholder().return_const(Placeholder::Question);
        conn.expect_query().never();

        let service = TagService::with_connector(settings(), connector_for(Arc::new(conn)))
            .await
            .unwrap();

        assert_eq!(
            service.tag_date("A", "yesterday 10:00", None).await,
            Err(StoreError::InvalidDate)
        );
        assert_eq!(
            service.tag_date("A", "", None).await,
            Err(StoreError::InvalidDate)
        );
        assert_eq!(
            service
                .tag_count("A", "2024-01-01 00:00:00", "2024-01-01 01:00:00", "", None)
                .await,
            Err(StoreError::CountIsEmpty)
        );
        assert_eq!(
            service
                .tag_count("A", "2024-01-01 00:00:00", "2024-01-01 01:00:00", "many", None)
                .await,
            Err(StoreError::NotAFloat)
        );
        assert_eq!(
            service
                .tag_count_group("A", "2024-01-01 00:00:00", "2024-01-01 01:00:00", "0", "avg", None)
                .await,
            Err(StoreError::CountIsEmpty)
        );
        assert_eq!(
            service
                .tag_from_to_group("A", "2024-01-01 00:00:00", "2024-01-01 01:00:00", "median", None)
                .await,
            Err(StoreError::GroupError("median".into()))
        );
    }

    #[tokio::test]
    async fn test_group_per_tag_dated_at_range_end() {
        let service = TagService::with_connector(settings(), connector_for(conn_returning(2.0 / 3.0)))
            .await
            .unwrap();

        let tags = service
            .tag_from_to_group("A, B", "2024-01-01 00:00:00", "2024-01-01 01:00:00", "avg", Some(1))
            .await
            .unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.0[1].name, "B");
        assert_eq!(tags.0[1].date.to_string(), "2024-01-01 01:00:00");
        assert_eq!(tags.0[1].value, Some(0.7));

        let samples = service
            .tag_count("A", "2024-01-01 00:00:00", "2024-01-01 00:01:00", "3", None)
            .await
            .unwrap();
        assert_eq!(samples["A"].len(), 3);
        assert!(samples["A"].values().all(|v| *v == Some(0.67)));
    }

    #[tokio::test]
    async fn test_unreachable_cache_falls_back_to_no_cache() {
        let mut settings = settings();
        settings.current_cache = "down".to_string();

        let service = TagService::with_connector(settings, connector_for(conn_returning(1.0)))
            .await
            .unwrap();
        assert_eq!(service.context().await.cache.name(), "none");
        assert_ok!(service.tag_date("A", "2024-01-01 00:00:00", None).await);
    }

    #[tokio::test]
    async fn test_reload_keeps_last_good_context() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let conn = conn_returning(1.0);
        let mut connector = MockConnector::new();
        connector.expect_connect().returning(move |_| {
            match seen.fetch_add(1, Ordering::SeqCst) {
                1 => Err(StoreError::DbConnectionFailed),
                _ => Ok(Arc::clone(&conn)),
            }
        });

        let service = TagService::with_connector(settings(), Arc::new(connector))
            .await
            .unwrap();

        let mut next = settings();
        next.round = 4;
        assert_err!(service.reload(next.clone()).await);
        assert_eq!(service.settings().await.round, 2);
        assert_ok!(service.status().await);

        assert_ok!(service.reload(next).await);
        assert_eq!(service.settings().await.round, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_template_exec_through_service() {
        let mut conn = MockConn::new();
        conn.expect_placeholder().return_const(Placeholder::Question);
        conn.expect_query().returning(|q| {
            if q.sql.contains("FROM runtime.templates") {
                Ok(Rows {
                    columns: vec!["body".into()],
                    rows: vec![vec![Value::Text("SELECT {n} AS n".into())]],
                })
            } else {
                assert_eq!(q.sql, "SELECT 5 AS n");
                Ok(Rows {
                    columns: vec!["n".into()],
                    rows: vec![vec![Value::Int(5)]],
                })
            }
        });

        let service = TagService::with_connector(settings(), connector_for(Arc::new(conn)))
            .await
            .unwrap();
        let mut params = HashMap::new();
        params.insert("n".to_string(), "5".to_string());
        let out = service.template_exec("five", &params).await.unwrap();
        assert_eq!(out.headers, vec!["n"]);
        assert_eq!(out.rows, vec![vec!["5".to_string()]]);

        service.shutdown().await;
        assert_eq!(
            service.status().await,
            Err(StoreError::DbConnectionFailed)
        );
    }
}
