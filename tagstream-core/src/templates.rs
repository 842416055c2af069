//! Persisted operator query templates.
//!
//! Templates are named SQL bodies stored in a table of the current backend
//! (`templates_table`, columns `id, name, body`). Executing a template fills
//! its `{key}` placeholders from caller parameters verbatim and runs the
//! result against the backend named by the `db` parameter, or the current
//! backend when none is given. Template bodies and their parameters are
//! operator-owned; they are not escaped.

use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::query::{fill_params, like_pattern};
use crate::registry::StoreRegistry;
use crate::store::Store;
use crate::tags::TabularOutput;

/// Header of the result returned for statements that produce no rows.
pub const AFFECTED_HEADER: &str = "affected";

pub struct TemplateStore {
    table: String,
    home: Arc<Store>,
    registry: Arc<StoreRegistry>,
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl TemplateStore {
    /// Templates live in `table` of the `home` store's backend.
    pub fn new(table: impl Into<String>, home: Arc<Store>, registry: Arc<StoreRegistry>) -> Self {
        Self {
            table: table.into(),
            home,
            registry,
        }
    }

    async fn find(&self, name: &str) -> Result<Option<String>> {
        let sql = format!("SELECT body FROM {} WHERE name = {}", self.table, quote(name));
        let out = self.home.exec_query(&sql).await?;
        Ok(out.rows.into_iter().next().and_then(|row| row.into_iter().next()))
    }

    pub async fn add(&self, name: &str, body: &str) -> Result<()> {
        if name.trim().is_empty() || body.trim().is_empty() {
            return Err(StoreError::Query(
                "template name and body must not be empty".to_string(),
            ));
        }
        if self.find(name).await?.is_some() {
            return Err(StoreError::TemplateExists(name.to_string()));
        }
        let sql = format!(
            "INSERT INTO {} (id, name, body) VALUES ({}, {}, {})",
            self.table,
            quote(&Uuid::new_v4().to_string()),
            quote(name),
            quote(body)
        );
        self.home.exec_statement(&sql).await?;
        info!(template = name, "template added");
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<String> {
        self.find(name)
            .await?
            .ok_or_else(|| StoreError::TemplateNotFound(name.to_string()))
    }

    pub async fn set(&self, name: &str, body: &str) -> Result<()> {
        self.get(name).await?;
        let sql = format!(
            "UPDATE {} SET body = {} WHERE name = {}",
            self.table,
            quote(body),
            quote(name)
        );
        self.home.exec_statement(&sql).await?;
        info!(template = name, "template updated");
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.get(name).await?;
        let sql = format!("DELETE FROM {} WHERE name = {}", self.table, quote(name));
        self.home.exec_statement(&sql).await?;
        info!(template = name, "template deleted");
        Ok(())
    }

    /// Templates whose name starts with `pattern` (`*` and `?` are wildcards).
    pub async fn list(&self, pattern: &str) -> Result<BTreeMap<String, String>> {
        let mut like = if pattern.is_empty() {
            String::new()
        } else {
            like_pattern(pattern)
        };
        like.push('%');
        let sql = format!(
            "SELECT name, body FROM {} WHERE name LIKE {} ORDER BY name",
            self.table,
            quote(&like)
        );
        let out = self.home.exec_query(&sql).await?;
        Ok(out
            .rows
            .into_iter()
            .filter_map(|row| {
                let mut cells = row.into_iter();
                Some((cells.next()?, cells.next().unwrap_or_default()))
            })
            .collect())
    }

    /// Renders a template with `params` and runs it.
    ///
    /// Queries return their rows. Other statements return an empty table with
    /// a single `affected` header.
    pub async fn exec(&self, name: &str, params: &HashMap<String, String>) -> Result<TabularOutput> {
        let body = self.get(name).await?;
        let sql = fill_params(&body, params);

        let store = match params.get("db").map(|db| db.trim()).filter(|db| !db.is_empty()) {
            Some(db) if self.home.backend_name().await.as_deref() != Some(db) => {
                self.registry.open(db).await?
            }
            _ => Arc::clone(&self.home),
        };
        debug!(template = name, sql = %sql, "executing template");

        if returns_rows(&sql) {
            store.exec_query(&sql).await
        } else {
            store.exec_statement(&sql).await?;
            Ok(TabularOutput::with_headers(vec![AFFECTED_HEADER.to_string()]))
        }
    }
}

/// Whether `sql` is a query; SQL the parser does not understand is assumed
/// to be one.
fn returns_rows(sql: &str) -> bool {
    match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => statements
            .last()
            .map_or(true, |stmt| matches!(stmt, Statement::Query(_))),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoCache;
    use crate::tags::{Rows, Value};
    use crate::test_util::{mock_conn, settings, StaticConnector};
    use mockall::Sequence;

    #[test]
    fn test_statement_classification() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!returns_rows("DELETE FROM t WHERE a = 1"));
        assert!(!returns_rows("CREATE TABLE t (a INT)"));
        assert!(returns_rows("SELEKT nothing parses"));
    }

    #[tokio::test]
    async fn test_add_then_exec_issues_filled_sql() {
        let mut conn = mock_conn();
        let mut seq = Sequence::new();
        // add: lookup finds nothing, then insert
        conn.expect_query()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Rows::new(vec!["body".into()])));
        conn.expect_execute()
            .withf(|q| q.sql.starts_with("INSERT INTO runtime.templates") && q.sql.contains("'SELECT {x}'"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        // exec: lookup returns the body, then the filled query runs
        conn.expect_query()
            .withf(|q| q.sql.contains("WHERE name = 't1'"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(Rows {
                    columns: vec!["body".into()],
                    rows: vec![vec![Value::Text("SELECT {x}".into())]],
                })
            });
        conn.expect_query()
            .withf(|q| q.sql == "SELECT 1" && q.params.is_empty())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(Rows {
                    columns: vec!["1".into()],
                    rows: vec![vec![Value::Int(1)]],
                })
            });

        let settings = settings();
        let connector = StaticConnector::new(conn);
        let home = Arc::new(Store::with_connector(settings.clone(), connector.clone()));
        home.connect("mock", Arc::new(NoCache)).await.unwrap();
        let templates = TemplateStore::new(
            "runtime.templates",
            home,
            Arc::new(StoreRegistry::with_connector(settings, connector)),
        );

        templates.add("t1", "SELECT {x}").await.unwrap();
        let mut params = HashMap::new();
        params.insert("x".to_string(), "1".to_string());
        let out = templates.exec("t1", &params).await.unwrap();
        assert_eq!(out.rows, vec![vec!["1".to_string()]]);
    }

    #[tokio::test]
    async fn test_missing_and_duplicate_templates() {
        let mut conn = mock_conn();
        conn.expect_query().returning(|q| {
            if q.sql.contains("'dup'") {
                Ok(Rows {
                    columns: vec!["body".into()],
                    rows: vec![vec![Value::Text("SELECT 2".into())]],
                })
            } else {
                Ok(Rows::new(vec!["body".into()]))
            }
        });
        conn.expect_execute().never();

        let settings = settings();
        let connector = StaticConnector::new(conn);
        let home = Arc::new(Store::with_connector(settings.clone(), connector.clone()));
        home.connect("mock", Arc::new(NoCache)).await.unwrap();
        let templates = TemplateStore::new(
            "runtime.templates",
            home,
            Arc::new(StoreRegistry::with_connector(settings, connector)),
        );

        assert_eq!(
            templates.add("dup", "SELECT 3").await,
            Err(StoreError::TemplateExists("dup".into()))
        );
        assert_eq!(
            templates.get("gone").await,
            Err(StoreError::TemplateNotFound("gone".into()))
        );
        assert_eq!(
            templates.set("gone", "SELECT 1").await,
            Err(StoreError::TemplateNotFound("gone".into()))
        );
        assert!(templates.add("", "SELECT 1").await.is_err());
        assert!(templates.add("x", "  ").await.is_err());
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("it's"), "'it''s'");
    }
}
