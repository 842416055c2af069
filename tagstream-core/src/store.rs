//! The tag store: query rendering, cache-aside reads and aggregation over
//! one live backend connection.
//!
//! A [`Store`] is either disconnected or holds a [`Session`]: the backend
//! configuration, its pooled connection, the rendered query registry and a
//! cache handle. Data operations take the session under a read lock for
//! their whole duration; [`Store::connect`] takes the write lock, so a
//! reconnect waits for in-flight operations and never exposes a half-open
//! connection.

use chrono::{Local, NaiveDateTime};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::aggregation::{buckets, check_count, range_key, sample_points, GroupFunction};
use crate::cache::Cache;
use crate::config::{BackendConfig, Settings};
use crate::dates::format_canonical;
use crate::error::{Result, StoreError};
use crate::query::{like_pattern, QueryArgs, QueryName, QueryRegistry, RenderedQuery};
use crate::storage::{Connection, Connector, DriverConnector};
use crate::tags::{BackendStatus, Rows, TabularOutput, Tag, Tags, Value};

/// Sampled values per tag, keyed by sample instant.
pub type TagSamples = BTreeMap<String, BTreeMap<NaiveDateTime, Option<f32>>>;

/// Splits a comma-separated tag list, dropping blank names.
pub fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// A live connection to one backend together with its cache.
pub struct Session {
    backend: BackendConfig,
    conn: Arc<dyn Connection>,
    queries: QueryRegistry,
    cache: Arc<dyn Cache>,
    connected_at: Instant,
}

impl Session {
    fn render(&self, name: QueryName, args: QueryArgs) -> Result<RenderedQuery> {
        self.queries.render(name, &args)
    }

    fn range_args(tag: &str, from: NaiveDateTime, to: NaiveDateTime) -> QueryArgs {
        QueryArgs::new()
            .value("tag", tag)
            .value("from", format_canonical(from))
            .value("to", format_canonical(to))
    }

    async fn tag_date(&self, tag: &str, date: NaiveDateTime) -> Result<Tag> {
        if date > Local::now().naive_local() {
            return Err(StoreError::InvalidDate);
        }
        if let Some(value) = self.cache.get(tag, date).await {
            return Ok(Tag::new(tag, date, Some(value)));
        }

        let query = self.render(
            QueryName::GetTagDate,
            QueryArgs::new()
                .value("tag", tag)
                .value("date", format_canonical(date)),
        )?;
        let rows = self.conn.query(&query).await?;
        let value = rows.first().and_then(|row| row.last()).and_then(Value::as_f32);
        if let Some(value) = value {
            self.cache.set(tag, date, value).await;
        }
        Ok(Tag::new(tag, date, value))
    }

    async fn tag_range(&self, tag: &str, from: NaiveDateTime, to: NaiveDateTime) -> Result<Tags> {
        let query = self.render(QueryName::GetTagFromTo, Self::range_args(tag, from, to))?;
        self.conn.query(&query).await?.into_tags()
    }

    async fn tag_group(
        &self,
        tag: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
        group: GroupFunction,
    ) -> Result<f32> {
        let key = range_key(from, to, group);
        if let Some(value) = self.cache.get_str(tag, &key).await {
            return Ok(value);
        }

        let value = match group.query_name() {
            None => self.tag_range(tag, from, to).await?.average(tag).unwrap_or(0.0),
            Some(name) => {
                let args = Self::range_args(tag, from, to).structural("group", group.sql_keyword());
                let rows = self.conn.query(&self.render(name, args)?).await?;
                first_cell(&rows).and_then(Value::as_f32).unwrap_or(0.0)
            }
        };
        self.cache.set_str(tag, &key, value).await;
        Ok(value)
    }

    /// Per-window averages from one raw range fetch, cached per window.
    async fn tag_avgm_buckets(
        &self,
        tag: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
        count: usize,
    ) -> Result<Tags> {
        let windows = buckets(from, to, count);
        let mut cached = Vec::with_capacity(windows.len());
        for window in &windows {
            let key = range_key(window.from, window.to, GroupFunction::Avgm);
            cached.push(self.cache.get_str(tag, &key).await);
        }
        if cached.iter().all(Option::is_some) {
            return Ok(windows
                .iter()
                .zip(cached)
                .map(|(w, v)| Tag::new(tag, w.to, v))
                .collect());
        }

        let raw = self.tag_range(tag, from, to).await?;
        for point in raw.iter() {
            if let Some(value) = point.value {
                self.cache.set(tag, point.date, value).await;
            }
        }

        let mut out = Tags::new();
        for (window, hit) in windows.iter().zip(cached) {
            let value = match hit {
                Some(value) => value,
                None => {
                    let value = raw.window(window.from, window.to).average(tag).unwrap_or(0.0);
                    let key = range_key(window.from, window.to, GroupFunction::Avgm);
                    self.cache.set_str(tag, &key, value).await;
                    value
                }
            };
            out.push(Tag::new(tag, window.to, Some(value)));
        }
        Ok(out)
    }

    async fn dates(
        &self,
        name: QueryName,
        tag: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<NaiveDateTime>> {
        let query = self.render(name, Self::range_args(tag, from, to))?;
        self.conn.query(&query).await?.into_dates()
    }
}

fn first_cell(rows: &Rows) -> Option<&Value> {
    rows.first().and_then(|row| row.first())
}

/// Sampling and bucketing need a non-empty range.
fn check_range(from: NaiveDateTime, to: NaiveDateTime) -> Result<()> {
    if from >= to {
        return Err(StoreError::InvalidDate);
    }
    Ok(())
}

/// Tag store bound to at most one backend at a time.
pub struct Store {
    settings: Arc<Settings>,
    connector: Arc<dyn Connector>,
    session: RwLock<Option<Arc<Session>>>,
}

impl Store {
    /// Creates a disconnected store using the native connectors.
    pub fn new(settings: Arc<Settings>) -> Self {
        Self::with_connector(settings, Arc::new(DriverConnector))
    }

    pub fn with_connector(settings: Arc<Settings>, connector: Arc<dyn Connector>) -> Self {
        Self {
            settings,
            connector,
            session: RwLock::new(None),
        }
    }

    /// Connects to the named backend, replacing any current connection.
    ///
    /// The old connection is dropped before the new one is opened. On failure
    /// the store is left disconnected.
    pub async fn connect(&self, backend_name: &str, cache: Arc<dyn Cache>) -> Result<()> {
        let backend = self.settings.backend(backend_name)?.clone();
        let mut session = self.session.write().await;
        if let Some(old) = session.take() {
            info!(backend = %old.backend.name, "closing connection");
        }

        let addrs = resolve(&backend).await;
        info!(
            backend = %backend.name,
            technology = backend.technology.as_str(),
            host = %backend.host,
            resolved = ?addrs,
            cache = cache.name(),
            "connecting"
        );

        let conn = match self.connector.connect(&backend).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(backend = %backend.name, error = %e, "connection failed");
                return Err(e);
            }
        };
        let queries = QueryRegistry::new(backend.query.clone(), conn.placeholder());
        *session = Some(Arc::new(Session {
            backend,
            conn,
            queries,
            cache,
            connected_at: Instant::now(),
        }));
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(old) = self.session.write().await.take() {
            info!(backend = %old.backend.name, "disconnected");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    pub async fn backend_name(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.backend.name.clone())
    }

    /// Value of `tag` at `date`.
    pub async fn get_tag_date(&self, tag: &str, date: NaiveDateTime) -> Result<Tag> {
        debug!(tag, date = %date, "get_tag_date");
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(StoreError::DbConnectionFailed)?;
        session.tag_date(tag, date).await
    }

    /// `count` instantaneous samples per tag, evenly spaced from `from`.
    ///
    /// `from` must be strictly before `to`; an empty range is rejected with
    /// [`StoreError::InvalidDate`].
    pub async fn get_tag_count(
        &self,
        tags: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
        count: i64,
    ) -> Result<TagSamples> {
        let count = check_count(count)?;
        check_range(from, to)?;
        debug!(tags, from = %from, to = %to, count, "get_tag_count");
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(StoreError::DbConnectionFailed)?;

        let points = sample_points(from, to, count);
        let mut out = TagSamples::new();
        for tag in split_tags(tags) {
            let mut samples = BTreeMap::new();
            for &point in &points {
                samples.insert(point, session.tag_date(&tag, point).await?.value);
            }
            out.insert(tag, samples);
        }
        Ok(out)
    }

    /// One aggregate per sub-window and tag, dated at the sub-window end.
    ///
    /// A sub-window whose query fails yields `None` instead of failing the
    /// whole request.
    pub async fn get_tag_count_group(
        &self,
        tags: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
        count: i64,
        group: &str,
    ) -> Result<Tags> {
        let count = check_count(count)?;
        let group: GroupFunction = group.parse()?;
        check_range(from, to)?;
        debug!(tags, from = %from, to = %to, count, group = %group, "get_tag_count_group");
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(StoreError::DbConnectionFailed)?;

        let mut out = Tags::new();
        for tag in split_tags(tags) {
            if group.is_local() {
                match session.tag_avgm_buckets(&tag, from, to, count).await {
                    Ok(tags) => out.0.extend(tags),
                    Err(e) => {
                        warn!(tag = %tag, error = %e, "avgm range fetch failed");
                        out.0.extend(
                            buckets(from, to, count)
                                .into_iter()
                                .map(|w| Tag::new(tag.as_str(), w.to, None)),
                        );
                    }
                }
                continue;
            }
            for window in buckets(from, to, count) {
                let value = match session.tag_group(&tag, window.from, window.to, group).await {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(tag = %tag, from = %window.from, error = %e, "bucket query failed");
                        None
                    }
                };
                out.push(Tag::new(tag.as_str(), window.to, value));
            }
        }
        Ok(out)
    }

    /// Raw rows of every tag in `[from, to)`, fetched concurrently.
    ///
    /// Row order across tags is unspecified. The first failing tag aborts
    /// the remaining fetches and its error is returned.
    pub async fn get_tag_from_to(
        &self,
        tags: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Tags> {
        debug!(tags, from = %from, to = %to, "get_tag_from_to");
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(StoreError::DbConnectionFailed)?;

        let names = split_tags(tags);
        let limit = self.settings.max_concurrent_queries;
        let permits = (limit > 0).then(|| Arc::new(Semaphore::new(limit)));
        let (tx, mut rx) = mpsc::channel::<Result<Tags>>(names.len().max(1));

        let mut workers = JoinSet::new();
        for name in names {
            let session = Arc::clone(session);
            let permits = permits.clone();
            let tx = tx.clone();
            workers.spawn(async move {
                let _permit = match permits {
                    Some(permits) => permits.acquire_owned().await.ok(),
                    None => None,
                };
                let result = session.tag_range(&name, from, to).await;
                // receiver is gone once another tag failed
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut out = Tags::new();
        while let Some(result) = rx.recv().await {
            match result {
                Ok(tags) => out.0.extend(tags),
                Err(e) => {
                    workers.abort_all();
                    return Err(e);
                }
            }
        }
        while let Some(joined) = workers.join_next().await {
            joined?;
        }
        Ok(out)
    }

    /// Aggregate of `tag` over `[from, to)`.
    pub async fn get_tag_from_to_group(
        &self,
        tag: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
        group: &str,
    ) -> Result<Option<f32>> {
        let group: GroupFunction = group.parse()?;
        debug!(tag, from = %from, to = %to, group = %group, "get_tag_from_to_group");
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(StoreError::DbConnectionFailed)?;
        session.tag_group(tag, from, to, group).await.map(Some)
    }

    /// Tag names matching a `*`/`?` search mask.
    pub async fn get_tag_list(&self, pattern: &str) -> Result<TabularOutput> {
        let like = like_pattern(pattern);
        debug!(pattern, like = %like, "get_tag_list");
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(StoreError::DbConnectionFailed)?;
        let query = session.render(QueryName::GetTagList, QueryArgs::new().value("tag", like))?;
        TabularOutput::try_from(session.conn.query(&query).await?)
    }

    pub async fn get_down_dates(
        &self,
        tag: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<NaiveDateTime>> {
        debug!(tag, from = %from, to = %to, "get_down_dates");
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(StoreError::DbConnectionFailed)?;
        session.dates(QueryName::GetDownDates, tag, from, to).await
    }

    pub async fn get_up_dates(
        &self,
        tag: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<NaiveDateTime>> {
        debug!(tag, from = %from, to = %to, "get_up_dates");
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(StoreError::DbConnectionFailed)?;
        session.dates(QueryName::GetUpDates, tag, from, to).await
    }

    /// Backend version and uptime as reported by its `status` query.
    ///
    /// A `status` query with a single column reports only the version; the
    /// uptime is then the seconds since this store connected.
    pub async fn get_status(&self) -> Result<BackendStatus> {
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(StoreError::DbConnectionFailed)?;
        let rows = session
            .conn
            .query(&session.render(QueryName::Status, QueryArgs::new())?)
            .await?;
        let row = rows
            .first()
            .ok_or_else(|| StoreError::Query("status query returned no rows".to_string()))?;
        Ok(BackendStatus {
            version: row.first().map(ToString::to_string).unwrap_or_default(),
            uptime: match row.get(1) {
                Some(uptime) => uptime.to_string(),
                None => session.connected_at.elapsed().as_secs().to_string(),
            },
        })
    }

    /// Runs a raw statement and returns its rows.
    pub async fn exec_query(&self, sql: &str) -> Result<TabularOutput> {
        debug!(sql, "exec_query");
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(StoreError::DbConnectionFailed)?;
        TabularOutput::try_from(session.conn.query(&RenderedQuery::raw(sql)).await?)
    }

    /// Runs a raw statement for its side effects.
    pub async fn exec_statement(&self, sql: &str) -> Result<()> {
        debug!(sql, "exec_statement");
        let guard = self.session.read().await;
        let session = guard.as_ref().ok_or(StoreError::DbConnectionFailed)?;
        session.conn.execute(&RenderedQuery::raw(sql)).await
    }
}

async fn resolve(backend: &BackendConfig) -> Vec<std::net::IpAddr> {
    if backend.host.is_empty() {
        return Vec::new();
    }
    match tokio::net::lookup_host((backend.host.as_str(), backend.port)).await {
        Ok(addrs) => addrs.map(|a| a.ip()).collect(),
        Err(e) => {
            warn!(host = %backend.host, error = %e, "could not resolve backend host");
            Vec::new()
        }
    }
}
