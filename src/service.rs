use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDateTime;
use tagstream_core::cache::{self, Cache, NoCache};
use tagstream_core::config::Settings;
use tagstream_core::dates::{parse_date, round};
use tagstream_core::storage::{Connector, DriverConnector};
use tagstream_core::store::{split_tags, TagSamples};
use tagstream_core::{
    BackendStatus, Result, Store, StoreError, StoreRegistry, TabularOutput, Tag, Tags,
    TemplateStore,
};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Everything one configuration generation needs to serve requests.
pub struct Context {
    pub settings: Arc<Settings>,
    pub cache: Arc<dyn Cache>,
    pub store: Arc<Store>,
    pub registry: Arc<StoreRegistry>,
    pub templates: TemplateStore,
}

impl Context {
    /// Builds the cache, connects the current backend and wires templates.
    ///
    /// A cache that cannot be reached is replaced by the no-op cache; a
    /// backend that cannot be reached fails the whole context.
    pub async fn open(settings: Arc<Settings>, connector: Arc<dyn Connector>) -> Result<Self> {
        let cache_config = settings.current_cache_config()?;
        let cache = match cache::from_config(&cache_config).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(cache = %cache_config.name, error = %e, "cache unavailable, running without cache");
                Arc::new(NoCache) as Arc<dyn Cache>
            }
        };

        let store = Arc::new(Store::with_connector(
            Arc::clone(&settings),
            Arc::clone(&connector),
        ));
        store
            .connect(&settings.current_backend, Arc::clone(&cache))
            .await?;

        let registry = Arc::new(StoreRegistry::with_connector(Arc::clone(&settings), connector));
        let templates = TemplateStore::new(
            settings.templates_table.clone(),
            Arc::clone(&store),
            Arc::clone(&registry),
        );

        Ok(Self {
            settings,
            cache,
            store,
            registry,
            templates,
        })
    }

    fn date(&self, input: &str) -> Result<NaiveDateTime> {
        parse_date(input, &self.settings.date_formats)
    }

    fn precision(&self, round: Option<u32>) -> u32 {
        round.unwrap_or(self.settings.round)
    }

    async fn close(&self) {
        self.registry.close_all().await;
        self.store.disconnect().await;
        if let Err(e) = self.cache.disconnect().await {
            warn!(cache = self.cache.name(), error = %e, "cache disconnect failed");
        }
    }
}

fn parse_count(input: &str) -> Result<i64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(StoreError::CountIsEmpty);
    }
    input.parse().map_err(|_| StoreError::NotAFloat)
}

fn round_tags(tags: Tags, precision: u32) -> Tags {
    tags.0
        .into_iter()
        .map(|tag| Tag {
            value: tag.value.map(|v| round(v, precision)),
            ..tag
        })
        .collect()
}

/// Tag service facade.
///
/// Takes request inputs as the HTTP layer receives them (strings), turns
/// them into typed store calls and rounds the results. The live [`Context`]
/// can be swapped with [`TagService::reload`]; requests already running keep
/// the context they started with.
pub struct TagService {
    connector: Arc<dyn Connector>,
    context: RwLock<Arc<Context>>,
}

impl TagService {
    pub async fn new(settings: Settings) -> Result<Self> {
        Self::with_connector(settings, Arc::new(DriverConnector)).await
    }

    pub async fn with_connector(settings: Settings, connector: Arc<dyn Connector>) -> Result<Self> {
        let context = Context::open(Arc::new(settings), Arc::clone(&connector)).await?;
        info!(
            backend = %context.settings.current_backend,
            cache = context.cache.name(),
            "tag service ready"
        );
        Ok(Self {
            connector,
            context: RwLock::new(Arc::new(context)),
        })
    }

    pub async fn context(&self) -> Arc<Context> {
        Arc::clone(&*self.context.read().await)
    }

    pub async fn settings(&self) -> Arc<Settings> {
        Arc::clone(&self.context().await.settings)
    }

    /// Switches to a new configuration.
    ///
    /// On failure the running context stays in place and the error is
    /// returned.
    pub async fn reload(&self, settings: Settings) -> Result<()> {
        let backend = settings.current_backend.clone();
        match Context::open(Arc::new(settings), Arc::clone(&self.connector)).await {
            Ok(context) => {
                let previous = std::mem::replace(&mut *self.context.write().await, Arc::new(context));
                info!(
                    from = %previous.settings.current_backend,
                    to = %backend,
                    "configuration reloaded"
                );
                Ok(())
            }
            Err(e) => {
                error!(backend = %backend, error = %e, "reload failed, keeping running configuration");
                Err(e)
            }
        }
    }

    /// Closes every store and the cache of the running context.
    pub async fn shutdown(&self) {
        self.context().await.close().await;
        info!("tag service stopped");
    }

    pub async fn status(&self) -> Result<BackendStatus> {
        self.context().await.store.get_status().await
    }

    /// Value of every listed tag at `date`.
    pub async fn tag_date(&self, tags: &str, date: &str, round: Option<u32>) -> Result<Tags> {
        let ctx = self.context().await;
        let date = ctx.date(date)?;
        let mut out = Tags::new();
        for tag in split_tags(tags) {
            out.push(ctx.store.get_tag_date(&tag, date).await?);
        }
        Ok(round_tags(out, ctx.precision(round)))
    }

    pub async fn tag_count(
        &self,
        tags: &str,
        from: &str,
        to: &str,
        count: &str,
        round: Option<u32>,
    ) -> Result<TagSamples> {
        let ctx = self.context().await;
        let (from, to) = (ctx.date(from)?, ctx.date(to)?);
        let count = parse_count(count)?;
        let precision = ctx.precision(round);

        let mut samples = ctx.store.get_tag_count(tags, from, to, count).await?;
        for values in samples.values_mut() {
            for value in values.values_mut() {
                *value = value.map(|v| self::round(v, precision));
            }
        }
        Ok(samples)
    }

    pub async fn tag_count_group(
        &self,
        tags: &str,
        from: &str,
        to: &str,
        count: &str,
        group: &str,
        round: Option<u32>,
    ) -> Result<Tags> {
        let ctx = self.context().await;
        let (from, to) = (ctx.date(from)?, ctx.date(to)?);
        let count = parse_count(count)?;
        let tags = ctx
            .store
            .get_tag_count_group(tags, from, to, count, group)
            .await?;
        Ok(round_tags(tags, ctx.precision(round)))
    }

    pub async fn tag_from_to(
        &self,
        tags: &str,
        from: &str,
        to: &str,
        round: Option<u32>,
    ) -> Result<Tags> {
        let ctx = self.context().await;
        let (from, to) = (ctx.date(from)?, ctx.date(to)?);
        let tags = ctx.store.get_tag_from_to(tags, from, to).await?;
        Ok(round_tags(tags, ctx.precision(round)))
    }

    /// One aggregate per listed tag over `[from, to)`, dated at `to`.
    pub async fn tag_from_to_group(
        &self,
        tags: &str,
        from: &str,
        to: &str,
        group: &str,
        round: Option<u32>,
    ) -> Result<Tags> {
        let ctx = self.context().await;
        let (from, to) = (ctx.date(from)?, ctx.date(to)?);
        let mut out = Tags::new();
        for tag in split_tags(tags) {
            let value = ctx.store.get_tag_from_to_group(&tag, from, to, group).await?;
            out.push(Tag::new(tag, to, value));
        }
        Ok(round_tags(out, ctx.precision(round)))
    }

    pub async fn tag_list(&self, like: &str) -> Result<TabularOutput> {
        self.context().await.store.get_tag_list(like).await
    }

    pub async fn down_dates(&self, tag: &str, from: &str, to: &str) -> Result<Vec<NaiveDateTime>> {
        let ctx = self.context().await;
        let (from, to) = (ctx.date(from)?, ctx.date(to)?);
        ctx.store.get_down_dates(tag, from, to).await
    }

    pub async fn up_dates(&self, tag: &str, from: &str, to: &str) -> Result<Vec<NaiveDateTime>> {
        let ctx = self.context().await;
        let (from, to) = (ctx.date(from)?, ctx.date(to)?);
        ctx.store.get_up_dates(tag, from, to).await
    }

    pub async fn template_list(&self, pattern: &str) -> Result<BTreeMap<String, String>> {
        self.context().await.templates.list(pattern).await
    }

    pub async fn template_get(&self, name: &str) -> Result<String> {
        self.context().await.templates.get(name).await
    }

    pub async fn template_add(&self, name: &str, body: &str) -> Result<()> {
        self.context().await.templates.add(name, body).await
    }

    pub async fn template_set(&self, name: &str, body: &str) -> Result<()> {
        self.context().await.templates.set(name, body).await
    }

    pub async fn template_delete(&self, name: &str) -> Result<()> {
        self.context().await.templates.delete(name).await
    }

    pub async fn template_exec(
        &self,
        name: &str,
        params: &HashMap<String, String>,
    ) -> Result<TabularOutput> {
        self.context().await.templates.exec(name, params).await
    }
}
