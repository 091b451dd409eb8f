use std::sync::Arc;
use crate::cache::{RefreshOutcome, RefreshableCache};
use crate::config::CacheConfig;
use crate::data_sources::data_source::DataSource;
use crate::error::RefreshError;
use crate::policy::NamedPolicy;

/// Config driven wrapper around [`RefreshableCache`] that is started as soon as it is created.
///
/// Useful when the host application wants "a value that keeps itself fresh" and nothing else.
pub struct Refresher<T, S> {
    cache: RefreshableCache<T, S, NamedPolicy>,
}

impl<T, S> Refresher<T, S>
where
    T: PartialEq + Send + Sync + 'static,
    S: DataSource<T> + 'static,
{
    /// Build a cache from `config` and start it.
    /// # Errors
    /// [`RefreshError::RefreshFailed`] if the first load fails, [`RefreshError::InvalidInterval`]
    /// if the configured interval is zero.
    pub async fn start(source: S, config: &CacheConfig) -> Result<Self, RefreshError> {
        let cache = RefreshableCache::builder(source)
            .with_config(config)?
            .update_policy(config.update_policy)
            .build()?;
        cache.start().await?;
        Ok(Refresher { cache })
    }

    pub fn data(&self) -> Option<Arc<T>> {
        self.cache.get()
    }

    /// Refresh immediately, failures are only logged.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.cache.refresh_now().await
    }

    pub fn last_updated_at(&self) -> u64 {
        self.cache.last_updated_at()
    }

    pub fn stop(&self) {
        self.cache.stop()
    }

    pub fn cache(&self) -> &RefreshableCache<T, S, NamedPolicy> {
        &self.cache
    }
}
