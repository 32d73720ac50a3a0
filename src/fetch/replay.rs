//! Fetcher replaying cached responses, going upstream only on a miss

use std::sync::Arc;

use tracing::debug;

use super::{cache_key, canonical_url, Fetcher, Resource};
use crate::cache::TimedCache;
use crate::error::{Error, Result};

/// Cache-first fetcher
///
/// A fresh cache entry is returned without any network access. On a miss the
/// request goes to the upstream fetcher and a successful result is written
/// back before it is returned. Upstream failures are passed through and
/// never cached; cache storage failures are reported, not treated as misses.
#[derive(Debug, Clone)]
pub struct ReplayFetcher {
    cache: Arc<TimedCache>,
    upstream: Arc<dyn Fetcher>,
}

impl ReplayFetcher {
    pub fn new(cache: Arc<TimedCache>, upstream: Arc<dyn Fetcher>) -> Self {
        Self { cache, upstream }
    }

    pub fn cache(&self) -> &TimedCache {
        &self.cache
    }
}

impl Fetcher for ReplayFetcher {
    fn fetch(&self, url: &str) -> Result<Resource> {
        let url = canonical_url(url)?;
        let key = cache_key(&url);

        if let Some(payload) = self.cache.get(&key)? {
            let resource = Resource::from_payload(&payload)
                .map_err(|e| Error::storage(self.cache.entry_path(&key), e))?;
            debug!(url = %url, "replayed from cache");
            return Ok(resource);
        }

        let resource = self.upstream.fetch(url.as_str())?;
        self.cache.put(&key, &resource.to_payload()?)?;
        Ok(resource)
    }
}
