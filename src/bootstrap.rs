//! Service wiring for a scope
//!
//! [`services`] registers the cache, fetcher, vault and codec factories for a
//! given [`Settings`]; nothing is built until first resolved. The fetch
//! strategy is fixed here, once per scope: production scopes fetch from the
//! network, all others replay from the cache and fetch only on a miss.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{Clock, SystemClock, TimedCache};
use crate::codec::JsonCodec;
use crate::config::Settings;
use crate::error::Result;
use crate::fetch::{Fetcher, NetworkFetcher, ReplayFetcher};
use crate::registry::{ServiceKey, ServiceRegistry};
use crate::vault::{EnvVault, Vault};

/// On-disk response cache
pub static CACHE: ServiceKey<Arc<TimedCache>> = ServiceKey::new("cache");

/// Active fetch strategy
pub static FETCHER: ServiceKey<Arc<dyn Fetcher>> = ServiceKey::new("fetcher");

/// Secret store supplying origin credentials
pub static VAULT: ServiceKey<Arc<dyn Vault>> = ServiceKey::new("vault");

/// JSON output settings
pub static CODEC: ServiceKey<Arc<JsonCodec>> = ServiceKey::new("codec");

/// Builds a scope with the standard services for `settings`
pub fn services(settings: &Settings) -> Result<ServiceRegistry> {
    services_with_clock(settings, Arc::new(SystemClock))
}

/// Like [`services`], with the cache reading time from `clock`
pub fn services_with_clock(settings: &Settings, clock: Arc<dyn Clock>) -> Result<ServiceRegistry> {
    settings.validate()?;
    let registry = ServiceRegistry::new();

    let prefix = settings.vault_prefix.clone();
    registry.register(&VAULT, move |_| {
        Ok(Arc::new(EnvVault::new(prefix.clone())) as Arc<dyn Vault>)
    })?;

    let root = settings.storage_root.clone();
    let ttl = settings.ttl;
    registry.register(&CACHE, move |_| {
        let cache = TimedCache::new(root.clone(), ttl)?.with_clock(clock.clone());
        info!(root = %root.display(), ttl_secs = ttl.as_secs(), "cache ready");
        Ok(Arc::new(cache))
    })?;

    let production = settings.production;
    let timeout = settings.timeout;
    let token_secret = settings.token_secret.clone();
    registry.register(&FETCHER, move |scope| {
        let mut network = NetworkFetcher::new(timeout)?;
        if let Some(ref name) = token_secret {
            match scope.resolve(&VAULT)?.secret(name) {
                Some(token) => network = network.with_bearer_token(token),
                None => warn!(secret = %name, "credential not found in vault, fetching anonymously"),
            }
        }

        let fetcher: Arc<dyn Fetcher> = if production {
            Arc::new(network)
        } else {
            Arc::new(ReplayFetcher::new(scope.resolve(&CACHE)?, Arc::new(network)))
        };
        info!(production, ?fetcher, "fetcher ready");
        Ok(fetcher)
    })?;

    let base = settings.codec_base.clone();
    registry.register(&CODEC, move |_| {
        Ok(Arc::new(JsonCodec {
            base: base.clone(),
            ..JsonCodec::default()
        }))
    })?;

    Ok(registry)
}

/// Runs an offline task in a fresh scope, tearing it down afterwards
pub fn exec<R, F>(settings: &Settings, task: F) -> Result<R>
where
    F: FnOnce(&ServiceRegistry) -> Result<R>,
{
    services(settings)?.run(task)
}
