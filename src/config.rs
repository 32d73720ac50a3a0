//! Runtime settings consumed by the fetch/cache core

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use reqwest::Url;

use crate::cache::DEFAULT_TTL;
use crate::error::{Error, Result};
use crate::fetch::DEFAULT_TIMEOUT;

/// Environment variable set by the managed container runtime in production
const PRODUCTION_MARKER: &str = "K_SERVICE";

/// Default prefix of environment variables read by the vault
pub const DEFAULT_VAULT_PREFIX: &str = "ORIGIN_CACHE_";

/// Settings selecting the fetch strategy and cache layout for a scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Network fetcher when true, cache-replaying fetcher otherwise
    pub production: bool,
    /// Directory holding cache records
    pub storage_root: PathBuf,
    /// Time-to-live of cache entries
    pub ttl: Duration,
    /// Bound on a single network round trip
    pub timeout: Duration,
    /// Name of the vault secret sent as a bearer token, if any
    pub token_secret: Option<String>,
    /// Prefix of environment variables backing the vault
    pub vault_prefix: String,
    /// Base URL against which encoded output writes relative references
    pub codec_base: Option<Url>,
}

impl Settings {
    /// Default settings for production or non-production use
    pub fn for_mode(production: bool) -> Self {
        Self {
            production,
            storage_root: default_storage_root(production),
            ttl: DEFAULT_TTL,
            timeout: DEFAULT_TIMEOUT,
            token_secret: None,
            vault_prefix: DEFAULT_VAULT_PREFIX.to_string(),
            codec_base: None,
        }
    }

    /// Default settings for the detected environment
    pub fn detect() -> Self {
        Self::for_mode(detect_production())
    }

    /// Rejects settings the core cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::Configuration("ttl must be greater than zero".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Configuration(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.storage_root.as_os_str().is_empty() {
            return Err(Error::Configuration("storage root must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_mode(false)
    }
}

/// Whether the process runs in the production container runtime
pub fn detect_production() -> bool {
    std::env::var_os(PRODUCTION_MARKER).is_some()
}

/// Cache root for the given mode
///
/// Production uses a directory under the process temporary directory, which
/// does not outlive the container. Otherwise the per-user cache directory
/// (`~/.cache/origin-cache/` on Linux) is used, or `./data` if it cannot be
/// determined.
pub fn default_storage_root(production: bool) -> PathBuf {
    if production {
        return std::env::temp_dir().join("origin-cache");
    }
    ProjectDirs::from("", "", "origin-cache")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_defaults() {
        let settings = Settings::for_mode(true);
        assert!(settings.production);
        assert!(settings.storage_root.starts_with(std::env::temp_dir()));
        assert_eq!(settings.ttl, Duration::from_secs(86_400));
        assert_eq!(settings.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_development_root_is_fixed() {
        let first = Settings::for_mode(false);
        let second = Settings::for_mode(false);
        assert_eq!(first.storage_root, second.storage_root);
        assert!(!first.storage_root.starts_with(std::env::temp_dir()));
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.ttl = Duration::ZERO;
        assert!(matches!(settings.validate(), Err(Error::Configuration(_))));

        settings.ttl = DEFAULT_TTL;
        settings.timeout = Duration::ZERO;
        assert!(matches!(settings.validate(), Err(Error::Configuration(_))));
    }
}
