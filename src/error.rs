//! Error types shared by the cache, fetchers and service registry

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the fetch/cache core
#[derive(Debug, Error)]
pub enum Error {
    /// Reading or writing the on-disk cache failed, or a record is corrupted
    #[error("Cache storage error at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The origin could not be reached
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// The origin answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// A fetch from the origin exceeded its deadline
    #[error("Fetching {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    /// A deadline-bounded cache operation did not finish in time
    #[error("{operation} timed out after {after:?}")]
    CacheTimeout { operation: String, after: Duration },

    /// The resource identifier is not a valid URL
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// Duplicate or unknown service key, or invalid settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation attempted on a scope that is closing or closed
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Encoding a value through the codec failed
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    /// Whether this is a failure talking to the origin (including fetch timeouts)
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Error::Network { .. } | Error::Status { .. } | Error::Timeout { .. }
        )
    }

    /// Whether this is a cache storage failure
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage { .. })
    }

    /// Whether a fetch or cache deadline was exceeded
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::CacheTimeout { .. })
    }
}
