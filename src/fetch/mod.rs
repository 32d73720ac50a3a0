//! Fetch strategies for retrieving resources from external origins
//!
//! [`Fetcher`] is the single capability request handlers depend on. The
//! strategy behind it is chosen once when the service is built:
//! [`NetworkFetcher`] always goes to the origin, [`ReplayFetcher`] serves
//! fresh cached copies and only goes to the network on a miss.

mod network;
mod replay;

pub use network::{NetworkFetcher, DEFAULT_TIMEOUT};
pub use replay::ReplayFetcher;

use std::fmt;
use std::io;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Retrieves the bytes and metadata addressed by a URL
pub trait Fetcher: Send + Sync + fmt::Debug {
    fn fetch(&self, url: &str) -> Result<Resource>;
}

/// A fetched resource
///
/// Serializing a `Resource` yields its metadata only; the body travels
/// separately in [`Resource::to_payload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Canonical URL the resource was requested from
    pub url: String,
    /// HTTP status of the response
    pub status: u16,
    /// Value of the Content-Type header, if any
    pub content_type: Option<String>,
    /// Response body
    #[serde(skip)]
    pub body: Vec<u8>,
}

impl Resource {
    /// Encodes the resource as a JSON metadata line followed by the raw body
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let mut payload = serde_json::to_vec(self)?;
        payload.push(b'\n');
        payload.extend_from_slice(&self.body);
        Ok(payload)
    }

    /// Decodes a payload produced by [`Resource::to_payload`]
    pub fn from_payload(payload: &[u8]) -> io::Result<Self> {
        let split = payload
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing resource metadata"))?;
        let mut resource: Resource = serde_json::from_slice(&payload[..split])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        resource.body = payload[split + 1..].to_vec();
        Ok(resource)
    }
}

/// Parses and normalizes a resource identifier
///
/// Scheme and host are lower-cased, the path is normalized and any fragment
/// is dropped, since it never reaches the origin. Only http(s) is accepted.
pub fn canonical_url(url: &str) -> Result<Url> {
    let mut parsed = Url::parse(url.trim()).map_err(|e| Error::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidUrl {
            url: url.to_string(),
            message: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    parsed.set_fragment(None);
    Ok(parsed)
}

/// Cache key identifying a GET request for `url`
pub fn cache_key(url: &Url) -> String {
    format!("GET {url}")
}
