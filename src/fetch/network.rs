//! Fetcher that always retrieves resources from the live origin

use std::fmt;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use tracing::{info, warn};

use super::{canonical_url, Fetcher, Resource};
use crate::error::{Error, Result};

/// Default bound on a single network round trip
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client issuing GET requests against the origin
///
/// Never reads or writes any cache. Calls block for the duration of the round
/// trip, up to the configured timeout.
#[derive(Clone)]
pub struct NetworkFetcher {
    client: Client,
    timeout: Duration,
    token: Option<String>,
}

impl NetworkFetcher {
    /// Creates a fetcher whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout,
            token: None,
        })
    }

    /// Sends `token` as a bearer credential with every request
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn transport_error(&self, url: &Url, error: reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::Timeout {
                url: url.to_string(),
                after: self.timeout,
            }
        } else {
            Error::Network {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}

impl fmt::Debug for NetworkFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkFetcher")
            .field("timeout", &self.timeout)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl Fetcher for NetworkFetcher {
    fn fetch(&self, url: &str) -> Result<Resource> {
        let url = canonical_url(url)?;
        let started = Instant::now();

        let mut request = self.client.get(url.clone());
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| self.transport_error(&url, e))?;
        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "origin returned non-success status");
            return Err(Error::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .map_err(|e| self.transport_error(&url, e))?
            .to_vec();

        info!(
            url = %url,
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched from origin"
        );

        Ok(Resource {
            url: url.to_string(),
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
