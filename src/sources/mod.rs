//! External fetch collaborators
//!
//! The scraping and supplier search procedures run outside this service. A
//! [`Fetcher`] is the seam: handlers call it on a cache miss and treat any
//! failure as "no results".

use crate::metrics::FetchTimer;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Failure of an external fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("fetch failed: {0}")]
    Failed(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not decode fetch result: {0}")]
    Decode(String),
}

/// Source of structured records for an identifier (keyword, product title)
#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    async fn fetch(&self, identifier: &str) -> Result<Vec<T>, FetchError>;
}

/// Fetcher used when no collaborator is configured; always returns nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyFetcher;

#[async_trait]
impl<T: Send + 'static> Fetcher<T> for EmptyFetcher {
    async fn fetch(&self, _identifier: &str) -> Result<Vec<T>, FetchError> {
        Ok(Vec::new())
    }
}

/// Fetcher backed by an HTTP sidecar: `GET {endpoint}?q={identifier}` returning
/// a JSON array
pub struct HttpFetcher<T> {
    name: &'static str,
    endpoint: url::Url,
    client: reqwest::Client,
    timeout: Duration,
    _records: PhantomData<fn() -> T>,
}

impl<T> HttpFetcher<T> {
    /// Create a fetcher for `endpoint`, bounding each call by `timeout`
    pub fn new(name: &'static str, endpoint: &str, timeout: Duration) -> Result<Self, FetchError> {
        let endpoint = url::Url::parse(endpoint)
            .map_err(|e| FetchError::Failed(format!("invalid endpoint {}: {}", endpoint, e)))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Failed(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name,
            endpoint,
            client,
            timeout,
            _records: PhantomData,
        })
    }

    fn url_for(&self, identifier: &str) -> url::Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("q", identifier);
        url
    }
}

#[async_trait]
impl<T> Fetcher<T> for HttpFetcher<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn fetch(&self, identifier: &str) -> Result<Vec<T>, FetchError> {
        let url = self.url_for(identifier);
        let timer = FetchTimer::start(self.name);
        debug!(source = self.name, url = %url, "Fetching from external source");

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                timer.record("timeout");
                warn!(source = self.name, "External fetch timed out");
                return Err(FetchError::Timeout(self.timeout));
            }
            Err(e) => {
                timer.record("error");
                warn!(source = self.name, error = %e, "External fetch failed");
                return Err(FetchError::Failed(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            timer.record("error");
            warn!(source = self.name, status = %status, "External source returned an error");
            return Err(FetchError::Failed(format!("{} returned {}", self.name, status)));
        }

        match response.json::<Vec<T>>().await {
            Ok(records) => {
                timer.record("ok");
                Ok(records)
            }
            Err(e) => {
                timer.record("decode_error");
                Err(FetchError::Decode(e.to_string()))
            }
        }
    }
}
