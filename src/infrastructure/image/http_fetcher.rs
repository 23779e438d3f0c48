//! HTTP adapter for [`ImageFetcherPort`].

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use crate::domain::entities::ResourceId;
use crate::domain::errors::FetchError;
use crate::domain::ports::{ByteStream, ImageFetcherPort};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fetches resources by treating their id as a URL.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher whose requests time out after `timeout`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Request(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcherPort for HttpFetcher {
    async fn fetch(&self, id: &ResourceId) -> Result<ByteStream, FetchError> {
        debug!(url = %id, "Downloading image");

        let response = self
            .client
            .get(id.as_str())
            .send()
            .await
            .map_err(|e| FetchError::Request(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            debug!(url = %id, status = status.as_u16(), "Download rejected");
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| FetchError::Body(e.to_string()))),
        ))
    }
}
