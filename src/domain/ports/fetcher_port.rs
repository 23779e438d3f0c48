//! Port definition for fetching raw image bytes.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;

use crate::domain::entities::ResourceId;
use crate::domain::errors::FetchError;

/// Owned stream of body chunks.
///
/// Dropping the stream releases the underlying connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

/// Port for turning a resource id into a byte stream.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageFetcherPort: Send + Sync {
    /// Starts a fetch. The stream yields the body in chunks.
    async fn fetch(&self, id: &ResourceId) -> Result<ByteStream, FetchError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    /// Fetcher serving canned bodies and counting calls.
    pub struct StubFetcher {
        bodies: Mutex<HashMap<ResourceId, Vec<u8>>>,
        calls: AtomicUsize,
        chunk_size: usize,
        delay: Option<Duration>,
        fail_mid_stream: bool,
    }

    impl StubFetcher {
        /// Creates a fetcher with no bodies; every fetch is unreachable.
        pub fn new() -> Self {
            Self {
                bodies: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
                chunk_size: 1024,
                delay: None,
                fail_mid_stream: false,
            }
        }

        /// Serves `body` for `id`.
        pub fn with_body(self, id: impl Into<ResourceId>, body: Vec<u8>) -> Self {
            self.bodies.lock().insert(id.into(), body);
            self
        }

        /// Sleeps before answering each fetch.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Breaks every body stream after its first chunk.
        pub fn failing_mid_stream(mut self) -> Self {
            self.fail_mid_stream = true;
            self
        }

        /// Number of `fetch` calls so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Default for StubFetcher {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ImageFetcherPort for StubFetcher {
        async fn fetch(&self, id: &ResourceId) -> Result<ByteStream, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let body = self
                .bodies
                .lock()
                .get(id)
                .cloned()
                .ok_or_else(|| FetchError::Request(format!("{id}: connection refused")))?;

            let mut chunks: Vec<Result<Bytes, FetchError>> = body
                .chunks(self.chunk_size)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            if self.fail_mid_stream {
                chunks.truncate(1);
                chunks.push(Err(FetchError::Body("connection reset".to_string())));
            }
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }
    }
}
