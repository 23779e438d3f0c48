//! Loader construction errors.

use thiserror::Error;

use super::FetchError;

/// Failure to build an image loader.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The worker pool runtime could not start.
    #[error("failed to start worker pool: {0}")]
    Pool(#[from] std::io::Error),

    /// The default HTTP fetcher could not be created.
    #[error("failed to create fetcher: {0}")]
    Fetcher(#[from] FetchError),
}
