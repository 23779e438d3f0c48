//! Disk store and fetcher error types.

use thiserror::Error;

/// Result type for disk store operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors raised by the disk store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during a store operation.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The journal could not be parsed.
    #[error("corrupt journal: {0}")]
    CorruptJournal(String),
    /// A value index outside `0..values_per_entry`.
    #[error("value index {index} out of range (entry holds {count})")]
    InvalidIndex {
        /// Requested index.
        index: usize,
        /// Values per entry.
        count: usize,
    },
    /// A new entry was committed without a value at `index`.
    #[error("new entry has no value for index {index}")]
    MissingValue {
        /// First unwritten index.
        index: usize,
    },
    /// Not enough free space for the configured budget.
    #[error("insufficient disk space: {available} bytes available, {required} required")]
    InsufficientSpace {
        /// Bytes free on the filesystem.
        available: u64,
        /// Configured budget.
        required: u64,
    },
}

impl CacheError {
    /// Creates corrupt journal error.
    #[must_use]
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptJournal(message.into())
    }
}

/// Errors raised by the network fetcher.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Connection could not be established or the request timed out.
    #[error("request failed: {0}")]
    Request(String),
    /// The server answered with a non-success status.
    #[error("HTTP {status}")]
    Status {
        /// Status code.
        status: u16,
    },
    /// The body stream broke off.
    #[error("failed to read body: {0}")]
    Body(String),
}
