//! Resolution error types.

use thiserror::Error;

use crate::domain::entities::{CacheLevel, Tier};

/// Terminal failure of an image resolution.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum ResolveError {
    #[error("failed to decode image: {message}")]
    Decode { message: String },

    #[error("network fetch failed: {message}")]
    Network { message: String },

    #[error("disk cache is unavailable for this loader")]
    DiskUnavailable,

    #[error("cache level {level} does not allow the {tier} tier")]
    PolicyDenied { level: CacheLevel, tier: Tier },

    #[error("resolution task failed: {message}")]
    Internal { message: String },
}

/// Discriminant of [`ResolveError`] for matching without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or unsupported byte stream.
    Decode,
    /// Connection, timeout or non-success status.
    Network,
    /// Disk tier disabled at initialization.
    DiskUnavailable,
    /// Cache level forbids the next tier.
    PolicyDenied,
    /// Worker failure unrelated to the cascade.
    Internal,
}

impl ResolveError {
    /// Creates decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates policy denied error.
    #[must_use]
    pub const fn policy_denied(level: CacheLevel, tier: Tier) -> Self {
        Self::PolicyDenied { level, tier }
    }

    /// Creates internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the error discriminant.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Network { .. } => ErrorKind::Network,
            Self::DiskUnavailable => ErrorKind::DiskUnavailable,
            Self::PolicyDenied { .. } => ErrorKind::PolicyDenied,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns whether the cache level stopped the cascade.
    #[must_use]
    pub const fn is_policy_denied(&self) -> bool {
        matches!(self, Self::PolicyDenied { .. })
    }

    /// Returns whether a later `resolve` could succeed without a config change.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Internal { .. })
    }
}

impl From<super::FetchError> for ResolveError {
    fn from(err: super::FetchError) -> Self {
        Self::network(err.to_string())
    }
}
