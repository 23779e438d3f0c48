//! Domain types for image resolution.

use std::sync::Arc;

/// Opaque identifier of a remote image, typically its URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId(Arc<str>);

impl ResourceId {
    /// Creates a new `ResourceId` from any string-like input.
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Length of a rendered cache key in characters.
pub const CACHE_KEY_LEN: usize = 32;

/// Fixed-length cache key addressing both the memory and disk tiers.
///
/// Derived from the first 128 bits of the SHA-256 digest of the resource id,
/// rendered as lowercase hex. Always 32 characters of `[0-9a-f]`, so it is
/// safe as a file name on every platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a resource id.
    #[must_use]
    pub fn derive(id: &ResourceId) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(id.as_str().as_bytes());
        let result = hasher.finalize();
        Self(hex::encode(&result[..CACHE_KEY_LEN / 2]))
    }

    /// Parses a previously rendered key, rejecting anything that is not
    /// 32 lowercase hex characters.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == CACHE_KEY_LEN
            && s.bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(s.to_string()))
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&ResourceId> for CacheKey {
    fn from(id: &ResourceId) -> Self {
        Self::derive(id)
    }
}

/// Target dimensions for a decode. Zero in either axis means full resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RequestedSize {
    /// Requested width in pixels.
    pub width: u32,
    /// Requested height in pixels.
    pub height: u32,
}

impl RequestedSize {
    /// Full-resolution request.
    pub const FULL: Self = Self {
        width: 0,
        height: 0,
    };

    /// Creates a requested size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns true if the caller asked for the source resolution.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Decoded, display-ready pixels.
///
/// Cheap to clone: the pixel data is shared.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    image: Arc<image::DynamicImage>,
    byte_count: usize,
}

impl PixelBuffer {
    /// Wraps a decoded image.
    #[must_use]
    pub fn new(image: image::DynamicImage) -> Self {
        let byte_count = image.as_bytes().len();
        Self {
            image: Arc::new(image),
            byte_count,
        }
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Size of the pixel data in bytes.
    #[must_use]
    pub const fn byte_count(&self) -> usize {
        self.byte_count
    }

    /// Eviction weight in whole kilobytes.
    #[must_use]
    pub const fn weight_kb(&self) -> usize {
        self.byte_count / 1024
    }

    /// The decoded image.
    #[must_use]
    pub fn image(&self) -> &image::DynamicImage {
        &self.image
    }

    /// Returns true if both buffers share the same pixel allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

/// Where an image was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Resolved from the in-memory LRU cache.
    MemoryCache,
    /// Decoded from the disk cache.
    DiskCache,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A resolved image together with its provenance.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Key the image is cached under.
    pub key: CacheKey,
    /// The decoded pixels.
    pub buffer: PixelBuffer,
    /// Tier the image was resolved from.
    pub source: ImageSource,
}
