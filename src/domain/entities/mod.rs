//! Domain entities.

mod cache_level;
mod image;

pub use cache_level::{CacheLevel, Tier};
pub use image::{
    CACHE_KEY_LEN, CacheKey, ImageSource, LoadedImage, PixelBuffer, RequestedSize, ResourceId,
};
