//! Domain layer with core entities, errors, ports and cascade rules.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;
/// Domain services.
pub mod services;

pub use entities::{CacheKey, CacheLevel, LoadedImage, PixelBuffer, RequestedSize, ResourceId};
pub use errors::{ErrorKind, ResolveError};
pub use ports::{Callbacks, Dispatcher, ImageFetcherPort, ImageTarget, PendingResult};
