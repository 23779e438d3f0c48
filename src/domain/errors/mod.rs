//! Domain error types.

mod cache_error;
mod loader_error;
mod resolve_error;

pub use cache_error::{CacheError, CacheResult, FetchError};
pub use loader_error::LoaderError;
pub use resolve_error::{ErrorKind, ResolveError};
