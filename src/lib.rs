//! Pixcache - a tiered image loader.
//!
//! Resolves remote images through an in-memory LRU of decoded pixels, a
//! journaled disk store of raw bytes and finally the network, decoding at a
//! power-of-two downsample of the requested size.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "pixcache";
