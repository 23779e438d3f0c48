mod dispatch_port;
mod fetcher_port;
mod target_port;

pub use dispatch_port::{Dispatcher, PendingResult};
pub use fetcher_port::{ByteStream, ImageFetcherPort};
pub use target_port::{Callbacks, ImageTarget};

#[cfg(test)]
pub use fetcher_port::MockImageFetcherPort;
