//! Port for the consumer of a resolution.

use crate::domain::entities::PixelBuffer;
use crate::domain::errors::ResolveError;

/// Receives the outcome of a resolution. Exactly one method is called, once.
///
/// There is no cancellation: a target may be invoked after whatever it
/// represents has been torn down or rebound to another request. Targets that
/// care must check their own liveness.
pub trait ImageTarget: Send + 'static {
    /// Called with the decoded pixels.
    fn on_resolved(self: Box<Self>, buffer: PixelBuffer);

    /// Called when no eligible tier could resolve the request.
    fn on_failed(self: Box<Self>, error: ResolveError);
}

/// Adapts a pair of closures into an [`ImageTarget`].
pub struct Callbacks<R, F> {
    on_resolved: R,
    on_failed: F,
}

impl<R, F> Callbacks<R, F>
where
    R: FnOnce(PixelBuffer) + Send + 'static,
    F: FnOnce(ResolveError) + Send + 'static,
{
    /// Creates a target from closures.
    #[must_use]
    pub const fn new(on_resolved: R, on_failed: F) -> Self {
        Self {
            on_resolved,
            on_failed,
        }
    }
}

impl<R, F> ImageTarget for Callbacks<R, F>
where
    R: FnOnce(PixelBuffer) + Send + 'static,
    F: FnOnce(ResolveError) + Send + 'static,
{
    fn on_resolved(self: Box<Self>, buffer: PixelBuffer) {
        (self.on_resolved)(buffer);
    }

    fn on_failed(self: Box<Self>, error: ResolveError) {
        (self.on_failed)(error);
    }
}

impl std::fmt::Debug for dyn ImageTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ImageTarget")
    }
}
