//! Port for delivering results to the consumer's execution context.

use crate::domain::entities::LoadedImage;
use crate::domain::errors::ResolveError;

use super::ImageTarget;

/// A finished resolution waiting to be handed to its target.
#[derive(Debug)]
pub struct PendingResult {
    /// Consumer of the result.
    pub target: Box<dyn ImageTarget>,
    /// Outcome of the cascade.
    pub outcome: Result<LoadedImage, ResolveError>,
}

impl PendingResult {
    /// Creates a pending result.
    #[must_use]
    pub fn new(target: Box<dyn ImageTarget>, outcome: Result<LoadedImage, ResolveError>) -> Self {
        Self { target, outcome }
    }

    /// Invokes the target. Consumes the result so delivery happens once.
    pub fn deliver(self) {
        match self.outcome {
            Ok(loaded) => self.target.on_resolved(loaded.buffer),
            Err(e) => self.target.on_failed(e),
        }
    }
}

/// Execution context that runs target callbacks.
pub trait Dispatcher: Send + Sync {
    /// Hands a result over for delivery. Ordering across results is not
    /// guaranteed.
    fn dispatch(&self, result: PendingResult);
}
