//! Delivery contexts for finished resolutions.

use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::ports::{Dispatcher, PendingResult};

/// Creates a connected dispatcher and queue.
///
/// Workers hand results to the [`QueueDispatcher`]; whichever thread pumps the
/// [`DispatchQueue`] runs the target callbacks, one at a time.
#[must_use]
pub fn dispatch_queue() -> (QueueDispatcher, DispatchQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueDispatcher { tx }, DispatchQueue { rx })
}

/// Sends results to a [`DispatchQueue`].
#[derive(Debug, Clone)]
pub struct QueueDispatcher {
    tx: mpsc::UnboundedSender<PendingResult>,
}

impl Dispatcher for QueueDispatcher {
    fn dispatch(&self, result: PendingResult) {
        if self.tx.send(result).is_err() {
            warn!("Dispatch queue closed, dropping result");
        }
    }
}

/// Receiving end of a [`QueueDispatcher`].
#[derive(Debug)]
pub struct DispatchQueue {
    rx: mpsc::UnboundedReceiver<PendingResult>,
}

impl DispatchQueue {
    /// Delivers every result already queued without waiting. Returns how many
    /// were delivered. Suited to a UI loop that pumps once per frame.
    pub fn drain(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(result) = self.rx.try_recv() {
            result.deliver();
            delivered += 1;
        }
        delivered
    }

    /// Waits for the next result without delivering it.
    pub async fn recv(&mut self) -> Option<PendingResult> {
        self.rx.recv().await
    }

    /// Waits for the next result and delivers it. Returns false once every
    /// dispatcher is gone.
    pub async fn deliver_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(result) => {
                result.deliver();
                true
            }
            None => false,
        }
    }

    /// Delivers results until every dispatcher is dropped.
    pub async fn run(mut self) {
        while self.deliver_next().await {}
    }
}

/// Delivers on the worker that finished the resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, result: PendingResult) {
        result.deliver();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::domain::entities::{CacheKey, ImageSource, LoadedImage, PixelBuffer, ResourceId};
    use crate::domain::errors::ResolveError;
    use crate::domain::ports::Callbacks;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording_result(log: &Log, name: &str, ok: bool) -> PendingResult {
        let on_ok = Arc::clone(log);
        let on_err = Arc::clone(log);
        let ok_name = name.to_string();
        let err_name = name.to_string();
        let target = Callbacks::new(
            move |buffer: PixelBuffer| on_ok.lock().push(format!("{ok_name}:{}", buffer.width())),
            move |e: ResolveError| on_err.lock().push(format!("{err_name}:{:?}", e.kind())),
        );
        let outcome = if ok {
            Ok(LoadedImage {
                key: CacheKey::derive(&ResourceId::new(name)),
                buffer: PixelBuffer::new(image::DynamicImage::new_rgb8(3, 3)),
                source: ImageSource::Network,
            })
        } else {
            Err(ResolveError::network("down"))
        };
        PendingResult::new(Box::new(target), outcome)
    }

    #[test]
    fn test_queue_delivers_only_when_pumped() {
        let log = Log::default();
        let (dispatcher, mut queue) = dispatch_queue();

        dispatcher.dispatch(recording_result(&log, "a", true));
        dispatcher.dispatch(recording_result(&log, "b", false));
        assert!(log.lock().is_empty());

        assert_eq!(queue.drain(), 2);
        assert_eq!(*log.lock(), vec!["a:3".to_string(), "b:Network".to_string()]);
        assert_eq!(queue.drain(), 0);
    }

    #[test]
    fn test_deliver_next_waits_for_result() {
        let log = Log::default();
        let (dispatcher, mut queue) = dispatch_queue();

        dispatcher.dispatch(recording_result(&log, "a", true));
        assert!(tokio_test::block_on(queue.deliver_next()));
        assert_eq!(log.lock().len(), 1);

        drop(dispatcher);
        assert!(!tokio_test::block_on(queue.deliver_next()));
    }

    #[tokio::test]
    async fn test_run_stops_when_dispatchers_dropped() {
        let log = Log::default();
        let (dispatcher, queue) = dispatch_queue();
        let runner = tokio::spawn(queue.run());

        let worker = dispatcher.clone();
        worker.dispatch(recording_result(&log, "a", true));
        drop(worker);
        drop(dispatcher);

        runner.await.unwrap();
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_inline_delivers_immediately() {
        let log = Log::default();
        InlineDispatcher.dispatch(recording_result(&log, "a", false));
        assert_eq!(*log.lock(), vec!["a:Network".to_string()]);
    }

    #[test]
    fn test_dropped_queue_does_not_panic() {
        let log = Log::default();
        let (dispatcher, queue) = dispatch_queue();
        drop(queue);
        dispatcher.dispatch(recording_result(&log, "a", true));
        assert!(log.lock().is_empty());
    }
}
