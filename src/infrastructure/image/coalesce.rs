//! Single-flight coalescing of concurrent resolutions.
//!
//! When enabled, the first miss for a key runs the cascade and every request
//! for the same key and requested size arriving meanwhile waits for that
//! result instead of fetching again. Requests for other sizes of the same key
//! run their own cascade, so nobody receives a decode at a size they did not
//! ask for.
//!
//! ```text
//! resolve A ─┐
//! resolve B ─┼──► SingleFlight ──► one cascade
//! resolve C ─┘        ▲                 │
//!                     └── broadcast ────┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::entities::{CacheKey, LoadedImage, RequestedSize};
use crate::domain::errors::ResolveError;

type Outcome = Result<LoadedImage, ResolveError>;
type FlightKey = (CacheKey, RequestedSize);

/// Tracks in-flight cascades by key and requested size.
#[derive(Debug, Default)]
pub struct SingleFlight {
    in_flight: Mutex<HashMap<FlightKey, broadcast::Sender<Outcome>>>,
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
}

enum Registration<'a> {
    Leader(FlightGuard<'a>),
    Follower(broadcast::Receiver<Outcome>),
}

/// Removes the in-flight entry when the leader finishes or is dropped, so
/// followers never wait on a cascade that no longer runs.
struct FlightGuard<'a> {
    flights: &'a SingleFlight,
    key: FlightKey,
    completed: bool,
}

impl FlightGuard<'_> {
    fn complete(mut self, outcome: &Outcome) {
        self.completed = true;
        let sender = self.flights.in_flight.lock().remove(&self.key);
        if let Some(tx) = sender {
            let waiters = tx.receiver_count();
            let _ = tx.send(outcome.clone());
            if waiters > 0 {
                debug!(key = %self.key.0, waiters, "Shared result with coalesced requests");
            }
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.flights.in_flight.lock().remove(&self.key);
        }
    }
}

impl SingleFlight {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` for `key` at `requested` unless such a run is already in
    /// flight, in which case waits for and returns that run's outcome.
    pub async fn run<F>(&self, key: &CacheKey, requested: RequestedSize, work: F) -> Outcome
    where
        F: Future<Output = Outcome>,
    {
        match self.register(key, requested) {
            Registration::Leader(guard) => {
                let outcome = work.await;
                guard.complete(&outcome);
                outcome
            }
            Registration::Follower(mut rx) => rx.recv().await.unwrap_or_else(|_| {
                Err(ResolveError::internal("in-flight resolution was abandoned"))
            }),
        }
    }

    fn register(&self, key: &CacheKey, requested: RequestedSize) -> Registration<'_> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let flight = (key.clone(), requested);
        let mut in_flight = self.in_flight.lock();

        if let Some(tx) = in_flight.get(&flight) {
            self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Coalescing request with in-flight resolution");
            Registration::Follower(tx.subscribe())
        } else {
            let (tx, _rx) = broadcast::channel(1);
            in_flight.insert(flight.clone(), tx);
            Registration::Leader(FlightGuard {
                flights: self,
                key: flight,
                completed: false,
            })
        }
    }

    /// Number of distinct flights currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Requests seen and how many of them were coalesced.
    pub fn counts(&self) -> (u64, u64) {
        (
            self.total_requests.load(Ordering::Relaxed),
            self.coalesced_requests.load(Ordering::Relaxed),
        )
    }
}
