// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Coalescing of concurrent identical requests.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, WeakShared};
use parking_lot::Mutex;

type FlightMap<T> = Mutex<HashMap<String, Flight<T>>>;

/// The map only holds a weak handle, so a run nobody awaits any more is dropped.
struct Flight<T> {
    generation: u64,
    run: WeakShared<BoxFuture<'static, T>>,
}

/// Runs at most one operation per key at a time and hands its result to every caller.
///
/// The first caller for a key registers a shared future; callers arriving while it is in
/// flight await the same future instead of starting their own. The registration is removed
/// as soon as the operation settles, whether it completes, panics, or is abandoned by every
/// caller, so a later call starts a fresh run.
///
/// If the caller that started a run stops waiting, any remaining caller keeps driving it.
///
/// # Examples
///
/// ```
/// use steadfast::Deduplicator;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let dedup = Deduplicator::new();
///
/// // The second closure never runs: it joins the first call's run.
/// let (a, b) = tokio::join!(
///     dedup.join_or_start("exposure:eu", || async { 42 }),
///     dedup.join_or_start("exposure:eu", || async { 0 }),
/// );
///
/// assert_eq!((a, b), (42, 42));
/// assert_eq!(dedup.in_flight(), 0);
/// # }
/// ```
pub struct Deduplicator<T> {
    flights: Arc<FlightMap<T>>,
    next_generation: AtomicU64,
}

impl<T> Default for Deduplicator<T> {
    fn default() -> Self {
        Self {
            flights: Arc::default(),
            next_generation: AtomicU64::new(0),
        }
    }
}

impl<T> Deduplicator<T> {
    /// Creates an empty deduplicator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with an operation in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }

    /// Whether an operation is in flight for `key`.
    #[must_use]
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.flights.lock().contains_key(key)
    }
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Awaits the operation in flight for `key`, or starts one with `start` if there is none.
    ///
    /// `start` runs at most once, and only when this call becomes the owner of the run. It
    /// is invoked lazily when the shared future is first polled, never under the internal lock.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the operation in every caller awaiting it.
    pub async fn join_or_start<F, Fut>(&self, key: &str, start: F) -> T
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let run = {
            let mut flights = self.flights.lock();

            if let Some(run) = flights.get(key).and_then(|flight| flight.run.upgrade()) {
                run
            } else {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let guard = FlightGuard {
                    flights: Arc::downgrade(&self.flights),
                    key: key.to_owned(),
                    generation,
                };

                let run = async move {
                    let _guard = guard;
                    start().await
                }
                .boxed()
                .shared();

                if let Some(weak) = run.downgrade() {
                    flights.insert(key.to_owned(), Flight { generation, run: weak });
                }
                run
            }
        };

        run.await
    }
}

impl<T> fmt::Debug for Deduplicator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deduplicator").field("in_flight", &self.in_flight()).finish()
    }
}

/// Removes the registration of a run once its future settles or is dropped.
struct FlightGuard<T> {
    flights: Weak<FlightMap<T>>,
    key: String,
    generation: u64,
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        let Some(flights) = self.flights.upgrade() else {
            return;
        };

        let mut flights = flights.lock();
        if flights.get(&self.key).is_some_and(|flight| flight.generation == self.generation) {
            flights.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(Deduplicator<String>: Send, Sync);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_run() {
        let dedup = Deduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let start = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                "value".to_owned()
            }
        };

        let results = futures::future::join_all((0..5).map(|_| dedup.join_or_start("k", start(Arc::clone(&calls))))).await;

        assert!(results.iter().all(|r| r == "value"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn different_keys_run_independently() {
        let dedup = Deduplicator::new();

        let (a, b) = tokio::join!(
            dedup.join_or_start("a", || async { 1 }),
            dedup.join_or_start("b", || async { 2 }),
        );

        assert_eq!((a, b), (1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_calls_run_again() {
        let dedup = Deduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            dedup
                .join_or_start("k", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_run_is_unregistered() {
        let dedup = Deduplicator::<u8>::new();

        let pending = dedup.join_or_start("k", || std::future::pending());
        let _ = tokio::time::timeout(Duration::from_millis(10), pending).await;

        assert!(!dedup.is_in_flight("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_run_is_unregistered() {
        let dedup = Arc::new(Deduplicator::<u8>::new());

        let task = tokio::spawn({
            let dedup = Arc::clone(&dedup);
            async move { dedup.join_or_start("k", || async { panic!("operation exploded") }).await }
        });

        assert!(task.await.is_err());
        assert_eq!(dedup.in_flight(), 0);
        assert_eq!(dedup.join_or_start("k", || async { 7 }).await, 7);
    }
}
