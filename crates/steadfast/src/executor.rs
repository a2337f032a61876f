// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Resilient query execution.

use std::fmt;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use steadfast_cache::{CacheStats, CacheStore, MemoryStore, TelemetryConfig};
use tokio_util::sync::CancellationToken;

use crate::telemetry::{QueryActivity, QueryTelemetry};
use crate::{Backoff, ConnectivityMonitor, Deduplicator, Outcome, QueryError, RetryConfig};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

type FailureSink = Arc<dyn Fn(Option<&str>, &QueryError) + Send + Sync>;

/// Per-call settings for [`ResilientExecutor::execute`].
///
/// Without a cache key the call is neither cached nor deduplicated.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use steadfast::{ExecuteOptions, RetryConfig};
///
/// let options = ExecuteOptions::new()
///     .cache_key("positions:desk-7")
///     .cache_ttl(Duration::from_secs(30))
///     .retry(RetryConfig::no_retries());
///
/// assert_eq!(options.key(), Some("positions:desk-7"));
/// ```
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    retry: RetryConfig,
    cache_key: Option<String>,
    cache_ttl: Duration,
    enable_offline_mode: bool,
    cancellation: Option<CancellationToken>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            cache_key: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            enable_offline_mode: true,
            cancellation: None,
        }
    }
}

impl ExecuteOptions {
    /// Default options: default retry policy, no cache key, 5 minute TTL, offline mode on.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Caches the result under `key` and deduplicates concurrent calls with the same key.
    #[must_use]
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Sets how long a fetched value stays fresh.
    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Whether a cached value, even an expired one, is served while offline.
    #[must_use]
    pub fn enable_offline_mode(mut self, enabled: bool) -> Self {
        self.enable_offline_mode = enabled;
        self
    }

    /// Stops retrying and waiting once `token` is cancelled.
    ///
    /// The token of the caller that starts a run governs the run itself; the token of a
    /// caller joining an existing run only stops that caller from waiting.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// The cache key, if any.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }
}

/// Executes data-source operations with caching, deduplication, retry and offline fallback.
///
/// For a call with a cache key, [`execute`](Self::execute):
///
/// 1. serves a fresh cached value without calling the operation;
/// 2. otherwise joins a run already in flight for the key, or starts one;
/// 3. in that run, serves the cached value (even expired) when offline, calls the operation,
///    writes successes through to the cache, and retries transient failures with backoff;
/// 4. once retries are exhausted or the failure is permanent, falls back to the cached value
///    (even expired) or reports the failure.
///
/// Every caller joined to a run receives its outcome. Failures are values: `execute` always
/// returns an [`Outcome`].
///
/// Cloning is cheap and clones share the store, in-flight runs and connectivity state.
///
/// # Examples
///
/// ```
/// use steadfast::{ExecuteOptions, ResilientExecutor};
/// use steadfast_cache::{CacheConfig, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), steadfast_cache::ConfigError> {
/// let store = MemoryStore::new(CacheConfig::builder("exposures").build()?);
/// let executor: ResilientExecutor<u64> = ResilientExecutor::new(store);
///
/// let outcome = executor
///     .execute(|| async { Ok(1_250_000) }, ExecuteOptions::new().cache_key("exposure:eu"))
///     .await;
/// assert_eq!(outcome.data(), Some(&1_250_000));
/// assert!(!outcome.from_cache());
///
/// let again = executor
///     .execute(|| async { Ok(0) }, ExecuteOptions::new().cache_key("exposure:eu"))
///     .await;
/// assert!(again.from_cache());
/// # Ok(())
/// # }
/// ```
pub struct ResilientExecutor<V, C = MemoryStore<V>> {
    inner: Arc<ExecutorInner<V, C>>,
}

struct ExecutorInner<V, C> {
    store: C,
    in_flight: Deduplicator<Outcome<V>>,
    connectivity: ConnectivityMonitor,
    backoff: Backoff,
    on_failure: Option<FailureSink>,
    telemetry: QueryTelemetry,
}

/// Builder for [`ResilientExecutor`].
#[must_use]
pub struct ResilientExecutorBuilder<V, C> {
    store: C,
    connectivity: ConnectivityMonitor,
    on_failure: Option<FailureSink>,
    telemetry: TelemetryConfig,
    _value: PhantomData<fn() -> V>,
}

impl<V, C> ResilientExecutorBuilder<V, C> {
    /// Shares an existing connectivity monitor instead of creating one that starts online.
    pub fn connectivity(mut self, monitor: ConnectivityMonitor) -> Self {
        self.connectivity = monitor;
        self
    }

    /// Registers a callback invoked with the cache key and the error whenever an execution
    /// ends in a failure with no cached fallback.
    pub fn on_failure<F>(mut self, sink: F) -> Self
    where
        F: Fn(Option<&str>, &QueryError) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(sink));
        self
    }

    /// Sets how the executor reports its activity.
    pub fn telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Builds the executor.
    #[must_use]
    pub fn build(self) -> ResilientExecutor<V, C> {
        ResilientExecutor {
            inner: Arc::new(ExecutorInner {
                store: self.store,
                in_flight: Deduplicator::new(),
                connectivity: self.connectivity,
                backoff: Backoff::new(),
                on_failure: self.on_failure,
                telemetry: QueryTelemetry::new(&self.telemetry),
            }),
        }
    }
}

impl<V, C> ResilientExecutor<V, C>
where
    C: CacheStore<V>,
{
    /// Starts building an executor that owns `store`.
    pub fn builder(store: C) -> ResilientExecutorBuilder<V, C> {
        ResilientExecutorBuilder {
            store,
            connectivity: ConnectivityMonitor::new(),
            on_failure: None,
            telemetry: TelemetryConfig::new(),
            _value: PhantomData,
        }
    }

    /// Creates an executor with default settings that owns `store`.
    #[must_use]
    pub fn new(store: C) -> Self {
        Self::builder(store).build()
    }

    /// The store backing this executor.
    #[must_use]
    pub fn store(&self) -> &C {
        &self.inner.store
    }

    /// The connectivity monitor consulted before each attempt.
    #[must_use]
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// Whether the data source is currently considered reachable.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    /// Number of keys with a run in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.in_flight()
    }

    /// Describes the cache contents.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.store.stats()
    }

    /// Reads a fresh value directly from the cache.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.store.get(key).await
    }

    /// Writes a value directly to the cache.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the write could not be completed.
    pub async fn set(&self, key: &str, value: V, ttl: Duration) -> steadfast_cache::Result<()> {
        self.inner.store.set(key, value, ttl).await
    }

    /// Removes cached entries matching `pattern` and returns how many were found.
    ///
    /// # Errors
    ///
    /// Returns the store's error for an invalid pattern or a failed removal.
    pub async fn invalidate(&self, pattern: &str) -> steadfast_cache::Result<usize> {
        self.inner.store.invalidate(pattern).await
    }
}

impl<V, C> ResilientExecutor<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: CacheStore<V> + 'static,
{
    /// Runs `operation` under the cache, deduplication, retry and offline policies.
    ///
    /// `operation` is called once per attempt.
    pub async fn execute<F, Fut>(&self, operation: F, options: ExecuteOptions) -> Outcome<V>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, QueryError>> + Send + 'static,
    {
        let Some(key) = options.cache_key.clone() else {
            return Self::guarded(Arc::clone(&self.inner), operation, options).await;
        };

        if let Some(entry) = self.inner.store.get_entry(&key).await {
            self.inner.telemetry.record(Some(&key), QueryActivity::CacheHit, 0);
            return Outcome::cached(entry.into_value());
        }

        if self.inner.in_flight.is_in_flight(&key) {
            self.inner.telemetry.record(Some(&key), QueryActivity::Joined, 0);
        }

        let waiter = options.cancellation.clone();
        let inner = Arc::clone(&self.inner);
        let joined = self
            .inner
            .in_flight
            .join_or_start(&key, move || Self::guarded(inner, operation, options));

        match waiter {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Outcome::failed(QueryError::cancelled()),
                    outcome = joined => outcome,
                }
            }
            None => joined.await,
        }
    }

    /// Drives one run to completion, turning a panic in the operation into a failure.
    async fn guarded<F, Fut>(inner: Arc<ExecutorInner<V, C>>, operation: F, options: ExecuteOptions) -> Outcome<V>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, QueryError>> + Send + 'static,
    {
        let key = options.cache_key.clone();

        match AssertUnwindSafe(inner.run(operation, options)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => inner.settle(key.as_deref(), QueryError::panicked(), 0).await,
        }
    }
}

impl<V, C> ExecutorInner<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: CacheStore<V> + 'static,
{
    async fn run<F, Fut>(&self, operation: F, options: ExecuteOptions) -> Outcome<V>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, QueryError>> + Send + 'static,
    {
        let ExecuteOptions {
            retry,
            cache_key,
            cache_ttl,
            enable_offline_mode,
            cancellation,
        } = options;
        let key = cache_key.as_deref();
        let token = cancellation.unwrap_or_default();
        let mut attempt = 0;

        loop {
            if enable_offline_mode
                && !self.connectivity.is_online()
                && let Some(key) = key
                && let Some(entry) = self.store.peek(key).await
            {
                self.telemetry.record(Some(key), QueryActivity::OfflineFallback, attempt);
                return Outcome::cached(entry.into_value());
            }

            self.telemetry.record(key, QueryActivity::Started, attempt);

            let result = tokio::select! {
                biased;
                () = token.cancelled() => Err(QueryError::cancelled()),
                result = operation() => result,
            };

            let error = match result {
                Ok(value) => {
                    if let Some(key) = key {
                        self.write_through(key, value.clone(), cache_ttl, attempt).await;
                    }
                    self.telemetry.record(key, QueryActivity::Succeeded, attempt);
                    return Outcome::fresh(value);
                }
                Err(error) => error,
            };

            if error.is_cancelled() {
                self.telemetry.record(key, QueryActivity::Cancelled, attempt);
                return Outcome::failed(error);
            }

            if attempt < retry.max_retries() && error.is_retryable() {
                let delay = self.backoff.delay(attempt, &retry);
                self.telemetry.record_error(key, QueryActivity::Retrying, attempt, &error);

                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        self.telemetry.record(key, QueryActivity::Cancelled, attempt);
                        return Outcome::failed(QueryError::cancelled());
                    }
                    () = tokio::time::sleep(delay) => {}
                }

                attempt += 1;
                continue;
            }

            return self.settle(key, error, attempt).await;
        }
    }

    /// Resolves a terminal failure: the cached value if one exists, expired or not, else the error.
    async fn settle(&self, key: Option<&str>, error: QueryError, attempt: u32) -> Outcome<V> {
        if let Some(key) = key
            && let Some(entry) = self.store.peek(key).await
        {
            self.telemetry.record_error(Some(key), QueryActivity::StaleFallback, attempt, &error);
            return Outcome::cached(entry.into_value());
        }

        self.telemetry.record_error(key, QueryActivity::Failed, attempt, &error);
        if let Some(sink) = &self.on_failure {
            sink(key, &error);
        }

        Outcome::failed(error)
    }

    async fn write_through(&self, key: &str, value: V, ttl: Duration, attempt: u32) {
        if let Err(error) = self.store.set(key, value, ttl).await {
            self.telemetry.record_error(Some(key), QueryActivity::CacheWriteFailed, attempt, &error);
        }
    }
}

impl<V, C> Clone for ResilientExecutor<V, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, C: fmt::Debug> fmt::Debug for ResilientExecutor<V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientExecutor")
            .field("store", &self.inner.store)
            .field("in_flight", &self.inner.in_flight)
            .field("connectivity", &self.inner.connectivity)
            .field("on_failure", &self.inner.on_failure.is_some())
            .finish_non_exhaustive()
    }
}

impl<V, C: fmt::Debug> fmt::Debug for ResilientExecutorBuilder<V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientExecutorBuilder")
            .field("store", &self.store)
            .field("connectivity", &self.connectivity)
            .field("on_failure", &self.on_failure.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;
    use steadfast_cache::{CacheConfig, CacheCoordinator};

    use super::*;

    async fn explode() -> Result<u8, QueryError> {
        panic!("driver bug")
    }

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(ResilientExecutor<String>: Send, Sync, Clone);
        assert_impl_all!(ResilientExecutor<String, CacheCoordinator<String>>: Send, Sync, Clone);
        assert_impl_all!(ExecuteOptions: Send, Sync, Clone);
    }

    #[test]
    fn option_defaults() {
        let options = ExecuteOptions::default();

        assert_eq!(options.retry, RetryConfig::default());
        assert!(options.key().is_none());
        assert_eq!(options.cache_ttl, Duration::from_secs(300));
        assert!(options.enable_offline_mode);
        assert!(options.cancellation.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_operation_becomes_failure() {
        let store = MemoryStore::new(CacheConfig::builder("t").build().unwrap());
        let executor: ResilientExecutor<u8> = ResilientExecutor::builder(store)
            .telemetry(TelemetryConfig::new().without_logs())
            .build();

        let outcome = executor
            .execute(explode, ExecuteOptions::new().cache_key("k"))
            .await;

        assert_eq!(outcome.error().map(QueryError::kind), Some(crate::QueryErrorKind::Panicked));
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_operation_falls_back_to_cache() {
        let store = MemoryStore::new(CacheConfig::builder("t").build().unwrap());
        let executor: ResilientExecutor<u8> = ResilientExecutor::builder(store)
            .telemetry(TelemetryConfig::new().without_logs())
            .build();
        executor.set("k", 9, Duration::from_millis(1)).await.unwrap();
        tokio::time::advance(Duration::from_millis(5)).await;

        let outcome = executor
            .execute(explode, ExecuteOptions::new().cache_key("k"))
            .await;

        assert!(outcome.from_cache());
        assert_eq!(outcome.into_data(), Some(9));
    }
}
