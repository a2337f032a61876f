// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Multi-tier cache coordination.
//!
//! A [`CacheCoordinator`] keeps a bounded L1 [`MemoryStore`] in front of replica (L2) tiers and an
//! optional durable (L3) tier. Reads fall through the tiers and backfill the faster ones; writes
//! reach the tiers according to the configured [`ConsistencyLevel`]; invalidation follows the
//! configured [`InvalidationStrategy`].

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join, join_all};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::dependency::DependencyGraph;
use crate::memory::Lookup;
use crate::metrics::MetricsCollector;
use crate::pattern::KeyPattern;
use crate::periodic::spawn_periodic;
use crate::store::CacheStats;
use crate::telemetry::{CacheActivity, CacheOperation, CacheTelemetry, TelemetryConfig};
use crate::{
    CacheConfig, CacheEntry, CacheMetrics, CacheStore, CacheTier, ConsistencyLevel, Error, InvalidationStrategy, MemoryStore, NoopTier,
    Result, TuningAdvice,
};

/// What a reconciliation pass examined and fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub struct ReconcileReport {
    /// Distinct keys compared across tiers.
    pub keys_examined: usize,
    /// Tier copies overwritten with the newest entry.
    pub repaired: usize,
}

/// A multi-tier cache for one namespace.
///
/// Tier failures never fail a read: they are logged and treated as misses. With the default
/// [`NoopTier`] replica and durable types the coordinator behaves exactly like its L1 store.
///
/// Cloning is cheap and clones share all state.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use steadfast_cache::{CacheConfig, CacheCoordinator, ConsistencyLevel, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), steadfast_cache::Error> {
/// let config = CacheConfig::builder("limits")
///     .consistency_level(ConsistencyLevel::Strong)
///     .replication_factor(2)
///     .build()?;
///
/// let replicas = [
///     Arc::new(MemoryStore::<u64>::new(config.clone())),
///     Arc::new(MemoryStore::<u64>::new(config.clone())),
/// ];
/// let cache = CacheCoordinator::builder(config).replicas(replicas).build();
///
/// cache.set("desk:fx", 250_000_u64, Duration::from_secs(30)).await?;
/// assert_eq!(cache.get("desk:fx").await, Some(250_000));
/// # Ok(())
/// # }
/// ```
pub struct CacheCoordinator<V, R = NoopTier, D = NoopTier> {
    inner: Arc<CoordinatorInner<V, R, D>>,
}

struct CoordinatorInner<V, R, D> {
    config: CacheConfig,
    l1: MemoryStore<V>,
    replicas: Vec<Arc<R>>,
    durable: Option<Arc<D>>,
    dependencies: Mutex<DependencyGraph>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    telemetry: CacheTelemetry,
}

/// Builder for [`CacheCoordinator`].
#[must_use]
pub struct CacheCoordinatorBuilder<V, R = NoopTier, D = NoopTier> {
    config: CacheConfig,
    replicas: Vec<Arc<R>>,
    durable: Option<Arc<D>>,
    telemetry: TelemetryConfig,
    _value: PhantomData<fn() -> V>,
}

impl<V> CacheCoordinator<V> {
    /// Starts building a coordinator with no tiers besides L1.
    pub fn builder(config: CacheConfig) -> CacheCoordinatorBuilder<V> {
        CacheCoordinatorBuilder {
            config,
            replicas: Vec::new(),
            durable: None,
            telemetry: TelemetryConfig::new(),
            _value: PhantomData,
        }
    }
}

impl<V, R, D> CacheCoordinatorBuilder<V, R, D> {
    /// Sets the replica (L2) tiers.
    ///
    /// Only the first `replication_factor` replicas are used.
    pub fn replicas<R2>(self, replicas: impl IntoIterator<Item = Arc<R2>>) -> CacheCoordinatorBuilder<V, R2, D> {
        CacheCoordinatorBuilder {
            config: self.config,
            replicas: replicas.into_iter().collect(),
            durable: self.durable,
            telemetry: self.telemetry,
            _value: PhantomData,
        }
    }

    /// Sets the durable (L3) tier.
    pub fn durable<D2>(self, durable: Arc<D2>) -> CacheCoordinatorBuilder<V, R, D2> {
        CacheCoordinatorBuilder {
            config: self.config,
            replicas: self.replicas,
            durable: Some(durable),
            telemetry: self.telemetry,
            _value: PhantomData,
        }
    }

    /// Sets how the coordinator reports its activity.
    pub fn telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }
}

impl<V, R, D> CacheCoordinatorBuilder<V, R, D>
where
    V: Send,
    R: CacheTier<V>,
    D: CacheTier<V>,
{
    /// Builds the coordinator. No-op tiers are dropped.
    #[must_use]
    pub fn build(self) -> CacheCoordinator<V, R, D> {
        let telemetry = self.telemetry.build();

        let mut replicas = self.replicas;
        replicas.retain(|replica| !replica.is_noop());
        replicas.truncate(self.config.replication_factor());

        CacheCoordinator {
            inner: Arc::new(CoordinatorInner {
                l1: MemoryStore::with_parts(self.config.clone(), Arc::new(MetricsCollector::new()), telemetry.clone()),
                config: self.config,
                replicas,
                durable: self.durable.filter(|durable| !durable.is_noop()),
                dependencies: Mutex::new(DependencyGraph::default()),
                pending: Mutex::new(Vec::new()),
                telemetry,
            }),
        }
    }
}

impl<V, R, D> CacheCoordinator<V, R, D> {
    /// The configuration this coordinator was built with.
    ///
    /// Tier implementations read [`CacheConfig::compression_enabled`] from here.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The L1 store.
    #[must_use]
    pub fn local(&self) -> &MemoryStore<V> {
        &self.inner.l1
    }

    /// Describes the L1 contents.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.l1.stats()
    }

    /// A snapshot of hit, miss, eviction, latency and memory counters.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        self.inner.l1.metrics()
    }

    /// Applies the capacity suggested by the collected metrics to L1 and returns the advice.
    ///
    /// Entries carry their own TTL, so [`TuningAdvice::ttl`] is only reported; callers pick it
    /// up for the TTLs of their next writes.
    pub fn apply_tuning(&self) -> TuningAdvice {
        let l1 = &self.inner.l1;
        let advice = l1.collector().advise(&self.inner.config, l1.max_size());

        if advice.max_size != l1.max_size() {
            let evicted = l1.resize(advice.max_size);
            self.inner.forget_dependencies(&evicted);
            if self.inner.telemetry.logging_enabled() {
                tracing::info!(
                    cache.name = self.inner.config.namespace(),
                    cache.max_size = advice.max_size,
                    "cache capacity tuned"
                );
            }
        }

        advice
    }

    fn namespace(&self) -> &str {
        self.inner.config.namespace()
    }

    fn record(&self, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>) {
        self.inner.telemetry.record(self.namespace(), operation, activity, duration);
    }

    fn has_remote_tiers(&self) -> bool {
        !self.inner.replicas.is_empty() || self.inner.durable.is_some()
    }
}

impl<V, R, D> CoordinatorInner<V, R, D> {
    /// Drops the dependency edges of keys L1 no longer holds.
    fn forget_dependencies(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }

        let mut dependencies = self.dependencies.lock();
        for key in keys {
            dependencies.forget(key);
        }
    }
}

impl<V, R, D> CacheCoordinator<V, R, D>
where
    V: Clone + Send + Sync + 'static,
    R: CacheTier<V> + 'static,
    D: CacheTier<V> + 'static,
{
    /// Returns the freshest value available for `key`.
    ///
    /// Reads go L1, then replicas, then the durable tier, backfilling the faster tiers on a
    /// hit. With [`ConsistencyLevel::Strong`] every replica is consulted, the newest entry wins
    /// and lagging replicas are repaired before returning.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.read(key, true).await.map(CacheEntry::into_value)
    }

    /// Returns the freshest unexpired entry for `key`, read the same way as [`get`](Self::get).
    ///
    /// Expired copies are left in place, so [`peek`](Self::peek) can still return them.
    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.read(key, false).await
    }

    async fn read(&self, key: &str, evict_expired: bool) -> Option<CacheEntry<V>> {
        let started = Instant::now();

        let entry = if self.reads_all_replicas() {
            self.read_newest(key, evict_expired).await
        } else {
            self.read_through(key, evict_expired).await
        };

        let elapsed = started.elapsed();
        let collector = self.inner.l1.collector();
        let activity = if entry.is_some() {
            collector.record_hit(elapsed);
            CacheActivity::Hit
        } else {
            collector.record_miss(elapsed);
            CacheActivity::Miss
        };
        self.record(CacheOperation::Get, activity, Some(elapsed));

        entry
    }

    /// Returns the entry stored for `key` in the first tier that has one, expired or not.
    ///
    /// Nothing is deleted or backfilled.
    pub async fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        if let Some(entry) = self.inner.l1.peek(key) {
            return Some(entry);
        }

        self.peek_remote(key).await
    }

    async fn peek_remote(&self, key: &str) -> Option<CacheEntry<V>> {
        for replica in &self.inner.replicas {
            if let Some(entry) = self.fetch(replica.as_ref(), key).await {
                return Some(entry);
            }
        }

        let durable = self.inner.durable.as_deref()?;
        self.fetch(durable, key).await
    }

    /// Writes `value` under `key` to every tier.
    ///
    /// # Errors
    ///
    /// With [`ConsistencyLevel::Strong`], returns [`Error::Replication`] if any replica or
    /// the durable tier rejected the write. L1 holds the value either way.
    pub async fn set(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        self.set_with_tags(key, value, ttl, Vec::new()).await
    }

    /// Writes `value` under `key`, recording that it depends on each of `tags`.
    ///
    /// Under [`InvalidationStrategy::DependencyBased`], invalidating a tag (or a key used as a
    /// tag) also invalidates this key.
    ///
    /// # Errors
    ///
    /// Same as [`set`](Self::set).
    pub async fn set_with_tags(&self, key: &str, value: V, ttl: Duration, tags: Vec<String>) -> Result<()> {
        let entry = CacheEntry::new(key, value, ttl).with_tags(tags);

        self.inner.dependencies.lock().record(key, entry.tags());
        let evicted = self.inner.l1.insert_evicting(entry.clone());
        self.inner.forget_dependencies(&evicted);

        if !self.has_remote_tiers() {
            return Ok(());
        }

        match self.inner.config.consistency_level() {
            ConsistencyLevel::Strong => {
                let (failed, total) = self.write_remote(&entry, CacheActivity::Error).await;
                if failed > 0 {
                    return Err(Error::Replication { failed, total });
                }
            }
            ConsistencyLevel::Weak => {
                self.write_remote(&entry, CacheActivity::TierUnavailable).await;
            }
            ConsistencyLevel::Eventual => self.spawn_remote_write(entry),
        }

        Ok(())
    }

    /// Waits for background writes started under [`ConsistencyLevel::Eventual`].
    ///
    /// The writes themselves run to completion even if this future or the coordinator is
    /// dropped.
    pub async fn flush(&self) {
        let pending = std::mem::take(&mut *self.inner.pending.lock());

        for task in pending {
            if let Err(error) = task.await {
                self.inner
                    .telemetry
                    .record_error(self.namespace(), CacheOperation::Insert, CacheActivity::Error, &error);
            }
        }
    }

    /// Removes entries matching `pattern` from every tier and returns how many keys were found.
    ///
    /// - [`InvalidationStrategy::TimeBased`]: `pattern` is taken literally as a single key.
    /// - [`InvalidationStrategy::Manual`]: `pattern` may contain `*` wildcards.
    /// - [`InvalidationStrategy::DependencyBased`]: as `Manual`, plus every key tagged with a
    ///   matching tag and, transitively, everything depending on a removed key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] for a pattern that cannot be compiled, and with
    /// [`ConsistencyLevel::Strong`] returns [`Error::Replication`] if a tier failed to remove
    /// an entry.
    pub async fn invalidate(&self, pattern: &str) -> Result<usize> {
        let started = Instant::now();
        let strategy = self.inner.config.invalidation_strategy();

        let pattern = match strategy {
            InvalidationStrategy::TimeBased => KeyPattern::exact(pattern),
            InvalidationStrategy::Manual | InvalidationStrategy::DependencyBased => KeyPattern::parse(pattern)?,
        };

        let mut found: HashSet<String> = match pattern.as_exact() {
            Some(key) => {
                if self.contains_anywhere(key).await {
                    HashSet::from([key.to_owned()])
                } else {
                    HashSet::new()
                }
            }
            None => self.known_keys().await.into_iter().filter(|key| pattern.matches(key)).collect(),
        };

        if strategy == InvalidationStrategy::DependencyBased {
            found = self.dependency_view().await.closure(found, &pattern);
        }

        let mut targets = found.clone();
        if let Some(key) = pattern.as_exact() {
            targets.insert(key.to_owned());
        }

        {
            let mut dependencies = self.inner.dependencies.lock();
            for key in &targets {
                self.inner.l1.remove(key);
                dependencies.forget(key);
            }
        }

        let (failed, total) = self.invalidate_remote(&targets).await;
        self.record(CacheOperation::Invalidate, CacheActivity::Invalidated, Some(started.elapsed()));

        if failed > 0 && self.inner.config.consistency_level() == ConsistencyLevel::Strong {
            return Err(Error::Replication { failed, total });
        }

        Ok(found.len())
    }

    /// Brings lagging replicas and L1 up to the newest entry held anywhere, last writer wins.
    ///
    /// Expired entries are left to expire rather than copied around.
    pub async fn reconcile(&self) -> ReconcileReport {
        let started = Instant::now();
        let mut report = ReconcileReport::default();

        if self.inner.replicas.is_empty() {
            return report;
        }

        for key in self.known_keys().await {
            report.keys_examined += 1;

            let local = self.inner.l1.peek(&key);
            let reads = self.read_replicas(&key).await;

            let Some(newest) = newest_of(&reads, local.as_ref()).cloned() else {
                continue;
            };
            if newest.is_expired() {
                continue;
            }

            report.repaired += self.repair_replicas(CacheOperation::Reconcile, &newest, &reads).await;

            if local.as_ref().is_some_and(|held| newest.is_newer_than(held)) && self.store_local(&newest) {
                report.repaired += 1;
            }
        }

        let activity = if report.repaired > 0 {
            CacheActivity::Repaired
        } else {
            CacheActivity::Ok
        };
        self.record(CacheOperation::Reconcile, activity, Some(started.elapsed()));

        report
    }

    /// Starts a background task calling [`reconcile`](Self::reconcile) every `every`.
    ///
    /// The task stops once every clone of the coordinator is dropped.
    pub fn spawn_reconciler(&self, every: Duration) -> JoinHandle<()> {
        spawn_periodic(Arc::downgrade(&self.inner), every, |inner| async move {
            Self { inner }.reconcile().await;
        })
    }

    /// Starts a background task removing expired L1 entries every `every`.
    ///
    /// The task stops once every clone of the coordinator is dropped.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        spawn_periodic(Arc::downgrade(&self.inner), every, |inner| async move {
            let swept = inner.l1.remove_expired();
            inner.forget_dependencies(&swept);
        })
    }

    /// Removes every entry from every tier, after letting pending background writes land.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Replication`] if a tier failed to clear.
    pub async fn clear(&self) -> Result<()> {
        self.flush().await;

        self.inner.l1.clear();
        self.inner.dependencies.lock().clear();

        let durable = async {
            match self.inner.durable.as_deref() {
                Some(durable) => Some(durable.clear().await),
                None => None,
            }
        };
        let (replica_results, durable_result) = join(join_all(self.inner.replicas.iter().map(|replica| replica.clear())), durable).await;

        let total = replica_results.len() + usize::from(durable_result.is_some());
        let failed = self.count_failures(CacheOperation::Clear, CacheActivity::Error, replica_results.iter().chain(durable_result.iter()));

        if failed > 0 {
            return Err(Error::Replication { failed, total });
        }
        Ok(())
    }

    fn reads_all_replicas(&self) -> bool {
        self.inner.config.consistency_level() == ConsistencyLevel::Strong && !self.inner.replicas.is_empty()
    }

    async fn read_through(&self, key: &str, evict_expired: bool) -> Option<CacheEntry<V>> {
        if evict_expired {
            match self.inner.l1.lookup(key, Instant::now()) {
                Lookup::Fresh(entry) => return Some(entry),
                Lookup::Expired => self.expired_locally(key),
                Lookup::Missing => {}
            }
        } else if let Some(entry) = self.inner.l1.peek(key).filter(|entry| !entry.is_expired()) {
            return Some(entry);
        }

        for replica in &self.inner.replicas {
            if let Some(entry) = self.fetch(replica.as_ref(), key).await
                && !entry.is_expired()
            {
                self.backfill_local(&entry);
                return Some(entry);
            }
        }

        let durable = self.inner.durable.as_deref()?;
        let entry = self.fetch(durable, key).await.filter(|entry| !entry.is_expired())?;

        if !self.inner.replicas.is_empty() {
            let results = join_all(self.inner.replicas.iter().map(|replica| replica.insert(entry.clone()))).await;
            self.count_failures(CacheOperation::Get, CacheActivity::TierUnavailable, results.iter());
        }
        self.backfill_local(&entry);

        Some(entry)
    }

    async fn read_newest(&self, key: &str, evict_expired: bool) -> Option<CacheEntry<V>> {
        let local = self.inner.l1.peek(key);
        let reads = self.read_replicas(key).await;

        let mut newest = newest_of(&reads, local.as_ref()).cloned();
        if newest.is_none()
            && let Some(durable) = self.inner.durable.as_deref()
        {
            newest = self.fetch(durable, key).await;
        }

        let newest = newest?;
        if newest.is_expired() {
            if evict_expired && self.inner.l1.remove(key).is_some() {
                self.expired_locally(key);
            }
            return None;
        }

        self.repair_replicas(CacheOperation::Get, &newest, &reads).await;
        self.backfill_local(&newest);

        Some(newest)
    }

    async fn read_replicas(&self, key: &str) -> Vec<Option<CacheEntry<V>>> {
        join_all(self.inner.replicas.iter().map(|replica| self.fetch(replica.as_ref(), key))).await
    }

    /// Overwrites every replica whose copy is missing or older than `newest`.
    async fn repair_replicas(&self, operation: CacheOperation, newest: &CacheEntry<V>, reads: &[Option<CacheEntry<V>>]) -> usize {
        let lagging = self
            .inner
            .replicas
            .iter()
            .zip(reads)
            .filter(|(_, read)| read.as_ref().is_none_or(|held| newest.is_newer_than(held)))
            .map(|(replica, _)| replica.insert(newest.clone()));

        let results = join_all(lagging).await;
        let failed = self.count_failures(operation, CacheActivity::TierUnavailable, results.iter());
        let repaired = results.len() - failed;

        if repaired > 0 {
            self.record(operation, CacheActivity::Repaired, None);
        }
        repaired
    }

    async fn fetch<T: CacheTier<V>>(&self, tier: &T, key: &str) -> Option<CacheEntry<V>> {
        let started = Instant::now();
        let result = tier.get(key).await;
        self.inner.l1.collector().record_network_latency(started.elapsed());

        match result {
            Ok(entry) => entry,
            Err(error) => {
                self.inner
                    .telemetry
                    .record_error(self.namespace(), CacheOperation::Get, CacheActivity::TierUnavailable, &error);
                None
            }
        }
    }

    fn backfill_local(&self, entry: &CacheEntry<V>) {
        if self.store_local(entry) {
            self.record(CacheOperation::Get, CacheActivity::Backfilled, None);
        }
    }

    /// Copies a tier entry into L1 unless L1 holds a newer one, tracking its tags.
    fn store_local(&self, entry: &CacheEntry<V>) -> bool {
        let Some(evicted) = self.inner.l1.insert_if_newer(entry.clone()) else {
            return false;
        };

        self.inner.dependencies.lock().record(entry.key(), entry.tags());
        self.inner.forget_dependencies(&evicted);
        true
    }

    fn expired_locally(&self, key: &str) {
        self.inner.dependencies.lock().forget(key);
        self.record(CacheOperation::Get, CacheActivity::Expired, None);
    }

    async fn write_remote(&self, entry: &CacheEntry<V>, failure: CacheActivity) -> (usize, usize) {
        write_tiers(
            &self.inner.replicas,
            self.inner.durable.as_deref(),
            entry,
            &self.inner.telemetry,
            self.namespace(),
            failure,
        )
        .await
    }

    fn spawn_remote_write(&self, entry: CacheEntry<V>) {
        let replicas = self.inner.replicas.clone();
        let durable = self.inner.durable.clone();
        let telemetry = self.inner.telemetry.clone();
        let namespace = self.namespace().to_owned();

        let task = tokio::spawn(async move {
            write_tiers(
                &replicas,
                durable.as_deref(),
                &entry,
                &telemetry,
                &namespace,
                CacheActivity::TierUnavailable,
            )
            .await;
        });

        let mut pending = self.inner.pending.lock();
        pending.retain(|task| !task.is_finished());
        pending.push(task);
    }

    async fn invalidate_remote(&self, keys: &HashSet<String>) -> (usize, usize) {
        if keys.is_empty() || !self.has_remote_tiers() {
            return (0, 0);
        }

        let replica_calls = keys
            .iter()
            .flat_map(|key| self.inner.replicas.iter().map(move |replica| replica.invalidate(key)));
        let durable_calls = self
            .inner
            .durable
            .iter()
            .flat_map(|durable| keys.iter().map(move |key| durable.invalidate(key)));

        let (replica_results, durable_results) = join(join_all(replica_calls), join_all(durable_calls)).await;

        let activity = if self.inner.config.consistency_level() == ConsistencyLevel::Strong {
            CacheActivity::Error
        } else {
            CacheActivity::TierUnavailable
        };

        let total = replica_results.len() + durable_results.len();
        let failed = self.count_failures(
            CacheOperation::Invalidate,
            activity,
            replica_results.iter().chain(durable_results.iter()),
        );
        (failed, total)
    }

    /// The L1 dependency graph plus the tags of entries only the remote tiers still hold.
    async fn dependency_view(&self) -> DependencyGraph {
        let mut graph = self.inner.dependencies.lock().clone();
        if !self.has_remote_tiers() {
            return graph;
        }

        for key in self.known_keys().await {
            if self.inner.l1.peek(&key).is_some() {
                continue;
            }
            if let Some(entry) = self.peek_remote(&key).await
                && !entry.tags().is_empty()
            {
                graph.record(&key, entry.tags());
            }
        }

        graph
    }

    /// Keys held by L1 or listed by any tier.
    async fn known_keys(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = self.inner.l1.keys().into_iter().collect();

        let durable = async {
            match self.inner.durable.as_deref() {
                Some(durable) => Some(durable.keys().await),
                None => None,
            }
        };
        let (replica_keys, durable_keys) = join(join_all(self.inner.replicas.iter().map(|replica| replica.keys())), durable).await;

        for result in replica_keys.into_iter().chain(durable_keys) {
            match result {
                Ok(listed) => keys.extend(listed),
                Err(error) => {
                    self.inner
                        .telemetry
                        .record_error(self.namespace(), CacheOperation::Get, CacheActivity::TierUnavailable, &error);
                }
            }
        }

        keys
    }

    async fn contains_anywhere(&self, key: &str) -> bool {
        if self.inner.l1.peek(key).is_some() {
            return true;
        }

        for replica in &self.inner.replicas {
            if self.fetch(replica.as_ref(), key).await.is_some() {
                return true;
            }
        }

        match self.inner.durable.as_deref() {
            Some(durable) => self.fetch(durable, key).await.is_some(),
            None => false,
        }
    }

    fn count_failures<'a, T: 'a>(
        &self,
        operation: CacheOperation,
        activity: CacheActivity,
        results: impl IntoIterator<Item = &'a Result<T>>,
    ) -> usize {
        let mut failed = 0;
        for error in results.into_iter().filter_map(|result| result.as_ref().err()) {
            failed += 1;
            self.inner.telemetry.record_error(self.namespace(), operation, activity, error);
        }
        failed
    }
}

/// The entry with the latest `stored_at` among the replica reads and the local copy.
fn newest_of<'a, V>(reads: &'a [Option<CacheEntry<V>>], local: Option<&'a CacheEntry<V>>) -> Option<&'a CacheEntry<V>> {
    reads.iter().flatten().chain(local).max_by_key(|entry| entry.stored_at())
}

/// Writes `entry` to every replica and the durable tier concurrently.
///
/// Returns the number of failed writes and the number attempted.
async fn write_tiers<V, R, D>(
    replicas: &[Arc<R>],
    durable: Option<&D>,
    entry: &CacheEntry<V>,
    telemetry: &CacheTelemetry,
    namespace: &str,
    failure: CacheActivity,
) -> (usize, usize)
where
    V: Clone,
    R: CacheTier<V>,
    D: CacheTier<V>,
{
    let durable_write = async {
        match durable {
            Some(durable) => Some(durable.insert(entry.clone()).await),
            None => None,
        }
    };
    let (replica_results, durable_result) = join(join_all(replicas.iter().map(|replica| replica.insert(entry.clone()))), durable_write).await;

    let total = replica_results.len() + usize::from(durable_result.is_some());
    let mut failed = 0;
    for error in replica_results.iter().chain(durable_result.iter()).filter_map(|result| result.as_ref().err()) {
        failed += 1;
        telemetry.record_error(namespace, CacheOperation::Insert, failure, error);
    }

    (failed, total)
}

impl<V, R, D> Clone for CacheCoordinator<V, R, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, R, D> fmt::Debug for CacheCoordinator<V, R, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("namespace", &self.inner.config.namespace())
            .field("consistency_level", &self.inner.config.consistency_level())
            .field("invalidation_strategy", &self.inner.config.invalidation_strategy())
            .field("replicas", &self.inner.replicas.len())
            .field("durable", &self.inner.durable.is_some())
            .field("l1", &self.inner.l1)
            .finish()
    }
}

impl<V, R, D> fmt::Debug for CacheCoordinatorBuilder<V, R, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCoordinatorBuilder")
            .field("config", &self.config)
            .field("replicas", &self.replicas.len())
            .field("durable", &self.durable.is_some())
            .finish_non_exhaustive()
    }
}

impl<V, R, D> CacheStore<V> for CacheCoordinator<V, R, D>
where
    V: Clone + Send + Sync + 'static,
    R: CacheTier<V> + 'static,
    D: CacheTier<V> + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        Self::get(self, key).await
    }

    async fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        Self::get_entry(self, key).await
    }

    async fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        Self::peek(self, key).await
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        Self::set(self, key, value, ttl).await
    }

    async fn invalidate(&self, pattern: &str) -> Result<usize> {
        Self::invalidate(self, pattern).await
    }

    fn stats(&self) -> CacheStats {
        Self::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(CacheCoordinator<String>: Send, Sync, Clone);
        assert_impl_all!(CacheCoordinator<String, MemoryStore<String>, MemoryStore<String>>: Send, Sync, Clone);
    }

    #[tokio::test(start_paused = true)]
    async fn noop_tiers_are_dropped_at_build() {
        let config = CacheConfig::builder("ns").build().unwrap();
        let cache = CacheCoordinator::<i32>::builder(config)
            .replicas([Arc::new(NoopTier), Arc::new(NoopTier)])
            .durable(Arc::new(NoopTier))
            .build();

        assert!(!cache.has_remote_tiers());

        cache.set("k", 1, Duration::from_secs(1)).await.unwrap();
        assert_eq!(cache.get("k").await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn replicas_are_limited_by_replication_factor() {
        let config = CacheConfig::builder("ns").replication_factor(1).build().unwrap();
        let first = Arc::new(MemoryStore::<i32>::new(config.clone()));
        let second = Arc::new(MemoryStore::<i32>::new(config.clone()));
        let cache = CacheCoordinator::builder(config)
            .replicas([Arc::clone(&first), Arc::clone(&second)])
            .build();

        cache.set("k", 1, Duration::from_secs(60)).await.unwrap();
        cache.flush().await;

        assert_eq!(first.peek("k").map(CacheEntry::into_value), Some(1));
        assert!(second.peek("k").is_none());
    }

    fn dependency_cache(max_size: usize) -> CacheCoordinator<i32> {
        let config = CacheConfig::builder("ns")
            .max_size(max_size)
            .invalidation_strategy(InvalidationStrategy::DependencyBased)
            .build()
            .unwrap();
        CacheCoordinator::builder(config).build()
    }

    #[tokio::test(start_paused = true)]
    async fn evicted_keys_drop_their_dependency_edges() {
        let cache = dependency_cache(10);

        cache.set_with_tags("k0", 0, Duration::from_secs(60), vec!["t".into()]).await.unwrap();
        for i in 1..500 {
            cache
                .set_with_tags(&format!("k{i}"), i, Duration::from_secs(60), vec![format!("t{i}")])
                .await
                .unwrap();
        }

        assert_eq!(cache.local().len(), 10);
        assert_eq!(cache.inner.dependencies.lock().len(), 10);
        assert_eq!(cache.invalidate("t").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_keys_drop_their_dependency_edges() {
        let cache = dependency_cache(10);
        cache.set_with_tags("read", 1, Duration::from_secs(1), vec!["t".into()]).await.unwrap();
        cache.set_with_tags("swept", 2, Duration::from_secs(1), vec!["t".into()]).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("read").await, None);
        assert_eq!(cache.inner.dependencies.lock().len(), 1);

        let sweeper = cache.spawn_sweeper(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(cache.local().is_empty());
        assert_eq!(cache.inner.dependencies.lock().len(), 0);
        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn get_entry_leaves_expired_copies_for_fallback() {
        let cache = dependency_cache(10);
        cache.set("k", 1, Duration::from_secs(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(cache.get_entry("k").await.is_none());
        assert_eq!(cache.peek("k").await.map(CacheEntry::into_value), Some(1));
        assert_eq!(cache.metrics().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn newest_of_prefers_latest_stored_at() {
        let older = CacheEntry::new("k", 1, Duration::from_secs(60));
        tokio::time::advance(Duration::from_millis(1)).await;
        let newer = CacheEntry::new("k", 2, Duration::from_secs(60));

        let reads = [Some(older.clone()), None];
        assert_eq!(newest_of(&reads, Some(&newer)).map(|e| *e.value()), Some(2));

        let reads = [None, Some(newer)];
        assert_eq!(newest_of(&reads, Some(&older)).map(|e| *e.value()), Some(2));

        assert!(newest_of::<i32>(&[None], None).is_none());
    }
}
