// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The L1 in-memory store.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::metrics::MetricsCollector;
use crate::pattern::KeyPattern;
use crate::periodic::spawn_periodic;
use crate::store::{CacheStats, EntrySummary};
use crate::telemetry::{CacheActivity, CacheOperation, CacheTelemetry};
use crate::{CacheConfig, CacheEntry, CacheMetrics, CacheStore, CacheTier, Result};

/// A bounded in-memory cache for one namespace.
///
/// Entries expire lazily on read and through [`spawn_sweeper`](Self::spawn_sweeper). When a
/// write pushes the store past its capacity, the oldest insertions are evicted first; reads
/// do not affect eviction order, and overwriting a key moves it to the back.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use steadfast_cache::{CacheConfig, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), steadfast_cache::ConfigError> {
/// let store = MemoryStore::new(CacheConfig::builder("quotes").max_size(2).build()?);
///
/// store.set("a", 1, Duration::from_secs(60));
/// store.set("b", 2, Duration::from_secs(60));
/// store.set("c", 3, Duration::from_secs(60));
///
/// assert_eq!(store.get("a"), None);
/// assert_eq!(store.get("c"), Some(3));
/// # Ok(())
/// # }
/// ```
pub struct MemoryStore<V> {
    config: CacheConfig,
    max_size: AtomicUsize,
    storage: Mutex<Storage<V>>,
    metrics: Arc<MetricsCollector>,
    telemetry: CacheTelemetry,
}

pub(crate) enum Lookup<V> {
    Fresh(CacheEntry<V>),
    Expired,
    Missing,
}

struct Slot<V> {
    seq: u64,
    entry: CacheEntry<V>,
}

struct Storage<V> {
    entries: HashMap<String, Slot<V>>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
    bytes: usize,
}

impl<V> Storage<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
            bytes: 0,
        }
    }

    fn insert(&mut self, entry: CacheEntry<V>) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let key = entry.key().to_owned();
        self.bytes += footprint(&entry);

        if let Some(old) = self.entries.insert(key.clone(), Slot { seq, entry }) {
            self.order.remove(&old.seq);
            self.bytes = self.bytes.saturating_sub(footprint(&old.entry));
        }
        self.order.insert(seq, key);
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.seq);
        self.bytes = self.bytes.saturating_sub(footprint(&slot.entry));
        Some(slot.entry)
    }

    /// Pops the oldest insertions until at most `max_size` remain and returns their keys.
    fn evict_to(&mut self, max_size: usize) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.entries.len() > max_size {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            if let Some(slot) = self.entries.remove(&key) {
                self.bytes = self.bytes.saturating_sub(footprint(&slot.entry));
                evicted.push(key);
            }
        }
        evicted
    }

    fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.order.clear();
        self.bytes = 0;
        removed
    }

    fn in_order(&self) -> impl Iterator<Item = &CacheEntry<V>> {
        self.order.values().filter_map(|key| self.entries.get(key)).map(|slot| &slot.entry)
    }
}

/// Approximate bytes held for an entry: the slot, its key (stored twice) and its tags.
fn footprint<V>(entry: &CacheEntry<V>) -> usize {
    size_of::<Slot<V>>() + entry.key().len() * 2 + entry.tags().iter().map(String::len).sum::<usize>()
}

impl<V> MemoryStore<V> {
    /// Creates an empty store with default telemetry.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_telemetry(config, CacheTelemetry::default())
    }

    /// Creates an empty store reporting through `telemetry`.
    #[must_use]
    pub fn with_telemetry(config: CacheConfig, telemetry: CacheTelemetry) -> Self {
        Self::with_parts(config, Arc::new(MetricsCollector::new()), telemetry)
    }

    pub(crate) fn with_parts(config: CacheConfig, metrics: Arc<MetricsCollector>, telemetry: CacheTelemetry) -> Self {
        Self {
            max_size: AtomicUsize::new(config.max_size()),
            config,
            storage: Mutex::new(Storage::new()),
            metrics,
            telemetry,
        }
    }

    /// The configuration this store was created with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The current capacity. Starts at the configured `max_size`.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size.load(Ordering::Relaxed)
    }

    /// Changes the capacity, evicting the oldest insertions if the store is now over it.
    ///
    /// A capacity of zero is treated as one.
    pub fn set_max_size(&self, max_size: usize) {
        self.resize(max_size);
    }

    /// As [`set_max_size`](Self::set_max_size), returning the evicted keys.
    pub(crate) fn resize(&self, max_size: usize) -> Vec<String> {
        let max_size = max_size.max(1);
        self.max_size.store(max_size, Ordering::Relaxed);

        let evicted = {
            let mut storage = self.storage.lock();
            let evicted = storage.evict_to(max_size);
            self.metrics.set_memory_usage(storage.bytes);
            evicted
        };
        self.record_evictions(evicted.len());
        evicted
    }

    /// Number of entries held, including expired ones not yet removed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.lock().entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently held, oldest insertion first.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.storage.lock().order.values().cloned().collect()
    }

    /// Inserts or overwrites `key`, then evicts down to capacity.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.insert(CacheEntry::new(key, value, ttl));
    }

    /// Stores `entry` as given, keeping its timestamp and tags.
    pub fn insert(&self, entry: CacheEntry<V>) {
        self.insert_evicting(entry);
    }

    /// As [`insert`](Self::insert), returning the keys evicted to make room.
    pub(crate) fn insert_evicting(&self, entry: CacheEntry<V>) -> Vec<String> {
        let started = Instant::now();
        let max_size = self.max_size();

        let (evicted, len) = {
            let mut storage = self.storage.lock();
            storage.insert(entry);
            let evicted = storage.evict_to(max_size);
            self.metrics.set_memory_usage(storage.bytes);
            (evicted, storage.entries.len())
        };

        self.metrics.record_write();
        self.telemetry.record(
            self.config.namespace(),
            CacheOperation::Insert,
            CacheActivity::Inserted,
            Some(started.elapsed()),
        );
        self.record_evictions(evicted.len());
        self.telemetry.record_size(self.config.namespace(), len);
        evicted
    }

    /// Stores `entry` unless the store already holds a newer one for the same key.
    ///
    /// Returns `None` when the entry was rejected, otherwise the keys evicted to make room.
    pub(crate) fn insert_if_newer(&self, entry: CacheEntry<V>) -> Option<Vec<String>> {
        {
            let storage = self.storage.lock();
            if let Some(existing) = storage.entries.get(entry.key())
                && existing.entry.is_newer_than(&entry)
            {
                return None;
            }
        }

        Some(self.insert_evicting(entry))
    }

    /// Removes and returns the entry stored under `key`.
    pub fn remove(&self, key: &str) -> Option<CacheEntry<V>> {
        let mut storage = self.storage.lock();
        let removed = storage.remove(key);
        self.metrics.set_memory_usage(storage.bytes);
        removed
    }

    pub(crate) fn remove_matching(&self, pattern: &KeyPattern) -> Vec<String> {
        let mut storage = self.storage.lock();

        let matched: Vec<String> = match pattern.as_exact() {
            Some(key) => storage.entries.contains_key(key).then(|| key.to_owned()).into_iter().collect(),
            None => storage.order.values().filter(|key| pattern.matches(key)).cloned().collect(),
        };

        for key in &matched {
            storage.remove(key);
        }
        self.metrics.set_memory_usage(storage.bytes);

        matched
    }

    /// Removes every entry whose key matches `pattern` and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern cannot be compiled.
    pub fn invalidate(&self, pattern: &str) -> Result<usize> {
        let removed = self.remove_matching(&KeyPattern::parse(pattern)?).len();

        self.telemetry
            .record(self.config.namespace(), CacheOperation::Invalidate, CacheActivity::Invalidated, None);
        Ok(removed)
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.remove_expired().len()
    }

    /// Removes every expired entry and returns their keys.
    pub(crate) fn remove_expired(&self) -> Vec<String> {
        let now = Instant::now();

        let (removed, len) = {
            let mut storage = self.storage.lock();
            let expired: Vec<String> = storage
                .entries
                .iter()
                .filter(|(_, slot)| slot.entry.is_expired_at(now))
                .map(|(key, _)| key.clone())
                .collect();

            for key in &expired {
                storage.remove(key);
            }
            self.metrics.set_memory_usage(storage.bytes);
            (expired, storage.entries.len())
        };

        if !removed.is_empty() {
            self.telemetry
                .record(self.config.namespace(), CacheOperation::Sweep, CacheActivity::Expired, None);
            self.telemetry.record_size(self.config.namespace(), len);
        }
        removed
    }

    /// Removes every entry and returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = {
            let mut storage = self.storage.lock();
            let removed = storage.clear();
            self.metrics.set_memory_usage(0);
            removed
        };

        self.telemetry
            .record(self.config.namespace(), CacheOperation::Clear, CacheActivity::Ok, None);
        self.telemetry.record_size(self.config.namespace(), 0);
        removed
    }

    /// Describes the current contents, oldest insertion first.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let storage = self.storage.lock();
        CacheStats {
            size: storage.entries.len(),
            entries: storage.in_order().map(EntrySummary::of).collect(),
        }
    }

    /// A snapshot of this store's counters.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.snapshot()
    }

    pub(crate) fn collector(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    fn record_evictions(&self, evicted: usize) {
        if evicted == 0 {
            return;
        }
        self.metrics.record_evictions(evicted);
        self.telemetry
            .record(self.config.namespace(), CacheOperation::Insert, CacheActivity::Evicted, None);
    }
}

impl<V: Clone> MemoryStore<V> {
    /// Returns the value stored under `key` if it has not expired.
    ///
    /// An expired entry is deleted by this call.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        let started = Instant::now();

        let (activity, value) = match self.lookup(key, started) {
            Lookup::Fresh(entry) => (CacheActivity::Hit, Some(entry.into_value())),
            Lookup::Expired => (CacheActivity::Expired, None),
            Lookup::Missing => (CacheActivity::Miss, None),
        };

        self.record_read(started, value.is_some(), activity);
        value
    }

    /// Returns the entry stored under `key` if it has not expired, counting the read as a hit
    /// or miss.
    ///
    /// Unlike [`get`](Self::get), an expired entry is left in place so it can still serve as a
    /// stale fallback.
    #[must_use]
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let started = Instant::now();

        let (activity, entry) = match self.peek(key) {
            Some(entry) if !entry.is_expired_at(started) => (CacheActivity::Hit, Some(entry)),
            Some(_) => (CacheActivity::Expired, None),
            None => (CacheActivity::Miss, None),
        };

        self.record_read(started, entry.is_some(), activity);
        entry
    }

    fn record_read(&self, started: Instant, hit: bool, activity: CacheActivity) {
        let elapsed = started.elapsed();
        if hit {
            self.metrics.record_hit(elapsed);
        } else {
            self.metrics.record_miss(elapsed);
        }
        self.telemetry
            .record(self.config.namespace(), CacheOperation::Get, activity, Some(elapsed));
    }

    /// Returns the entry stored under `key`, expired or not, without removing it.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        self.storage.lock().entries.get(key).map(|slot| slot.entry.clone())
    }

    /// Classifies `key` as of `now`, deleting it if it has expired. Records no metrics.
    pub(crate) fn lookup(&self, key: &str, now: Instant) -> Lookup<V> {
        let mut storage = self.storage.lock();

        let Some(slot) = storage.entries.get(key) else {
            return Lookup::Missing;
        };
        if !slot.entry.is_expired_at(now) {
            return Lookup::Fresh(slot.entry.clone());
        }

        storage.remove(key);
        self.metrics.set_memory_usage(storage.bytes);
        Lookup::Expired
    }
}

impl<V: Send + 'static> MemoryStore<V> {
    /// Starts a background task removing expired entries every `every`.
    ///
    /// The task stops once the last `Arc` to the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        spawn_periodic(Arc::downgrade(self), every, |store| async move {
            store.sweep_expired();
        })
    }
}

impl<V> fmt::Debug for MemoryStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("namespace", &self.config.namespace())
            .field("len", &self.len())
            .field("max_size", &self.max_size())
            .finish_non_exhaustive()
    }
}

impl<V> CacheStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &str) -> Option<V> {
        Self::get(self, key)
    }

    async fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        Self::get_entry(self, key)
    }

    async fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
        Self::peek(self, key)
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        Self::set(self, key, value, ttl);
        Ok(())
    }

    async fn invalidate(&self, pattern: &str) -> Result<usize> {
        Self::invalidate(self, pattern)
    }

    fn stats(&self) -> CacheStats {
        Self::stats(self)
    }
}

/// A memory store used as a replica or durable tier.
///
/// Inserts are last-writer-wins: an entry older than the one already held is ignored.
impl<V> CacheTier<V> for MemoryStore<V>
where
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        Ok(self.peek(key))
    }

    async fn insert(&self, entry: CacheEntry<V>) -> Result<()> {
        self.insert_if_newer(entry);
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        self.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Self::clear(self);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(Self::keys(self))
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    fn store(max_size: usize) -> MemoryStore<i32> {
        MemoryStore::new(CacheConfig::builder("test").max_size(max_size).build().unwrap())
    }

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(MemoryStore<String>: Send, Sync);
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_moves_key_to_back() {
        let store = store(2);
        store.set("a", 1, Duration::from_secs(60));
        store.set("b", 2, Duration::from_secs(60));
        store.set("a", 10, Duration::from_secs(60));
        store.set("c", 3, Duration::from_secs(60));

        assert_eq!(store.keys(), ["a", "c"]);
        assert_eq!(store.get("a"), Some(10));
        assert_eq!(store.metrics().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reads_do_not_affect_eviction_order() {
        let store = store(2);
        store.set("a", 1, Duration::from_secs(60));
        store.set("b", 2, Duration::from_secs(60));
        assert_eq!(store.get("a"), Some(1));
        store.set("c", 3, Duration::from_secs(60));

        assert!(store.peek("a").is_none());
        assert_eq!(store.keys(), ["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_removes_expired_entries() {
        let store = store(10);
        store.set("k", 1, Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(matches!(store.lookup("k", Instant::now()), Lookup::Expired));
        assert!(matches!(store.lookup("k", Instant::now()), Lookup::Missing));
    }

    #[tokio::test(start_paused = true)]
    async fn insert_if_newer_keeps_latest_writer() {
        let store = store(10);
        let older = CacheEntry::new("k", 1, Duration::from_secs(60));
        tokio::time::advance(Duration::from_millis(10)).await;
        let newer = CacheEntry::new("k", 2, Duration::from_secs(60));

        assert!(store.insert_if_newer(newer).is_some());
        assert!(store.insert_if_newer(older).is_none());
        assert_eq!(store.get("k"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn get_entry_counts_reads_and_keeps_expired_entries() {
        let store = store(10);
        store.set("fresh", 1, Duration::from_secs(60));
        store.set("stale", 2, Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.get_entry("fresh").map(CacheEntry::into_value), Some(1));
        assert!(store.get_entry("stale").is_none());
        assert!(store.get_entry("missing").is_none());

        assert_eq!(store.peek("stale").map(CacheEntry::into_value), Some(2));
        let metrics = store.metrics();
        assert_eq!((metrics.hits, metrics.misses), (1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn removals_report_their_keys() {
        let store = store(2);
        store.set("a", 1, Duration::from_secs(1));
        store.set("b", 2, Duration::from_secs(60));

        assert_eq!(store.insert_evicting(CacheEntry::new("c", 3, Duration::from_secs(60))), ["a"]);

        tokio::time::advance(Duration::from_secs(120)).await;
        store.set("d", 4, Duration::from_secs(60));

        assert_eq!(store.remove_expired(), ["c"]);
        assert_eq!(store.resize(1), Vec::<String>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn set_max_size_evicts_immediately() {
        let store = store(5);
        for (i, key) in ["a", "b", "c", "d"].into_iter().enumerate() {
            store.set(key, i32::try_from(i).unwrap(), Duration::from_secs(60));
        }

        store.set_max_size(2);

        assert_eq!(store.max_size(), 2);
        assert_eq!(store.keys(), ["c", "d"]);

        store.set_max_size(0);
        assert_eq!(store.max_size(), 1);
        assert_eq!(store.keys(), ["d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn memory_usage_tracks_contents() {
        let store = store(10);
        assert_eq!(store.metrics().memory_usage, 0);

        store.set("key", 1, Duration::from_secs(60));
        let used = store.metrics().memory_usage;
        assert!(used > 0);

        store.set("key", 2, Duration::from_secs(60));
        assert_eq!(store.metrics().memory_usage, used);

        store.remove("key");
        assert_eq!(store.metrics().memory_usage, 0);
    }
}
