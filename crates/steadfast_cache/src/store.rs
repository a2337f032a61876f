// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The store contract shared by the L1 memory store and the multi-tier coordinator.

use std::time::Duration;

use crate::{CacheEntry, Result};

/// A keyed cache with per-entry TTL and a capacity bound.
///
/// Implemented by [`MemoryStore`](crate::MemoryStore) and
/// [`CacheCoordinator`](crate::CacheCoordinator); the resilient executor is generic over it.
pub trait CacheStore<V>: Send + Sync {
    /// Returns the value stored under `key` if it exists and has not expired.
    ///
    /// An expired entry found by this call is deleted.
    fn get(&self, key: &str) -> impl Future<Output = Option<V>> + Send;

    /// Returns the entry for `key` if it has not expired, reading with the same consistency
    /// guarantees as [`get`](Self::get) and counting the read in the store's metrics.
    ///
    /// Unlike `get`, an expired entry is not deleted, so it remains available to
    /// [`peek`](Self::peek).
    fn get_entry(&self, key: &str) -> impl Future<Output = Option<CacheEntry<V>>> + Send;

    /// Returns the entry stored under `key` even if it has expired, without deleting it.
    fn peek(&self, key: &str) -> impl Future<Output = Option<CacheEntry<V>>> + Send;

    /// Inserts or overwrites `key`, then evicts the oldest insertions until the store is
    /// within capacity.
    fn set(&self, key: &str, value: V, ttl: Duration) -> impl Future<Output = Result<()>> + Send;

    /// Removes every entry matching `pattern`, regardless of TTL, and returns how many were
    /// found. A `*` in the pattern matches any run of characters.
    fn invalidate(&self, pattern: &str) -> impl Future<Output = Result<usize>> + Send;

    /// Describes the current contents.
    fn stats(&self) -> CacheStats;
}

/// The size and contents of a store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[non_exhaustive]
pub struct CacheStats {
    /// Number of entries held, including expired ones not yet removed.
    pub size: usize,
    /// One summary per entry, oldest insertion first.
    pub entries: Vec<EntrySummary>,
}

/// Metadata about a single stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct EntrySummary {
    /// The entry's key.
    pub key: String,
    /// Time since the entry was written.
    pub age: Duration,
    /// The entry's time-to-live.
    pub ttl: Duration,
    /// Whether the entry has outlived its TTL.
    pub expired: bool,
}

impl EntrySummary {
    pub(crate) fn of<V>(entry: &CacheEntry<V>) -> Self {
        let age = entry.age();
        Self {
            key: entry.key().to_owned(),
            age,
            ttl: entry.ttl(),
            expired: age > entry.ttl(),
        }
    }
}
