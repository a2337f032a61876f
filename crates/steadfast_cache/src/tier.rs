// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The trait replica (L2) and durable (L3) tiers implement.
//!
//! The coordinator owns L1 itself; any further tier plugs in through [`CacheTier`]. Network and
//! storage protocols live in the implementations, not here.

use crate::{CacheEntry, Result};

/// A cache tier behind L1.
///
/// All four core methods are required: `get`, `insert`, `invalidate`, and `clear`.
/// `keys` and `is_noop` have default implementations:
/// - `keys`: returns no keys, so pattern invalidation only reaches what L1 knows about
/// - `is_noop`: returns `false`
///
/// Implementations return entries as stored, including expired ones; the coordinator
/// decides freshness.
pub trait CacheTier<V>: Send + Sync {
    /// Fetches the entry stored under `key`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<CacheEntry<V>>>> + Send;

    /// Stores an entry under its own key, replacing any previous one.
    fn insert(&self, entry: CacheEntry<V>) -> impl Future<Output = Result<()>> + Send;

    /// Removes the entry stored under `key`, if any.
    fn invalidate(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Removes every entry.
    fn clear(&self) -> impl Future<Output = Result<()>> + Send;

    /// Lists the keys currently held, for pattern invalidation and reconciliation.
    fn keys(&self) -> impl Future<Output = Result<Vec<String>>> + Send {
        async { Ok(Vec::new()) }
    }

    /// Whether this tier discards everything, letting the coordinator skip it entirely.
    fn is_noop(&self) -> bool {
        false
    }
}

/// A tier that stores nothing.
///
/// Used as the default replica and durable tier type, which makes a coordinator without
/// further tiers behave exactly like L1 alone.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct NoopTier;

impl<V: Send> CacheTier<V> for NoopTier {
    async fn get(&self, _key: &str) -> Result<Option<CacheEntry<V>>> {
        Ok(None)
    }

    async fn insert(&self, _entry: CacheEntry<V>) -> Result<()> {
        Ok(())
    }

    async fn invalidate(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn is_noop(&self) -> bool {
        true
    }
}
