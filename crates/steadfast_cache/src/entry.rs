// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use tokio::time::Instant;

/// A cached value with the metadata needed for expiry, reconciliation and dependency tracking.
///
/// Timestamps come from [`tokio::time::Instant`], so paused-clock tests can move entries
/// past their TTL with `tokio::time::advance`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use steadfast_cache::CacheEntry;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let entry = CacheEntry::new("portfolio:7", 42, Duration::from_secs(60));
/// assert_eq!(*entry.value(), 42);
/// assert!(!entry.is_expired());
/// # }
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry<V> {
    key: String,
    value: V,
    stored_at: Instant,
    ttl: Duration,
    tags: Vec<String>,
}

impl<V> CacheEntry<V> {
    /// Creates an entry stamped with the current time.
    pub fn new(key: impl Into<String>, value: V, ttl: Duration) -> Self {
        Self::with_stored_at(key, value, ttl, Instant::now())
    }

    /// Creates an entry with an explicit timestamp.
    ///
    /// Tier implementations use this when rebuilding entries from their own storage.
    pub fn with_stored_at(key: impl Into<String>, value: V, ttl: Duration, stored_at: Instant) -> Self {
        Self {
            key: key.into(),
            value,
            stored_at,
            ttl,
            tags: Vec::new(),
        }
    }

    /// Attaches the tags this entry depends on.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// The key this entry is stored under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// A reference to the cached value.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry and returns the inner value.
    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }

    /// When the entry was written.
    #[must_use]
    pub fn stored_at(&self) -> Instant {
        self.stored_at
    }

    /// How long the entry stays fresh after `stored_at`.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The tags this entry depends on.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Time elapsed since the entry was written.
    #[must_use]
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.stored_at)
    }

    /// Whether the entry has outlived its TTL.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Whether the entry has outlived its TTL as of `now`.
    ///
    /// An entry whose age equals its TTL is still fresh.
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }

    /// Whether this entry was written after `other`.
    #[must_use]
    pub fn is_newer_than(&self, other: &Self) -> bool {
        self.stored_at > other.stored_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_strictly_after_ttl() {
        let entry = CacheEntry::new("k", 1, Duration::from_secs(10));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!entry.is_expired());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(entry.is_expired());
        assert_eq!(entry.age(), Duration::from_millis(10_001));
    }

    #[tokio::test(start_paused = true)]
    async fn newer_compares_stored_at() {
        let older = CacheEntry::new("k", 1, Duration::from_secs(10));
        tokio::time::advance(Duration::from_millis(5)).await;
        let newer = CacheEntry::new("k", 2, Duration::from_secs(10));

        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
        assert!(!older.is_newer_than(&older));
    }

    #[tokio::test(start_paused = true)]
    async fn tags_and_value_accessors() {
        let entry = CacheEntry::new("report:1", "body".to_string(), Duration::from_secs(1)).with_tags(vec!["portfolio:7".into()]);

        assert_eq!(entry.key(), "report:1");
        assert_eq!(entry.tags(), ["portfolio:7".to_string()]);
        assert_eq!(entry.into_value(), "body");
    }
}
