// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Always-on cache counters and the tuning advice derived from them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::CacheConfig;

/// Lookups needed before advice departs from the configured values.
const MIN_LOOKUPS_FOR_ADVICE: u64 = 100;

/// Eviction rate above which a low hit rate is blamed on capacity.
const EVICTION_PRESSURE: f64 = 0.1;

/// Hit rate below which capacity growth is suggested.
const CAPACITY_HIT_RATE_TARGET: f64 = 0.8;

/// Eviction rate above which entries are churned before they could serve hits.
const EVICTION_CHURN: f64 = 0.5;

/// Tier latency above which refetching is considered expensive.
const SLOW_NETWORK: Duration = Duration::from_millis(500);

/// Hit rate below which a longer TTL is suggested for slow tiers.
const TTL_HIT_RATE_TARGET: f64 = 0.5;

/// Shortest TTL the advice will suggest.
const MIN_ADVISED_TTL: Duration = Duration::from_secs(1);

/// A point-in-time view of the counters kept by [`MetricsCollector`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[non_exhaustive]
pub struct CacheMetrics {
    /// Lookups served from any tier.
    pub hits: u64,
    /// Lookups that found nothing fresh.
    pub misses: u64,
    /// Entries removed to honor the capacity bound.
    pub evictions: u64,
    /// Entries written to L1.
    pub writes: u64,
    /// `hits / (hits + misses)`, or 0 before the first lookup.
    pub hit_rate: f64,
    /// `misses / (hits + misses)`, or 0 before the first lookup.
    pub miss_rate: f64,
    /// `evictions / writes`, or 0 before the first write.
    pub eviction_rate: f64,
    /// Mean time spent serving a lookup.
    pub avg_response_time: Duration,
    /// Approximate bytes held by L1.
    pub memory_usage: u64,
    /// Mean latency of replica and durable tier calls.
    pub network_latency: Duration,
}

/// Capacity and TTL suggestions derived from observed metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct TuningAdvice {
    /// Suggested L1 capacity.
    pub max_size: usize,
    /// Suggested TTL for new writes, derived from [`CacheConfig::ttl`].
    pub ttl: Duration,
}

/// Monotonic cache counters.
///
/// Counters only grow; they reset when the process restarts. All methods are lock-free.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writes: AtomicU64,
    response_nanos: AtomicU64,
    responses: AtomicU64,
    network_nanos: AtomicU64,
    network_calls: AtomicU64,
    memory_bytes: AtomicU64,
}

impl MetricsCollector {
    /// Creates a collector with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self, elapsed: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.record_response(elapsed);
    }

    pub(crate) fn record_miss(&self, elapsed: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.record_response(elapsed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(u64::try_from(count).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    pub(crate) fn record_network_latency(&self, elapsed: Duration) {
        self.network_nanos.fetch_add(saturating_nanos(elapsed), Ordering::Relaxed);
        self.network_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_memory_usage(&self, bytes: usize) {
        self.memory_bytes.store(u64::try_from(bytes).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    fn record_response(&self, elapsed: Duration) {
        self.response_nanos.fetch_add(saturating_nanos(elapsed), Ordering::Relaxed);
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counters and the rates derived from them.
    #[must_use]
    pub fn snapshot(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let evictions = self.evictions.load(Ordering::Relaxed);
        let writes = self.writes.load(Ordering::Relaxed);
        let lookups = hits.saturating_add(misses);

        CacheMetrics {
            hits,
            misses,
            evictions,
            writes,
            hit_rate: ratio(hits, lookups),
            miss_rate: ratio(misses, lookups),
            eviction_rate: ratio(evictions, writes),
            avg_response_time: mean(&self.response_nanos, &self.responses),
            memory_usage: self.memory_bytes.load(Ordering::Relaxed),
            network_latency: mean(&self.network_nanos, &self.network_calls),
        }
    }

    /// Suggests a capacity and TTL for `config` given what has been observed so far.
    ///
    /// Capacity doubles when evictions are frequent and the hit rate is low. The TTL doubles
    /// when tiers are slow and the hit rate is very low; it halves, never below one second,
    /// when entries are evicted faster than they are written back. With fewer than 100
    /// lookups recorded the current values are returned unchanged.
    #[must_use]
    pub fn advise(&self, config: &CacheConfig, current_max_size: usize) -> TuningAdvice {
        let metrics = self.snapshot();
        let mut advice = TuningAdvice {
            max_size: current_max_size,
            ttl: config.ttl(),
        };

        if metrics.hits.saturating_add(metrics.misses) < MIN_LOOKUPS_FOR_ADVICE {
            return advice;
        }

        if metrics.eviction_rate > EVICTION_PRESSURE && metrics.hit_rate < CAPACITY_HIT_RATE_TARGET {
            advice.max_size = current_max_size.saturating_mul(2);
        }

        if metrics.network_latency > SLOW_NETWORK && metrics.hit_rate < TTL_HIT_RATE_TARGET {
            advice.ttl = config.ttl().saturating_mul(2);
        } else if metrics.eviction_rate > EVICTION_CHURN {
            advice.ttl = (config.ttl() / 2).max(MIN_ADVISED_TTL).min(config.ttl());
        }

        advice
    }
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[expect(clippy::cast_precision_loss, reason = "rates tolerate precision loss on huge counters")]
fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 { 0.0 } else { part as f64 / total as f64 }
}

fn mean(total_nanos: &AtomicU64, samples: &AtomicU64) -> Duration {
    let samples = samples.load(Ordering::Relaxed);
    if samples == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(total_nanos.load(Ordering::Relaxed) / samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ttl: Duration) -> CacheConfig {
        CacheConfig::builder("ns").ttl(ttl).build().unwrap()
    }

    #[test]
    fn empty_snapshot_is_zero() {
        assert_eq!(MetricsCollector::new().snapshot(), CacheMetrics::default());
    }

    #[test]
    fn rates_and_means() {
        let collector = MetricsCollector::new();
        collector.record_hit(Duration::from_millis(1));
        collector.record_hit(Duration::from_millis(3));
        collector.record_hit(Duration::from_millis(2));
        collector.record_miss(Duration::from_millis(6));
        collector.record_write();
        collector.record_write();
        collector.record_evictions(1);
        collector.record_network_latency(Duration::from_millis(40));
        collector.record_network_latency(Duration::from_millis(60));
        collector.set_memory_usage(2048);

        let metrics = collector.snapshot();

        assert_eq!(metrics.hits, 3);
        assert_eq!(metrics.misses, 1);
        assert!((metrics.hit_rate - 0.75).abs() < f64::EPSILON);
        assert!((metrics.miss_rate - 0.25).abs() < f64::EPSILON);
        assert!((metrics.eviction_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(metrics.avg_response_time, Duration::from_millis(3));
        assert_eq!(metrics.network_latency, Duration::from_millis(50));
        assert_eq!(metrics.memory_usage, 2048);
    }

    #[test]
    fn advice_needs_enough_lookups() {
        let collector = MetricsCollector::new();
        collector.record_miss(Duration::ZERO);
        collector.record_write();
        collector.record_evictions(1);

        let advice = collector.advise(&config(Duration::from_secs(60)), 10);

        assert_eq!(advice.max_size, 10);
        assert_eq!(advice.ttl, Duration::from_secs(60));
    }

    #[test]
    fn advice_grows_capacity_under_eviction_pressure() {
        let collector = MetricsCollector::new();
        for _ in 0..100 {
            collector.record_miss(Duration::ZERO);
            collector.record_write();
        }
        collector.record_evictions(20);

        let advice = collector.advise(&config(Duration::from_secs(60)), 10);

        assert_eq!(advice.max_size, 20);
        assert_eq!(advice.ttl, Duration::from_secs(60));
    }

    #[test]
    fn advice_extends_ttl_for_slow_tiers() {
        let collector = MetricsCollector::new();
        for _ in 0..100 {
            collector.record_miss(Duration::ZERO);
        }
        collector.record_network_latency(Duration::from_secs(1));

        let advice = collector.advise(&config(Duration::from_secs(60)), 10);

        assert_eq!(advice.max_size, 10);
        assert_eq!(advice.ttl, Duration::from_secs(120));
    }

    #[test]
    fn advice_shortens_ttl_under_churn_but_not_below_one_second() {
        let collector = MetricsCollector::new();
        for _ in 0..100 {
            collector.record_hit(Duration::ZERO);
            collector.record_write();
        }
        collector.record_evictions(80);

        assert_eq!(collector.advise(&config(Duration::from_secs(60)), 10).ttl, Duration::from_secs(30));
        assert_eq!(collector.advise(&config(Duration::from_millis(1500)), 10).ttl, Duration::from_secs(1));
        assert_eq!(collector.advise(&config(Duration::from_millis(500)), 10).ttl, Duration::from_millis(500));
    }
}
