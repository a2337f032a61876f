// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache telemetry: structured `tracing` events and, with the `metrics` feature,
//! OpenTelemetry instruments.

use std::sync::Arc;

use tracing::Level;

mod cache;
mod config;
#[cfg(any(feature = "metrics", test))]
mod instruments;

use cache::CacheTelemetryInner;
#[doc(inline)]
pub use config::TelemetryConfig;

/// Records cache operations as log events and metrics.
///
/// Build one through [`TelemetryConfig::build`] and share it between stores; cloning is cheap.
#[derive(Clone, Debug)]
pub struct CacheTelemetry {
    inner: Arc<CacheTelemetryInner>,
}

impl Default for CacheTelemetry {
    fn default() -> Self {
        TelemetryConfig::new().build()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum CacheOperation {
    Get,
    Insert,
    Invalidate,
    Clear,
    Sweep,
    Reconcile,
}

impl CacheOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "cache.get",
            Self::Insert => "cache.insert",
            Self::Invalidate => "cache.invalidate",
            Self::Clear => "cache.clear",
            Self::Sweep => "cache.sweep",
            Self::Reconcile => "cache.reconcile",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum CacheActivity {
    Hit,
    Miss,
    Expired,
    Inserted,
    Evicted,
    Invalidated,
    Backfilled,
    Repaired,
    TierUnavailable,
    Ok,
    Error,
}

impl CacheActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::Miss => "cache.miss",
            Self::Expired => "cache.expired",
            Self::Inserted => "cache.inserted",
            Self::Evicted => "cache.evicted",
            Self::Invalidated => "cache.invalidated",
            Self::Backfilled => "cache.backfilled",
            Self::Repaired => "cache.repaired",
            Self::TierUnavailable => "cache.tier_unavailable",
            Self::Ok => "cache.ok",
            Self::Error => "cache.error",
        }
    }

    pub fn level(self) -> Level {
        match self {
            Self::Hit | Self::Miss | Self::Ok => Level::DEBUG,
            Self::Expired | Self::Inserted | Self::Evicted | Self::Invalidated | Self::Backfilled | Self::Repaired => Level::INFO,
            Self::TierUnavailable => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_operation_as_str() {
        assert_eq!(CacheOperation::Get.as_str(), "cache.get");
        assert_eq!(CacheOperation::Insert.as_str(), "cache.insert");
        assert_eq!(CacheOperation::Invalidate.as_str(), "cache.invalidate");
        assert_eq!(CacheOperation::Clear.as_str(), "cache.clear");
        assert_eq!(CacheOperation::Sweep.as_str(), "cache.sweep");
        assert_eq!(CacheOperation::Reconcile.as_str(), "cache.reconcile");
    }

    #[test]
    fn cache_activity_as_str() {
        assert_eq!(CacheActivity::Hit.as_str(), "cache.hit");
        assert_eq!(CacheActivity::Miss.as_str(), "cache.miss");
        assert_eq!(CacheActivity::Expired.as_str(), "cache.expired");
        assert_eq!(CacheActivity::Inserted.as_str(), "cache.inserted");
        assert_eq!(CacheActivity::Evicted.as_str(), "cache.evicted");
        assert_eq!(CacheActivity::Invalidated.as_str(), "cache.invalidated");
        assert_eq!(CacheActivity::Backfilled.as_str(), "cache.backfilled");
        assert_eq!(CacheActivity::Repaired.as_str(), "cache.repaired");
        assert_eq!(CacheActivity::TierUnavailable.as_str(), "cache.tier_unavailable");
        assert_eq!(CacheActivity::Ok.as_str(), "cache.ok");
        assert_eq!(CacheActivity::Error.as_str(), "cache.error");
    }

    #[test]
    fn cache_activity_levels() {
        assert_eq!(CacheActivity::Hit.level(), Level::DEBUG);
        assert_eq!(CacheActivity::Miss.level(), Level::DEBUG);
        assert_eq!(CacheActivity::Ok.level(), Level::DEBUG);
        assert_eq!(CacheActivity::Expired.level(), Level::INFO);
        assert_eq!(CacheActivity::Evicted.level(), Level::INFO);
        assert_eq!(CacheActivity::Repaired.level(), Level::INFO);
        assert_eq!(CacheActivity::TierUnavailable.level(), Level::WARN);
        assert_eq!(CacheActivity::Error.level(), Level::ERROR);
    }
}
