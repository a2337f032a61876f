// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-namespace cache configuration.

use std::time::Duration;

use crate::ConfigError;

const DEFAULT_TTL: Duration = Duration::from_secs(300);
const DEFAULT_MAX_SIZE: usize = 1000;
const DEFAULT_REPLICATION_FACTOR: usize = 1;

/// How reads and writes synchronize across replica tiers.
///
/// Only meaningful when the coordinator has replica tiers configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum ConsistencyLevel {
    /// L1 is written synchronously, replicas and the durable tier in the background.
    /// Divergence is resolved by reconciliation, last writer wins.
    #[default]
    Eventual,
    /// Reads consult every replica and serve the newest entry, repairing lagging replicas.
    /// Writes wait for every tier and fail if any of them fails.
    Strong,
    /// Tiers are written inline on a best-effort basis and failures are ignored.
    Weak,
}

/// Which mechanism removes entries before their time-to-live elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum InvalidationStrategy {
    /// Entries expire through their TTL. Explicit invalidation only removes an exact key.
    #[default]
    TimeBased,
    /// Invalidation follows recorded tag edges transitively.
    DependencyBased,
    /// Explicit invalidation by exact key or glob pattern.
    Manual,
}

/// Configuration for one cache namespace.
///
/// Namespaces are independent key spaces; every store and coordinator owns exactly one.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use steadfast_cache::{CacheConfig, ConsistencyLevel};
///
/// let config = CacheConfig::builder("risk-scores")
///     .ttl(Duration::from_secs(60))
///     .max_size(500)
///     .consistency_level(ConsistencyLevel::Strong)
///     .build()?;
///
/// assert_eq!(config.namespace(), "risk-scores");
/// # Ok::<(), steadfast_cache::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "RawCacheConfig", into = "RawCacheConfig")
)]
pub struct CacheConfig {
    namespace: String,
    ttl: Duration,
    max_size: usize,
    replication_factor: usize,
    consistency_level: ConsistencyLevel,
    invalidation_strategy: InvalidationStrategy,
    compression_enabled: bool,
}

impl CacheConfig {
    /// Starts building a configuration for the given namespace.
    #[must_use]
    pub fn builder(namespace: impl Into<String>) -> CacheConfigBuilder {
        CacheConfigBuilder::new(namespace.into())
    }

    /// The namespace this configuration applies to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Baseline entry time-to-live.
    ///
    /// Every write names its own TTL; this value is where [`TuningAdvice::ttl`](crate::TuningAdvice)
    /// starts from and the ceiling for the shorter TTLs it suggests.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Maximum number of entries kept in L1.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of replica tiers a write is sent to.
    #[must_use]
    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// The consistency level used by the coordinator.
    #[must_use]
    pub fn consistency_level(&self) -> ConsistencyLevel {
        self.consistency_level
    }

    /// The invalidation strategy used by the coordinator.
    #[must_use]
    pub fn invalidation_strategy(&self) -> InvalidationStrategy {
        self.invalidation_strategy
    }

    /// Whether replica and durable tiers should compress values.
    ///
    /// L1 keeps typed values and ignores this flag.
    #[must_use]
    pub fn compression_enabled(&self) -> bool {
        self.compression_enabled
    }
}

/// Builder for [`CacheConfig`].
#[derive(Debug, Clone)]
#[must_use]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    fn new(namespace: String) -> Self {
        Self {
            config: CacheConfig {
                namespace,
                ttl: DEFAULT_TTL,
                max_size: DEFAULT_MAX_SIZE,
                replication_factor: DEFAULT_REPLICATION_FACTOR,
                consistency_level: ConsistencyLevel::default(),
                invalidation_strategy: InvalidationStrategy::default(),
                compression_enabled: false,
            },
        }
    }

    /// Sets the baseline entry time-to-live used by tuning advice. Defaults to five minutes.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// Sets the L1 capacity. Defaults to 1000 entries.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = max_size;
        self
    }

    /// Sets how many replica tiers receive each write. Defaults to 1.
    pub fn replication_factor(mut self, replication_factor: usize) -> Self {
        self.config.replication_factor = replication_factor;
        self
    }

    /// Sets the consistency level. Defaults to [`ConsistencyLevel::Eventual`].
    pub fn consistency_level(mut self, level: ConsistencyLevel) -> Self {
        self.config.consistency_level = level;
        self
    }

    /// Sets the invalidation strategy. Defaults to [`InvalidationStrategy::TimeBased`].
    pub fn invalidation_strategy(mut self, strategy: InvalidationStrategy) -> Self {
        self.config.invalidation_strategy = strategy;
        self
    }

    /// Marks values as compressible for replica and durable tiers.
    pub fn compression_enabled(mut self, enabled: bool) -> Self {
        self.config.compression_enabled = enabled;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the namespace is empty, or `max_size`,
    /// `replication_factor` or `ttl` is zero.
    pub fn build(self) -> Result<CacheConfig, ConfigError> {
        let config = self.config;

        if config.namespace.is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        if config.max_size == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if config.replication_factor == 0 {
            return Err(ConfigError::ZeroReplication);
        }
        if config.ttl.is_zero() {
            return Err(ConfigError::ZeroTtl);
        }

        Ok(config)
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct RawCacheConfig {
    namespace: String,
    ttl_ms: u64,
    #[serde(default = "default_max_size")]
    max_size: usize,
    #[serde(default = "default_replication_factor")]
    replication_factor: usize,
    #[serde(default)]
    consistency_level: ConsistencyLevel,
    #[serde(default)]
    invalidation_strategy: InvalidationStrategy,
    #[serde(default)]
    compression_enabled: bool,
}

#[cfg(feature = "serde")]
fn default_max_size() -> usize {
    DEFAULT_MAX_SIZE
}

#[cfg(feature = "serde")]
fn default_replication_factor() -> usize {
    DEFAULT_REPLICATION_FACTOR
}

#[cfg(feature = "serde")]
impl TryFrom<RawCacheConfig> for CacheConfig {
    type Error = ConfigError;

    fn try_from(raw: RawCacheConfig) -> Result<Self, Self::Error> {
        Self::builder(raw.namespace)
            .ttl(Duration::from_millis(raw.ttl_ms))
            .max_size(raw.max_size)
            .replication_factor(raw.replication_factor)
            .consistency_level(raw.consistency_level)
            .invalidation_strategy(raw.invalidation_strategy)
            .compression_enabled(raw.compression_enabled)
            .build()
    }
}

#[cfg(feature = "serde")]
impl From<CacheConfig> for RawCacheConfig {
    fn from(config: CacheConfig) -> Self {
        Self {
            ttl_ms: u64::try_from(config.ttl.as_millis()).unwrap_or(u64::MAX),
            namespace: config.namespace,
            max_size: config.max_size,
            replication_factor: config.replication_factor,
            consistency_level: config.consistency_level,
            invalidation_strategy: config.invalidation_strategy,
            compression_enabled: config.compression_enabled,
        }
    }
}
