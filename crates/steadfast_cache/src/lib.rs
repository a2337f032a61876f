// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Bounded caching with pluggable replica and durable tiers.
//!
//! This crate provides:
//! - [`MemoryStore`], a bounded L1 store with per-entry TTL and insertion-order eviction
//! - [`CacheTier`], the trait replica (L2) and durable (L3) tiers implement
//! - [`CacheCoordinator`], which layers L1 over those tiers with a configurable
//!   [`ConsistencyLevel`] and [`InvalidationStrategy`]
//! - [`MetricsCollector`], always-on counters with capacity and TTL tuning advice
//! - structured `tracing` events and, with the `metrics` feature, OpenTelemetry instruments
//!
//! Both stores implement [`CacheStore`], the contract the resilient executor in the
//! `steadfast` crate is written against.
//!
//! # Examples
//!
//! ## L1 only
//!
//! ```
//! use std::time::Duration;
//!
//! use steadfast_cache::{CacheConfig, MemoryStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), steadfast_cache::Error> {
//! let store = MemoryStore::new(CacheConfig::builder("positions").build()?);
//!
//! store.set("desk:7", vec![1, 2, 3], Duration::from_secs(30));
//! assert_eq!(store.get("desk:7"), Some(vec![1, 2, 3]));
//!
//! store.invalidate("desk:*")?;
//! assert!(store.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! ## Dependency-based invalidation
//!
//! ```
//! use std::time::Duration;
//!
//! use steadfast_cache::{CacheConfig, CacheCoordinator, InvalidationStrategy};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), steadfast_cache::Error> {
//! let config = CacheConfig::builder("reports")
//!     .invalidation_strategy(InvalidationStrategy::DependencyBased)
//!     .build()?;
//! let cache = CacheCoordinator::builder(config).build();
//!
//! cache.set("portfolio:7", "positions".to_string(), Duration::from_secs(60)).await?;
//! cache
//!     .set_with_tags("report:7", "summary".to_string(), Duration::from_secs(60), vec!["portfolio:7".into()])
//!     .await?;
//!
//! assert_eq!(cache.invalidate("portfolio:7").await?, 2);
//! assert_eq!(cache.get("report:7").await, None);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `metrics`: OpenTelemetry instruments for cache events, durations and size.
//! - `serde`: `Serialize`/`Deserialize` for [`CacheConfig`].
//! - `test-util`: the `testing` module for asserting on emitted logs and metrics.

mod config;
mod coordinator;
mod dependency;
mod entry;
mod error;
mod memory;
mod metrics;
mod pattern;
mod periodic;
mod store;
mod telemetry;
#[cfg(any(feature = "test-util", test))]
pub mod testing;
mod tier;

#[doc(inline)]
pub use config::{CacheConfig, CacheConfigBuilder, ConsistencyLevel, InvalidationStrategy};
#[doc(inline)]
pub use coordinator::{CacheCoordinator, CacheCoordinatorBuilder, ReconcileReport};
#[doc(inline)]
pub use entry::CacheEntry;
#[doc(inline)]
pub use error::{ConfigError, Error, Result};
#[doc(inline)]
pub use memory::MemoryStore;
#[doc(inline)]
pub use metrics::{CacheMetrics, MetricsCollector, TuningAdvice};
#[doc(inline)]
pub use store::{CacheStats, CacheStore, EntrySummary};
#[doc(inline)]
pub use telemetry::{CacheTelemetry, TelemetryConfig};
#[doc(inline)]
pub use tier::{CacheTier, NoopTier};
