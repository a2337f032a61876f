// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Resilient data access: retry with exponential backoff, request deduplication, offline
//! fallback and tiered caching.
//!
//! [`ResilientExecutor`] wraps a fallible async operation that reads from a remote data
//! source. Each call with a cache key:
//!
//! - is served from the cache while the cached value is fresh;
//! - is coalesced with any identical call already in flight, so the operation runs once;
//! - is retried with capped exponential backoff and jitter when the failure is transient,
//!   as decided by [`is_retryable`];
//! - falls back to the last cached value, even an expired one, when the data source is
//!   offline or keeps failing.
//!
//! The building blocks are usable on their own: [`Backoff`] computes retry delays,
//! [`Deduplicator`] coalesces concurrent work per key, and [`ConnectivityMonitor`] tracks
//! reachability from platform events. Caching lives in the [`steadfast_cache`] crate, which
//! is re-exported here.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use steadfast::steadfast_cache::{CacheConfig, MemoryStore};
//! use steadfast::{ExecuteOptions, QueryError, ResilientExecutor, RetryConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryStore::new(CacheConfig::builder("risk").build()?);
//! let executor: ResilientExecutor<String> = ResilientExecutor::new(store);
//!
//! let retry = RetryConfig::builder()
//!     .max_retries(2)
//!     .initial_delay(Duration::from_millis(10))
//!     .build()?;
//!
//! let outcome = executor
//!     .execute(
//!         || async { Ok::<_, QueryError>("var:0.042".to_string()) },
//!         ExecuteOptions::new().cache_key("var:desk-7").retry(retry),
//!     )
//!     .await;
//!
//! assert_eq!(outcome.data().map(String::as_str), Some("var:0.042"));
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `metrics`: OpenTelemetry counters for executor and cache activity.
//! - `serde`: `Serialize`/`Deserialize` for [`RetryConfig`] and the cache configuration.

mod backoff;
mod classify;
mod connectivity;
mod dedup;
mod error;
mod executor;
mod outcome;
mod telemetry;

#[doc(inline)]
pub use backoff::{Backoff, RetryConfig, RetryConfigBuilder};
#[doc(inline)]
pub use classify::{Classify, is_retryable};
#[doc(inline)]
pub use connectivity::{ConnectionState, ConnectivityEvent, ConnectivityMonitor};
#[doc(inline)]
pub use dedup::Deduplicator;
#[doc(inline)]
pub use error::{ConfigError, QueryError, QueryErrorKind};
#[doc(inline)]
pub use executor::{ExecuteOptions, ResilientExecutor, ResilientExecutorBuilder};
#[doc(inline)]
pub use outcome::Outcome;
pub use steadfast_cache;
