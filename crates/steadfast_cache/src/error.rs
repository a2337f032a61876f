// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// An error from a cache operation.
///
/// Read paths never surface these: a failing tier is logged and treated as a miss. Errors are
/// returned from writes that must reach every tier (strong consistency) and from
/// configuration validation.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A replica or durable tier reported a failure.
    #[error("cache tier failure: {0}")]
    Tier(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A strongly consistent write did not reach every configured tier.
    #[error("replicated write failed on {failed} of {total} tiers")]
    Replication {
        /// Number of tiers whose write failed.
        failed: usize,
        /// Number of tiers the write was sent to.
        total: usize,
    },

    /// An invalidation pattern could not be compiled.
    #[error("invalid key pattern '{pattern}'")]
    InvalidPattern {
        /// The pattern as supplied by the caller.
        pattern: String,
        /// The underlying compilation failure.
        #[source]
        source: regex::Error,
    },

    /// The cache configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Wraps a failure reported by a tier implementation.
    ///
    /// # Examples
    ///
    /// ```
    /// use steadfast_cache::Error;
    ///
    /// let error = Error::tier("replica unreachable");
    /// assert!(error.to_string().contains("replica unreachable"));
    /// ```
    pub fn tier(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Tier(cause.into())
    }
}

/// A specialized `Result` for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A cache configuration value violated one of its invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The namespace was empty.
    #[error("cache namespace must not be empty")]
    EmptyNamespace,

    /// `max_size` was zero.
    #[error("max_size must be at least 1")]
    ZeroCapacity,

    /// `replication_factor` was zero.
    #[error("replication_factor must be at least 1")]
    ZeroReplication,

    /// The default time-to-live was zero.
    #[error("ttl must be greater than zero")]
    ZeroTtl,
}
