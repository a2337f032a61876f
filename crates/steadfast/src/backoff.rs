// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Retry configuration and exponential backoff.

use std::time::Duration;

use crate::ConfigError;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);
const DEFAULT_EXPONENTIAL_BASE: f64 = 2.0;
const DEFAULT_JITTER: bool = true;

/// Upper bound of the random jitter, relative to the computed delay.
const JITTER_FACTOR: f64 = 0.3;

/// How many times and how patiently to retry a failing operation.
///
/// `max_retries` counts retries, so an operation runs at most `max_retries + 1` times.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use steadfast::RetryConfig;
///
/// let config = RetryConfig::builder()
///     .max_retries(5)
///     .initial_delay(Duration::from_millis(200))
///     .jitter(false)
///     .build()?;
///
/// assert_eq!(config.max_retries(), 5);
/// # Ok::<(), steadfast::ConfigError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "RawRetryConfig", into = "RawRetryConfig")
)]
pub struct RetryConfig {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
    jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            exponential_base: DEFAULT_EXPONENTIAL_BASE,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryConfig {
    /// Starts building a configuration from the defaults: 3 retries, 1 s initial delay,
    /// 10 s maximum delay, base 2, jitter on.
    #[must_use]
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder { config: Self::default() }
    }

    /// A configuration that runs the operation once.
    #[must_use]
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Maximum number of retries after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the first retry.
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Cap on the computed delay, before jitter.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Growth factor between consecutive delays.
    #[must_use]
    pub fn exponential_base(&self) -> f64 {
        self.exponential_base
    }

    /// Whether random jitter is added to each delay.
    #[must_use]
    pub fn jitter(&self) -> bool {
        self.jitter
    }
}

/// Builder for [`RetryConfig`].
#[derive(Debug, Clone)]
#[must_use]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    /// Sets the maximum number of retries.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Sets the delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    /// Sets the cap on the computed delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Sets the growth factor between consecutive delays.
    pub fn exponential_base(mut self, base: f64) -> Self {
        self.config.exponential_base = base;
        self
    }

    /// Enables or disables jitter.
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `initial_delay` exceeds `max_delay` or
    /// `exponential_base` is not a finite number of at least 1.
    pub fn build(self) -> Result<RetryConfig, ConfigError> {
        let config = self.config;

        if config.initial_delay > config.max_delay {
            return Err(ConfigError::InitialDelayExceedsMax);
        }
        if !config.exponential_base.is_finite() || config.exponential_base < 1.0 {
            return Err(ConfigError::InvalidExponentialBase);
        }

        Ok(config)
    }
}

/// Computes the delay before each retry.
///
/// The delay for zero-based `attempt` is `min(initial_delay * base^attempt, max_delay)`, plus
/// a uniformly random `[0, 30%)` of itself when jitter is enabled. Arithmetic saturates.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use steadfast::{Backoff, RetryConfig};
///
/// let config = RetryConfig::builder().jitter(false).build()?;
/// let backoff = Backoff::new();
///
/// assert_eq!(backoff.delay(0, &config), Duration::from_millis(1000));
/// assert_eq!(backoff.delay(2, &config), Duration::from_millis(4000));
/// assert_eq!(backoff.delay(9, &config), Duration::from_millis(10_000));
/// # Ok::<(), steadfast::ConfigError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    jitter: JitterSource,
}

/// Where the jitter fraction in `[0, 1)` comes from.
#[derive(Debug, Clone, Copy, Default)]
enum JitterSource {
    /// `fastrand`'s thread-local generator. Not for anything security related.
    #[default]
    Random,
    #[cfg(test)]
    Fixed(f64),
}

impl JitterSource {
    fn fraction(self) -> f64 {
        match self {
            Self::Random => fastrand::f64(),
            #[cfg(test)]
            Self::Fixed(fraction) => fraction,
        }
    }
}

impl Backoff {
    /// Creates a backoff using a thread-local random source for jitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_fixed_jitter(fraction: f64) -> Self {
        Self {
            jitter: JitterSource::Fixed(fraction),
        }
    }

    /// The delay to wait after the zero-based `attempt` failed.
    #[must_use]
    pub fn delay(&self, attempt: u32, config: &RetryConfig) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = config.exponential_base.powi(exponent);
        let delay = secs_to_duration_saturating(config.initial_delay.as_secs_f64() * factor).min(config.max_delay);

        if config.jitter {
            let jitter = delay.as_secs_f64() * JITTER_FACTOR * self.jitter.fraction();
            delay.saturating_add(secs_to_duration_saturating(jitter))
        } else {
            delay
        }
    }

    /// The delays slept between attempts when every attempt fails.
    pub fn delays<'a>(&'a self, config: &'a RetryConfig) -> impl Iterator<Item = Duration> + 'a {
        (0..config.max_retries).map(move |attempt| self.delay(attempt, config))
    }
}

fn secs_to_duration_saturating(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }

    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(default)]
struct RawRetryConfig {
    max_retries: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
    exponential_base: f64,
    jitter: bool,
}

#[cfg(feature = "serde")]
impl Default for RawRetryConfig {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

#[cfg(feature = "serde")]
impl TryFrom<RawRetryConfig> for RetryConfig {
    type Error = ConfigError;

    fn try_from(raw: RawRetryConfig) -> Result<Self, Self::Error> {
        Self::builder()
            .max_retries(raw.max_retries)
            .initial_delay(Duration::from_millis(raw.initial_delay_ms))
            .max_delay(Duration::from_millis(raw.max_delay_ms))
            .exponential_base(raw.exponential_base)
            .jitter(raw.jitter)
            .build()
    }
}

#[cfg(feature = "serde")]
impl From<RetryConfig> for RawRetryConfig {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay_ms: u64::try_from(config.initial_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::try_from(config.max_delay.as_millis()).unwrap_or(u64::MAX),
            exponential_base: config.exponential_base,
            jitter: config.jitter,
        }
    }
}
