// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Telemetry configuration for cache operations.

use std::sync::Arc;

#[cfg(any(feature = "metrics", test))]
use opentelemetry::metrics::{Meter, MeterProvider};

use crate::telemetry::CacheTelemetry;
use crate::telemetry::cache::CacheTelemetryInner;
#[cfg(any(feature = "metrics", test))]
use crate::telemetry::instruments::CacheInstruments;

/// Configuration for cache telemetry.
///
/// Logging is on by default; metrics need a meter provider and the `metrics` feature.
///
/// # Examples
///
/// ```
/// use steadfast_cache::TelemetryConfig;
///
/// let quiet = TelemetryConfig::new().without_logs().build();
/// assert!(!quiet.logging_enabled());
/// ```
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    logs_enabled: bool,
    #[cfg(any(feature = "metrics", test))]
    meter: Option<Meter>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryConfig {
    /// Creates a configuration with logging enabled and no metrics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            logs_enabled: true,
            #[cfg(any(feature = "metrics", test))]
            meter: None,
        }
    }

    /// Disables structured log events.
    #[must_use]
    pub fn without_logs(self) -> Self {
        Self {
            logs_enabled: false,
            ..self
        }
    }

    /// Enables metrics collection using the provided meter provider.
    #[cfg(any(feature = "metrics", test))]
    #[must_use]
    pub fn with_metrics(mut self, provider: &dyn MeterProvider) -> Self {
        self.meter = Some(CacheInstruments::scoped_meter(provider));
        self
    }

    /// Whether log events are enabled.
    #[must_use]
    pub fn logs_enabled(&self) -> bool {
        self.logs_enabled
    }

    /// The meter instruments are created from, if metrics are enabled.
    #[cfg(any(feature = "metrics", test))]
    #[must_use]
    pub fn meter(&self) -> Option<&Meter> {
        self.meter.as_ref()
    }

    /// Builds the telemetry recorder from this configuration.
    #[must_use]
    pub fn build(&self) -> CacheTelemetry {
        CacheTelemetry {
            inner: Arc::new(CacheTelemetryInner {
                logging_enabled: self.logs_enabled,
                #[cfg(any(feature = "metrics", test))]
                instruments: self.meter.as_ref().map(CacheInstruments::new),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MetricTester;

    #[test]
    fn defaults_to_logs_only() {
        let config = TelemetryConfig::default();

        assert!(config.logs_enabled());
        assert!(config.meter().is_none());
        assert!(config.build().logging_enabled());
    }

    #[test]
    fn with_metrics_sets_meter() {
        let tester = MetricTester::new();
        let config = TelemetryConfig::new().with_metrics(tester.meter_provider());

        assert!(config.meter().is_some());
    }
}
