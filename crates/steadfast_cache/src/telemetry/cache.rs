// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache telemetry implementation and recording.

use std::fmt;
use std::time::Duration;

use tracing::Level;

#[cfg(any(feature = "metrics", test))]
use crate::telemetry::instruments::CacheInstruments;
use crate::telemetry::{CacheActivity, CacheOperation, CacheTelemetry};

#[derive(Clone, Debug)]
pub(crate) struct CacheTelemetryInner {
    pub(crate) logging_enabled: bool,
    #[cfg(any(feature = "metrics", test))]
    pub(crate) instruments: Option<CacheInstruments>,
}

impl CacheTelemetry {
    /// Whether this instance emits log events.
    #[must_use]
    pub fn logging_enabled(&self) -> bool {
        self.inner.logging_enabled
    }

    #[inline]
    pub(crate) fn record(&self, cache_name: &str, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(instruments) = &self.inner.instruments {
            instruments.event(cache_name, operation, activity, duration);
        }

        if self.inner.logging_enabled {
            Self::emit(cache_name, operation, activity, duration);
        }
    }

    /// Records a failed tier call together with its cause.
    pub(crate) fn record_error(&self, cache_name: &str, operation: CacheOperation, activity: CacheActivity, error: &dyn fmt::Display) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(instruments) = &self.inner.instruments {
            instruments.event(cache_name, operation, activity, None);
        }

        if !self.inner.logging_enabled {
            return;
        }

        let op = operation.as_str();
        let ev = activity.as_str();
        if activity.level() == Level::ERROR {
            tracing::error!(cache.name = cache_name, cache.operation = op, cache.activity = ev, error = %error, "cache.event");
        } else {
            tracing::warn!(cache.name = cache_name, cache.operation = op, cache.activity = ev, error = %error, "cache.event");
        }
    }

    #[inline]
    pub(crate) fn record_size(&self, cache_name: &str, size: usize) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(instruments) = &self.inner.instruments {
            instruments.size(cache_name, size);
        }

        #[cfg(not(any(feature = "metrics", test)))]
        let _ = (cache_name, size);
    }

    fn emit(cache_name: &str, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>) {
        let op = operation.as_str();
        let ev = activity.as_str();
        let duration_ns = duration.map(|d| d.as_nanos());

        // Tracing level must be constant, so a macro selects the call site per level.
        // Field names match the metric attribute keys.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(
                    cache.name = cache_name,
                    cache.operation = op,
                    cache.activity = ev,
                    cache.duration_ns = ?duration_ns,
                    "cache.event"
                )
            };
        }

        let level = activity.level();
        if level == Level::ERROR {
            emit_event!(error);
        } else if level == Level::WARN {
            emit_event!(warn);
        } else if level == Level::INFO {
            emit_event!(info);
        } else {
            emit_event!(debug);
        }
    }
}

#[cfg(test)]
mod tests {
    use opentelemetry::KeyValue;

    use super::*;
    use crate::telemetry::TelemetryConfig;
    use crate::telemetry::instruments::{ACTIVITY_KEY, NAME_KEY, OPERATION_KEY};
    use crate::testing::{LogCapture, MetricTester};

    #[test]
    fn metrics_record_emits_correct_attributes() {
        let tester = MetricTester::new();
        let telemetry = TelemetryConfig::new().without_logs().with_metrics(tester.meter_provider()).build();

        telemetry.record("my_cache", CacheOperation::Get, CacheActivity::Hit, Some(Duration::from_millis(5)));

        tester.assert_attributes_contain(&[
            KeyValue::new(NAME_KEY, "my_cache"),
            KeyValue::new(OPERATION_KEY, CacheOperation::Get.as_str()),
            KeyValue::new(ACTIVITY_KEY, CacheActivity::Hit.as_str()),
        ]);
    }

    #[test]
    fn metrics_record_size_emits_cache_name() {
        let tester = MetricTester::new();
        let telemetry = TelemetryConfig::new().with_metrics(tester.meter_provider()).build();

        telemetry.record_size("size_test_cache", 42);

        tester.assert_attributes_contain(&[KeyValue::new(NAME_KEY, "size_test_cache")]);
    }

    #[test]
    fn logs_emit_contains_all_fields_and_values() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        CacheTelemetry::emit(
            "my_test_cache",
            CacheOperation::Invalidate,
            CacheActivity::Error,
            Some(Duration::from_nanos(12345)),
        );

        capture.assert_contains(NAME_KEY);
        capture.assert_contains(OPERATION_KEY);
        capture.assert_contains(ACTIVITY_KEY);
        capture.assert_contains("cache.duration_ns");
        capture.assert_contains("cache.event");

        capture.assert_contains("my_test_cache");
        capture.assert_contains(CacheOperation::Invalidate.as_str());
        capture.assert_contains(CacheActivity::Error.as_str());
    }

    #[test]
    fn logs_emit_at_correct_levels() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        CacheTelemetry::emit("cache", CacheOperation::Get, CacheActivity::Error, None);
        capture.assert_contains("ERROR");

        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        CacheTelemetry::emit("cache", CacheOperation::Get, CacheActivity::TierUnavailable, None);
        capture.assert_contains("WARN");

        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        CacheTelemetry::emit("cache", CacheOperation::Get, CacheActivity::Expired, None);
        capture.assert_contains("INFO");

        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        CacheTelemetry::emit("cache", CacheOperation::Get, CacheActivity::Hit, None);
        capture.assert_contains("DEBUG");
    }

    #[test]
    fn record_error_includes_cause() {
        let telemetry = TelemetryConfig::new().build();
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        telemetry.record_error("cache", CacheOperation::Insert, CacheActivity::TierUnavailable, &"replica timed out");

        capture.assert_contains("WARN");
        capture.assert_contains("replica timed out");
        capture.assert_contains(CacheActivity::TierUnavailable.as_str());
    }

    #[test]
    fn disabled_logging_emits_nothing() {
        let telemetry = TelemetryConfig::new().without_logs().build();

        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        telemetry.record("cache", CacheOperation::Get, CacheActivity::Hit, Some(Duration::from_secs(1)));

        assert!(!telemetry.logging_enabled());
        assert!(capture.output().is_empty());
    }
}
