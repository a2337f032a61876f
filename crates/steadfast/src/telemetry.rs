// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Executor telemetry: structured `tracing` events and, with the `metrics` feature, an
//! OpenTelemetry event counter.

use std::sync::Arc;

#[cfg(feature = "metrics")]
use opentelemetry::{KeyValue, metrics::Counter};
use steadfast_cache::TelemetryConfig;
use tracing::Level;

#[cfg(feature = "metrics")]
const QUERY_EVENT_COUNT_NAME: &str = "query.event.count";
#[cfg(feature = "metrics")]
const QUERY_ACTIVITY_NAME: &str = "query.activity";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueryActivity {
    CacheHit,
    Joined,
    Started,
    Succeeded,
    Retrying,
    OfflineFallback,
    StaleFallback,
    CacheWriteFailed,
    Cancelled,
    Failed,
}

impl QueryActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CacheHit => "query.cache_hit",
            Self::Joined => "query.joined",
            Self::Started => "query.started",
            Self::Succeeded => "query.succeeded",
            Self::Retrying => "query.retrying",
            Self::OfflineFallback => "query.offline_fallback",
            Self::StaleFallback => "query.stale_fallback",
            Self::CacheWriteFailed => "query.cache_write_failed",
            Self::Cancelled => "query.cancelled",
            Self::Failed => "query.failed",
        }
    }

    pub fn level(self) -> Level {
        match self {
            Self::CacheHit | Self::Joined | Self::Started | Self::Succeeded => Level::DEBUG,
            Self::Retrying | Self::Cancelled => Level::INFO,
            Self::OfflineFallback | Self::StaleFallback | Self::CacheWriteFailed => Level::WARN,
            Self::Failed => Level::ERROR,
        }
    }
}

/// Records executor activity.
#[derive(Clone, Debug)]
pub(crate) struct QueryTelemetry {
    inner: Arc<QueryTelemetryInner>,
}

#[derive(Debug)]
struct QueryTelemetryInner {
    logging_enabled: bool,
    #[cfg(feature = "metrics")]
    event_counter: Option<Counter<u64>>,
}

impl QueryTelemetry {
    pub fn new(config: &TelemetryConfig) -> Self {
        #[cfg(feature = "metrics")]
        let event_counter = config.meter().map(|meter| {
            meter
                .u64_counter(QUERY_EVENT_COUNT_NAME)
                .with_description("Query executor events")
                .with_unit("{event}")
                .build()
        });

        Self {
            inner: Arc::new(QueryTelemetryInner {
                logging_enabled: config.logs_enabled(),
                #[cfg(feature = "metrics")]
                event_counter,
            }),
        }
    }

    pub fn record(&self, key: Option<&str>, activity: QueryActivity, attempt: u32) {
        self.count(activity);

        if !self.inner.logging_enabled {
            return;
        }

        let ev = activity.as_str();
        let key = key.unwrap_or_default();

        // Tracing level must be constant, so a macro selects the call site per level.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(query.key = key, query.activity = ev, query.attempt = attempt, "query.event")
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

    /// Records an activity caused by an operation failure, together with the failure.
    pub fn record_error(&self, key: Option<&str>, activity: QueryActivity, attempt: u32, error: &dyn std::fmt::Display) {
        self.count(activity);

        if !self.inner.logging_enabled {
            return;
        }

        let ev = activity.as_str();
        let key = key.unwrap_or_default();

        let level = activity.level();
        if level == Level::ERROR {
            tracing::error!(query.key = key, query.activity = ev, query.attempt = attempt, error = %error, "query.event");
        } else if level == Level::WARN {
            tracing::warn!(query.key = key, query.activity = ev, query.attempt = attempt, error = %error, "query.event");
        } else {
            tracing::info!(query.key = key, query.activity = ev, query.attempt = attempt, error = %error, "query.event");
        }
    }

    fn count(&self, activity: QueryActivity) {
        #[cfg(feature = "metrics")]
        if let Some(counter) = &self.inner.event_counter {
            counter.add(1, &[KeyValue::new(QUERY_ACTIVITY_NAME, activity.as_str())]);
        }

        #[cfg(not(feature = "metrics"))]
        let _ = (self, activity);
    }
}
