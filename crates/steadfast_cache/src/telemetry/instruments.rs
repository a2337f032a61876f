// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, MeterProvider};
use opentelemetry::{InstrumentationScope, KeyValue};

use crate::telemetry::{CacheActivity, CacheOperation};

pub(crate) const NAME_KEY: &str = "cache.name";
pub(crate) const OPERATION_KEY: &str = "cache.operation";
pub(crate) const ACTIVITY_KEY: &str = "cache.activity";

/// The OpenTelemetry instruments one telemetry instance records into.
#[derive(Clone, Debug)]
pub(crate) struct CacheInstruments {
    events: Counter<u64>,
    durations: Histogram<f64>,
    entries: Gauge<u64>,
}

impl CacheInstruments {
    /// Scopes a meter to this crate so its instruments are distinguishable from the executor's.
    pub(crate) fn scoped_meter(provider: &dyn MeterProvider) -> Meter {
        provider.meter_with_scope(
            InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
                .with_version(env!("CARGO_PKG_VERSION"))
                .build(),
        )
    }

    pub(crate) fn new(meter: &Meter) -> Self {
        Self {
            events: meter
                .u64_counter("cache.event.count")
                .with_description("Cache events")
                .with_unit("{event}")
                .build(),
            durations: meter
                .f64_histogram("cache.operation.duration")
                .with_description("Cache operation duration")
                .with_unit("s")
                .build(),
            entries: meter
                .u64_gauge("cache.size")
                .with_description("Number of entries in the cache")
                .with_unit("{entry}")
                .build(),
        }
    }

    pub(crate) fn event(&self, cache_name: &str, operation: CacheOperation, activity: CacheActivity, duration: Option<Duration>) {
        let attrs = [
            KeyValue::new(NAME_KEY, cache_name.to_owned()),
            KeyValue::new(OPERATION_KEY, operation.as_str()),
            KeyValue::new(ACTIVITY_KEY, activity.as_str()),
        ];

        self.events.add(1, &attrs);
        if let Some(d) = duration {
            self.durations.record(d.as_secs_f64(), &attrs);
        }
    }

    pub(crate) fn size(&self, cache_name: &str, size: usize) {
        self.entries
            .record(u64::try_from(size).unwrap_or(u64::MAX), &[KeyValue::new(NAME_KEY, cache_name.to_owned())]);
    }
}
