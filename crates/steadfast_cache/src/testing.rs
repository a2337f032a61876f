// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Helpers for asserting on the log events and metrics a cache emits.
//!
//! Available with the `test-util` feature, so crates layered on this one can verify their own
//! telemetry the same way.

use std::io::Write;
use std::sync::Arc;

use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::data::{AggregatedMetrics, Metric, MetricData, ResourceMetrics, ScopeMetrics};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};
use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

/// Collects metrics in memory and asserts on the attributes they were recorded with.
///
/// # Examples
///
/// ```
/// use steadfast_cache::TelemetryConfig;
/// use steadfast_cache::testing::MetricTester;
///
/// let tester = MetricTester::new();
/// let telemetry = TelemetryConfig::new().with_metrics(tester.meter_provider()).build();
/// # let _ = telemetry;
/// ```
#[derive(Debug)]
pub struct MetricTester {
    exporter: InMemoryMetricExporter,
    provider: SdkMeterProvider,
}

impl Default for MetricTester {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricTester {
    /// Creates a meter provider that exports into memory.
    #[must_use]
    pub fn new() -> Self {
        let exporter = InMemoryMetricExporter::default();
        let provider = SdkMeterProvider::builder().with_periodic_exporter(exporter.clone()).build();
        Self { exporter, provider }
    }

    /// The provider to hand to `with_metrics`.
    #[must_use]
    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.provider
    }

    /// Asserts that every one of `expected` was recorded on some data point.
    ///
    /// # Panics
    ///
    /// Panics when an attribute is missing or the exporter cannot be flushed.
    pub fn assert_attributes_contain(&self, expected: &[KeyValue]) {
        self.provider.force_flush().expect("meter provider should flush");
        let recorded: Vec<KeyValue> = self
            .exporter
            .get_finished_metrics()
            .expect("in-memory exporter should return metrics")
            .iter()
            .flat_map(ResourceMetrics::scope_metrics)
            .flat_map(ScopeMetrics::metrics)
            .flat_map(attributes_of)
            .collect();

        for attr in expected {
            assert!(recorded.contains(attr), "attribute {attr:?} not recorded, got: {recorded:?}");
        }
    }
}

macro_rules! data_point_attributes {
    ($data:expr) => {
        match $data {
            MetricData::Gauge(data) => data.data_points().flat_map(|p| p.attributes().cloned()).collect(),
            MetricData::Sum(data) => data.data_points().flat_map(|p| p.attributes().cloned()).collect(),
            MetricData::Histogram(data) => data.data_points().flat_map(|p| p.attributes().cloned()).collect(),
            MetricData::ExponentialHistogram(data) => data.data_points().flat_map(|p| p.attributes().cloned()).collect(),
        }
    };
}

fn attributes_of(metric: &Metric) -> Vec<KeyValue> {
    match metric.data() {
        AggregatedMetrics::F64(data) => data_point_attributes!(data),
        AggregatedMetrics::U64(data) => data_point_attributes!(data),
        AggregatedMetrics::I64(data) => data_point_attributes!(data),
    }
}

/// Captures formatted `tracing` output in a shared buffer.
///
/// # Examples
///
/// ```
/// use steadfast_cache::testing::LogCapture;
///
/// let capture = LogCapture::new();
/// let _guard = tracing::subscriber::set_default(capture.subscriber());
///
/// tracing::info!(cache.name = "positions", "cache.event");
/// capture.assert_contains("positions");
/// ```
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    /// Creates an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    #[must_use]
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    /// # Panics
    ///
    /// Panics when the captured output does not contain `expected`.
    pub fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(output.contains(expected), "log output does not contain '{expected}', got:\n{output}");
    }

    /// A subscriber writing into this capture; install it with `tracing::subscriber::set_default`.
    #[must_use]
    pub fn subscriber(&self) -> impl tracing::Subscriber + use<> {
        use tracing_subscriber::layer::SubscriberExt;

        tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_writer(self.clone()).with_ansi(false))
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter(Arc::clone(&self.buffer))
    }
}

/// The writer [`LogCapture`] hands to the formatter.
#[derive(Debug)]
pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
