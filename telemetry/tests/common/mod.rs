//! In-memory metrics harness shared by the telemetry scenario tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chassis_telemetry::testing::FakeClock;
use chassis_telemetry::{RpcMetrics, TimeSource, INSTRUMENTATION_SCOPE};
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::data::{self, ResourceMetrics};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader, SdkMeterProvider};

/// Fake-clock metrics fixture backed by the SDK's in-memory exporter.
pub struct Harness {
    pub clock: Arc<FakeClock>,
    pub metrics: Arc<RpcMetrics>,
    provider: SdkMeterProvider,
    exporter: InMemoryMetricExporter,
}

impl Harness {
    pub fn new() -> Self {
        let exporter = InMemoryMetricExporter::default();
        let reader = PeriodicReader::builder(exporter.clone()).build();
        let provider = SdkMeterProvider::builder().with_reader(reader).build();
        let meter = provider.meter(INSTRUMENTATION_SCOPE);
        let clock = Arc::new(FakeClock::new());
        let metrics = Arc::new(RpcMetrics::new(
            &meter,
            clock.clone() as Arc<dyn TimeSource>,
        ));
        Self {
            clock,
            metrics,
            provider,
            exporter,
        }
    }

    pub fn advance_ms(&self, millis: u64) {
        self.clock.advance(Duration::from_millis(millis));
    }

    /// Flush and return the latest cumulative export.
    fn latest(&self) -> ResourceMetrics {
        self.provider.force_flush().expect("force_flush failed");
        self.exporter
            .get_finished_metrics()
            .expect("exporter drained")
            .pop()
            .expect("no metrics exported")
    }

    fn with_metric<T>(&self, name: &str, f: impl FnOnce(&data::Metric) -> T) -> Option<T> {
        let resource_metrics = self.latest();
        for scope in &resource_metrics.scope_metrics {
            assert_eq!(scope.scope.name(), INSTRUMENTATION_SCOPE);
            if let Some(metric) = scope.metrics.iter().find(|m| m.name == name) {
                return Some(f(metric));
            }
        }
        None
    }

    /// Names of all instruments that have exported data so far.
    pub fn metric_names(&self) -> Vec<String> {
        let resource_metrics = self.latest();
        resource_metrics
            .scope_metrics
            .iter()
            .flat_map(|scope| scope.metrics.iter().map(|m| m.name.to_string()))
            .collect()
    }

    /// The declared unit of an instrument.
    pub fn unit(&self, name: &str) -> Option<String> {
        self.with_metric(name, |m| m.unit.to_string())
    }

    /// Value of a monotonic `u64` counter for an exact attribute set.
    pub fn counter(&self, name: &str, attrs: &[(&str, &str)]) -> Option<u64> {
        self.with_metric(name, |m| {
            let sum = m
                .data
                .as_any()
                .downcast_ref::<data::Sum<u64>>()
                .expect("counter data");
            sum.data_points
                .iter()
                .find(|p| attrs_match(&p.attributes, attrs))
                .map(|p| p.value)
        })
        .flatten()
    }

    /// `(count, sum)` of an `f64` histogram point for an exact attribute set.
    pub fn histogram_f64(&self, name: &str, attrs: &[(&str, &str)]) -> Option<(u64, f64)> {
        self.with_metric(name, |m| {
            let histogram = m
                .data
                .as_any()
                .downcast_ref::<data::Histogram<f64>>()
                .expect("f64 histogram data");
            histogram
                .data_points
                .iter()
                .find(|p| attrs_match(&p.attributes, attrs))
                .map(|p| (p.count, p.sum))
        })
        .flatten()
    }

    /// `(count, sum)` of a `u64` histogram point for an exact attribute set.
    pub fn histogram_u64(&self, name: &str, attrs: &[(&str, &str)]) -> Option<(u64, u64)> {
        self.with_metric(name, |m| {
            let histogram = m
                .data
                .as_any()
                .downcast_ref::<data::Histogram<u64>>()
                .expect("u64 histogram data");
            histogram
                .data_points
                .iter()
                .find(|p| attrs_match(&p.attributes, attrs))
                .map(|p| (p.count, p.sum))
        })
        .flatten()
    }

    /// Number of attribute-distinct points exported under an instrument.
    pub fn point_count(&self, name: &str) -> usize {
        self.with_metric(name, |m| {
            let any = m.data.as_any();
            if let Some(histogram) = any.downcast_ref::<data::Histogram<f64>>() {
                histogram.data_points.len()
            } else if let Some(histogram) = any.downcast_ref::<data::Histogram<u64>>() {
                histogram.data_points.len()
            } else if let Some(sum) = any.downcast_ref::<data::Sum<u64>>() {
                sum.data_points.len()
            } else {
                0
            }
        })
        .unwrap_or(0)
    }
}

fn attrs_match(point: &[KeyValue], want: &[(&str, &str)]) -> bool {
    point.len() == want.len()
        && want.iter().all(|(key, value)| {
            point
                .iter()
                .any(|kv| kv.key.as_str() == *key && kv.value.as_str() == *value)
        })
}

/// Absolute-difference float assertion for duration sums.
pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
