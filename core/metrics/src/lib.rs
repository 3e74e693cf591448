//! Operation stats emission for Blobshed.
//!
//! Blobstore operations report three kinds of measurements: counters for
//! outcomes, gauges for sizes, and timings for durations. The emitter trait
//! keeps the callers backend-agnostic; the default implementation accumulates
//! into a prometheus registry that can be scraped or dumped on demand.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use tracing::warn;

/// Sink for operation measurements.
///
/// Emission is fire-and-forget: implementations must never fail the
/// operation being measured.
pub trait MetricsEmitter: Send + Sync {
    /// Increment a counter by `value`.
    fn send_counter(&self, name: &str, value: u64);

    /// Set a gauge to `value`.
    fn send_gauge(&self, name: &str, value: f64);

    /// Record the duration of an operation.
    fn send_timing(&self, name: &str, duration: Duration);
}

/// Shared handle to an emitter.
pub type MetricsHandle = Arc<dyn MetricsEmitter>;

/// An emitter that drops every measurement.
#[derive(Debug, Default)]
pub struct NullEmitter;

impl MetricsEmitter for NullEmitter {
    fn send_counter(&self, _name: &str, _value: u64) {}
    fn send_gauge(&self, _name: &str, _value: f64) {}
    fn send_timing(&self, _name: &str, _duration: Duration) {}
}

/// Prometheus-backed emitter.
///
/// Collectors are registered lazily, one per metric name. Names arrive in
/// dashed form ("blobstore-s3-put-time") and are sanitized to the prometheus
/// charset before registration.
pub struct PrometheusEmitter {
    namespace: String,
    registry: Registry,
    counters: RwLock<HashMap<String, IntCounter>>,
    gauges: RwLock<HashMap<String, Gauge>>,
    histograms: RwLock<HashMap<String, Histogram>>,
}

impl PrometheusEmitter {
    /// Create an emitter with its own registry.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            registry: Registry::new(),
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
        }
    }

    /// Render all accumulated metrics in the text exposition format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_else(|e| {
                warn!("Failed to encode metrics: {}", e);
                String::new()
            })
    }

    fn metric_name(&self, name: &str) -> String {
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        if self.namespace.is_empty() {
            sanitized
        } else {
            format!("{}_{}", self.namespace, sanitized)
        }
    }

    fn counter(&self, name: &str) -> Option<IntCounter> {
        let full = self.metric_name(name);
        if let Some(counter) = self.counters.read().unwrap().get(&full) {
            return Some(counter.clone());
        }
        let mut counters = self.counters.write().unwrap();
        if let Some(counter) = counters.get(&full) {
            return Some(counter.clone());
        }
        let counter = IntCounter::with_opts(Opts::new(full.clone(), format!("counter {}", name)))
            .map_err(|e| warn!("Failed to create counter {}: {}", full, e))
            .ok()?;
        if let Err(e) = self.registry.register(Box::new(counter.clone())) {
            warn!("Failed to register counter {}: {}", full, e);
            return None;
        }
        counters.insert(full, counter.clone());
        Some(counter)
    }

    fn gauge(&self, name: &str) -> Option<Gauge> {
        let full = self.metric_name(name);
        if let Some(gauge) = self.gauges.read().unwrap().get(&full) {
            return Some(gauge.clone());
        }
        let mut gauges = self.gauges.write().unwrap();
        if let Some(gauge) = gauges.get(&full) {
            return Some(gauge.clone());
        }
        let gauge = Gauge::with_opts(Opts::new(full.clone(), format!("gauge {}", name)))
            .map_err(|e| warn!("Failed to create gauge {}: {}", full, e))
            .ok()?;
        if let Err(e) = self.registry.register(Box::new(gauge.clone())) {
            warn!("Failed to register gauge {}: {}", full, e);
            return None;
        }
        gauges.insert(full, gauge.clone());
        Some(gauge)
    }

    fn histogram(&self, name: &str) -> Option<Histogram> {
        let full = self.metric_name(name);
        if let Some(histogram) = self.histograms.read().unwrap().get(&full) {
            return Some(histogram.clone());
        }
        let mut histograms = self.histograms.write().unwrap();
        if let Some(histogram) = histograms.get(&full) {
            return Some(histogram.clone());
        }
        let histogram =
            Histogram::with_opts(HistogramOpts::new(full.clone(), format!("timing {}", name)))
                .map_err(|e| warn!("Failed to create histogram {}: {}", full, e))
                .ok()?;
        if let Err(e) = self.registry.register(Box::new(histogram.clone())) {
            warn!("Failed to register histogram {}: {}", full, e);
            return None;
        }
        histograms.insert(full, histogram.clone());
        Some(histogram)
    }
}

impl MetricsEmitter for PrometheusEmitter {
    fn send_counter(&self, name: &str, value: u64) {
        if let Some(counter) = self.counter(name) {
            counter.inc_by(value);
        }
    }

    fn send_gauge(&self, name: &str, value: f64) {
        if let Some(gauge) = self.gauge(name) {
            gauge.set(value);
        }
    }

    fn send_timing(&self, name: &str, duration: Duration) {
        if let Some(histogram) = self.histogram(name) {
            histogram.observe(duration.as_secs_f64());
        }
    }
}

/// Handle to an emitter that discards everything.
pub fn null_handle() -> MetricsHandle {
    Arc::new(NullEmitter)
}

/// Handle to a prometheus emitter with the given namespace.
pub fn prometheus_handle(namespace: impl Into<String>) -> MetricsHandle {
    Arc::new(PrometheusEmitter::new(namespace))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates() {
        let emitter = PrometheusEmitter::new("blobshed");
        emitter.send_counter("blobstore-s3-put-ok", 1);
        emitter.send_counter("blobstore-s3-put-ok", 2);

        let output = emitter.gather();
        assert!(output.contains("blobshed_blobstore_s3_put_ok 3"));
    }

    #[test]
    fn test_gauge_sets_latest_value() {
        let emitter = PrometheusEmitter::new("blobshed");
        emitter.send_gauge("blobstore-s3-put-size", 42.0);
        emitter.send_gauge("blobstore-s3-put-size", 7.0);

        let output = emitter.gather();
        assert!(output.contains("blobshed_blobstore_s3_put_size 7"));
    }

    #[test]
    fn test_timing_observed() {
        let emitter = PrometheusEmitter::new("blobshed");
        emitter.send_timing("blobstore-s3-put-time", Duration::from_millis(250));

        let output = emitter.gather();
        assert!(output.contains("blobshed_blobstore_s3_put_time_count 1"));
    }

    #[test]
    fn test_name_sanitization() {
        let emitter = PrometheusEmitter::new("");
        emitter.send_counter("status-403", 1);

        assert!(emitter.gather().contains("status_403 1"));
    }

    #[test]
    fn test_null_emitter_is_silent() {
        let emitter = NullEmitter;
        emitter.send_counter("anything", 1);
        emitter.send_gauge("anything", 1.0);
        emitter.send_timing("anything", Duration::from_secs(1));
    }
}
