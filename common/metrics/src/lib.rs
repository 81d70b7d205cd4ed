//! Wrapper around the `prometheus` crate: metrics are created with
//! `try_create_*` into the default registry and mutated through helpers that
//! silently ignore metrics which failed to register, so an exporter mishap can
//! never take down a sync loop.

use std::time::Duration;

pub use prometheus::{
    Encoder, Error, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, TextEncoder,
};

pub type Result<T> = std::result::Result<T, Error>;

pub fn try_create_int_counter(name: &str, help: &str) -> Result<IntCounter> {
    let opts = Opts::new(name, help);
    let counter = IntCounter::with_opts(opts)?;
    prometheus::register(Box::new(counter.clone()))?;
    Ok(counter)
}

pub fn try_create_int_gauge(name: &str, help: &str) -> Result<IntGauge> {
    let opts = Opts::new(name, help);
    let gauge = IntGauge::with_opts(opts)?;
    prometheus::register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

pub fn try_create_histogram(name: &str, help: &str) -> Result<Histogram> {
    let opts = HistogramOpts::new(name, help);
    let histogram = Histogram::with_opts(opts)?;
    prometheus::register(Box::new(histogram.clone()))?;
    Ok(histogram)
}

pub fn inc_counter(counter: &Result<IntCounter>) {
    if let Ok(counter) = counter {
        counter.inc();
    }
}

pub fn set_gauge(gauge: &Result<IntGauge>, value: i64) {
    if let Ok(gauge) = gauge {
        gauge.set(value);
    }
}

pub fn observe_duration(histogram: &Result<Histogram>, duration: Duration) {
    if let Ok(histogram) = histogram {
        histogram.observe(duration.as_secs_f64());
    }
}

/// Renders the default registry in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_set_and_render() {
        let gauge = try_create_int_gauge("metrics_test_gauge", "test gauge");
        set_gauge(&gauge, 42);
        assert_eq!(gauge.as_ref().unwrap().get(), 42);
        assert!(gather_text().contains("metrics_test_gauge 42"));
    }

    #[test]
    fn duplicate_registration_is_an_error_not_a_panic() {
        let first = try_create_int_counter("metrics_test_counter", "test counter");
        assert!(first.is_ok());
        let second = try_create_int_counter("metrics_test_counter", "test counter");
        assert!(second.is_err());
        // Mutating a failed metric is a no-op.
        inc_counter(&second);
    }
}
