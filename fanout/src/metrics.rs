//! Prometheus metrics instrumentation for fanout.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `fanout_items_enumerated_total` - Work items returned by enumeration
//! - `fanout_events_dispatched_total` - Events published to the bus
//! - `fanout_invocations_total` - Invocation attempts by final status
//! - `fanout_step_replays_total` - Steps served from the journal
//!
//! ## Histograms
//! - `fanout_chunk_publish_seconds` - Time to publish one chunk
#![cfg(feature = "metrics")]

use prometheus::core::Collector;
use prometheus::{exponential_buckets, CounterVec, HistogramVec, IntCounter, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for fanout metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter for work items returned by enumeration.
pub static ITEMS_ENUMERATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "fanout_items_enumerated_total",
        "Total number of work items enumerated",
    )
    .expect("fanout_items_enumerated_total metric creation failed")
});

/// Counter for events published to the bus.
pub static EVENTS_DISPATCHED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "fanout_events_dispatched_total",
        "Total number of events dispatched",
    )
    .expect("fanout_events_dispatched_total metric creation failed")
});

/// Counter for invocation attempts.
///
/// Labels:
/// - `status`: completed, empty, failed
pub static INVOCATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("fanout_invocations_total", "Total number of invocation attempts");
    CounterVec::new(opts, &["status"]).expect("fanout_invocations_total metric creation failed")
});

/// Counter for steps served from the journal instead of executed.
///
/// Labels:
/// - `step`: step name with any chunk number stripped
pub static STEP_REPLAYS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("fanout_step_replays_total", "Total number of replayed steps");
    CounterVec::new(opts, &["step"]).expect("fanout_step_replays_total metric creation failed")
});

/// Histogram for chunk publish duration in seconds.
pub static CHUNK_PUBLISH_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "fanout_chunk_publish_seconds",
        "Time to publish one chunk in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &[]).expect("fanout_chunk_publish_seconds metric creation failed")
});

/// Register all metrics with the global registry.
///
/// Idempotent: calling it more than once is safe.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(ITEMS_ENUMERATED_TOTAL.clone()),
        Box::new(EVENTS_DISPATCHED_TOTAL.clone()),
        Box::new(INVOCATIONS_TOTAL.clone()),
        Box::new(STEP_REPLAYS_TOTAL.clone()),
        Box::new(CHUNK_PUBLISH_SECONDS.clone()),
    ];

    for metric in collectors {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_items_enumerated(count: u64) {
    ITEMS_ENUMERATED_TOTAL.inc_by(count);
}

pub fn record_chunk_dispatched(size: u64, duration_secs: f64) {
    EVENTS_DISPATCHED_TOTAL.inc_by(size);
    CHUNK_PUBLISH_SECONDS
        .with_label_values(&[])
        .observe(duration_secs);
}

pub fn record_invocation(status: &str) {
    INVOCATIONS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_step_replayed(step: &str) {
    STEP_REPLAYS_TOTAL
        .with_label_values(&[step_family(step)])
        .inc();
}

/// `send-chunk-12` -> `send-chunk`; keeps label cardinality bounded.
fn step_family(step: &str) -> &str {
    step.trim_end_matches(|c: char| c.is_ascii_digit())
        .trim_end_matches('-')
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization_is_idempotent() {
        init_metrics().expect("metrics initialization should succeed");
        init_metrics().expect("second initialization should succeed");
    }

    #[test]
    fn test_step_family() {
        assert_eq!(step_family("send-chunk-12"), "send-chunk");
        assert_eq!(step_family("load-active-items"), "load-active-items");
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().expect("metrics initialization should succeed");

        record_items_enumerated(3);
        record_chunk_dispatched(3, 0.002);
        record_invocation("completed");
        record_step_replayed("send-chunk-1");

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("fanout_items_enumerated_total"));
        assert!(output.contains("fanout_invocations_total"));
    }
}
