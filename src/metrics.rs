//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub bundles_submitted: IntCounterVec,
    pub bundles_confirmed: IntCounterVec,
    pub bundles_failed: IntCounterVec,
    pub edition_collisions: IntCounter,
    pub workflows_completed: IntCounterVec,
    pub workflows_incomplete: IntCounterVec,

    // Gauges
    pub workflows_in_flight: IntGauge,

    // Histograms
    pub bundle_latency: Histogram,
    pub rpc_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let bundles_submitted = IntCounterVec::new(
            Opts::new("bundles_submitted_total", "Bundles handed to the ledger"),
            &["stage"],
        )?;

        let bundles_confirmed = IntCounterVec::new(
            Opts::new("bundles_confirmed_total", "Bundles confirmed by the ledger"),
            &["stage"],
        )?;

        let bundles_failed = IntCounterVec::new(
            Opts::new("bundles_failed_total", "Bundles rejected or timed out"),
            &["stage", "category"],
        )?;

        let edition_collisions = IntCounter::with_opts(Opts::new(
            "edition_collisions_total",
            "Print attempts whose edition number was already taken",
        ))?;

        let workflows_completed = IntCounterVec::new(
            Opts::new("workflows_completed_total", "Workflows that reached Complete"),
            &["kind"],
        )?;

        let workflows_incomplete = IntCounterVec::new(
            Opts::new(
                "workflows_incomplete_total",
                "Workflows halted after at least one bundle confirmed",
            ),
            &["kind"],
        )?;

        let workflows_in_flight = IntGauge::with_opts(Opts::new(
            "workflows_in_flight",
            "Workflows currently being sequenced",
        ))?;

        let bundle_latency = Histogram::with_opts(
            HistogramOpts::new(
                "bundle_latency_seconds",
                "Time from submission to confirmation or failure",
            )
            .buckets(vec![0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        )?;

        let rpc_latency = Histogram::with_opts(
            HistogramOpts::new("rpc_latency_seconds", "RPC query latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(bundles_submitted.clone()))?;
        registry.register(Box::new(bundles_confirmed.clone()))?;
        registry.register(Box::new(bundles_failed.clone()))?;
        registry.register(Box::new(edition_collisions.clone()))?;
        registry.register(Box::new(workflows_completed.clone()))?;
        registry.register(Box::new(workflows_incomplete.clone()))?;
        registry.register(Box::new(workflows_in_flight.clone()))?;
        registry.register(Box::new(bundle_latency.clone()))?;
        registry.register(Box::new(rpc_latency.clone()))?;

        Ok(Self {
            registry,
            bundles_submitted,
            bundles_confirmed,
            bundles_failed,
            edition_collisions,
            workflows_completed,
            workflows_incomplete,
            workflows_in_flight,
            bundle_latency,
            rpc_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format
    pub fn export_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
///
/// None only if registration failed at startup, which is logged once.
pub fn metrics() -> Option<&'static Metrics> {
    static METRICS: once_cell::sync::Lazy<Option<Metrics>> =
        once_cell::sync::Lazy::new(|| match Metrics::new() {
            Ok(metrics) => Some(metrics),
            Err(err) => {
                tracing::error!(error = %err, "Failed to initialize metrics");
                None
            }
        });
    METRICS.as_ref()
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        let duration = self.start.elapsed();
        histogram.observe(duration.as_secs_f64());
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
