//! Metrics collection and export module

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub pipelines_started: IntCounter,
    pub pipelines_succeeded: IntCounter,
    pub pipelines_failed: IntCounter,
    pub pipelines_resumed: IntCounter,
    pub stage_transitions: IntCounter,

    // Submission counters
    pub tx_submitted: IntCounter,
    pub tx_confirmed: IntCounter,
    pub tx_failed: IntCounter,
    pub tx_timeouts: IntCounter,

    // Storage counters
    pub uploads_total: IntCounter,
    pub uploads_failed: IntCounter,
    pub uploaded_bytes: IntCounter,
    pub storage_lamports_paid: IntCounter,

    // Gauges
    pub active_pipelines: IntGauge,

    // Histograms
    pub rpc_latency: Histogram,
    pub confirmation_latency: Histogram,
    pub upload_latency: Histogram,
    pub estimate_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let pipelines_started = IntCounter::with_opts(Opts::new(
            "mint_pipelines_started_total",
            "Number of mint pipeline runs started",
        ))?;

        let pipelines_succeeded = IntCounter::with_opts(Opts::new(
            "mint_pipelines_succeeded_total",
            "Number of mint pipeline runs that reached the final stage",
        ))?;

        let pipelines_failed = IntCounter::with_opts(Opts::new(
            "mint_pipelines_failed_total",
            "Number of mint pipeline runs that ended in Failed",
        ))?;

        let pipelines_resumed = IntCounter::with_opts(Opts::new(
            "mint_pipelines_resumed_total",
            "Number of mint pipeline runs resumed from persisted state",
        ))?;

        let stage_transitions = IntCounter::with_opts(Opts::new(
            "mint_stage_transitions_total",
            "Number of pipeline stage transitions",
        ))?;

        let tx_submitted = IntCounter::with_opts(Opts::new(
            "tx_submitted_total",
            "Number of transactions broadcast",
        ))?;

        let tx_confirmed = IntCounter::with_opts(Opts::new(
            "tx_confirmed_total",
            "Number of transactions observed at the requested commitment",
        ))?;

        let tx_failed = IntCounter::with_opts(Opts::new(
            "tx_failed_total",
            "Number of transactions rejected or failed on the ledger",
        ))?;

        let tx_timeouts = IntCounter::with_opts(Opts::new(
            "tx_confirmation_timeouts_total",
            "Number of confirmations not observed inside the bound",
        ))?;

        let uploads_total =
            IntCounter::with_opts(Opts::new("uploads_total", "Number of gateway uploads"))?;

        let uploads_failed = IntCounter::with_opts(Opts::new(
            "uploads_failed_total",
            "Number of gateway uploads that failed",
        ))?;

        let uploaded_bytes = IntCounter::with_opts(Opts::new(
            "uploaded_bytes_total",
            "Bytes handed to the storage gateway",
        ))?;

        let storage_lamports_paid = IntCounter::with_opts(Opts::new(
            "storage_lamports_paid_total",
            "Lamports staged as storage payment",
        ))?;

        let active_pipelines = IntGauge::with_opts(Opts::new(
            "active_pipelines",
            "Number of mint pipelines currently running",
        ))?;

        let rpc_latency = Histogram::with_opts(
            HistogramOpts::new("rpc_latency_seconds", "RPC call latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "confirmation_latency_seconds",
                "Time from broadcast to observed commitment",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 40.0, 60.0]),
        )?;

        let upload_latency = Histogram::with_opts(
            HistogramOpts::new("upload_latency_seconds", "Gateway upload latency")
                .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )?;

        let estimate_latency = Histogram::with_opts(
            HistogramOpts::new("estimate_latency_seconds", "Storage cost estimation latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(pipelines_started.clone()))?;
        registry.register(Box::new(pipelines_succeeded.clone()))?;
        registry.register(Box::new(pipelines_failed.clone()))?;
        registry.register(Box::new(pipelines_resumed.clone()))?;
        registry.register(Box::new(stage_transitions.clone()))?;
        registry.register(Box::new(tx_submitted.clone()))?;
        registry.register(Box::new(tx_confirmed.clone()))?;
        registry.register(Box::new(tx_failed.clone()))?;
        registry.register(Box::new(tx_timeouts.clone()))?;
        registry.register(Box::new(uploads_total.clone()))?;
        registry.register(Box::new(uploads_failed.clone()))?;
        registry.register(Box::new(uploaded_bytes.clone()))?;
        registry.register(Box::new(storage_lamports_paid.clone()))?;
        registry.register(Box::new(active_pipelines.clone()))?;
        registry.register(Box::new(rpc_latency.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;
        registry.register(Box::new(upload_latency.clone()))?;
        registry.register(Box::new(estimate_latency.clone()))?;

        Ok(Self {
            registry,
            pipelines_started,
            pipelines_succeeded,
            pipelines_failed,
            pipelines_resumed,
            stage_transitions,
            tx_submitted,
            tx_confirmed,
            tx_failed,
            tx_timeouts,
            uploads_total,
            uploads_failed,
            uploaded_bytes,
            storage_lamports_paid,
            active_pipelines,
            rpc_latency,
            confirmation_latency,
            upload_latency,
            estimate_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Increment a named counter
    /// Unknown names are logged and ignored
    pub fn increment_counter(&self, name: &str) {
        match name {
            "mint_pipelines_started_total" => self.pipelines_started.inc(),
            "mint_pipelines_succeeded_total" => self.pipelines_succeeded.inc(),
            "mint_pipelines_failed_total" => self.pipelines_failed.inc(),
            "mint_pipelines_resumed_total" => self.pipelines_resumed.inc(),
            "mint_stage_transitions_total" => self.stage_transitions.inc(),
            "tx_submitted_total" => self.tx_submitted.inc(),
            "tx_confirmed_total" => self.tx_confirmed.inc(),
            "tx_failed_total" => self.tx_failed.inc(),
            "tx_confirmation_timeouts_total" => self.tx_timeouts.inc(),
            "uploads_total" => self.uploads_total.inc(),
            "uploads_failed_total" => self.uploads_failed.inc(),
            _ => {
                tracing::debug!("Unknown counter name: {}", name);
            }
        }
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
    histogram_name: Option<String>,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            histogram_name: None,
        }
    }

    /// Create a timer with a histogram name for automatic recording
    pub fn with_name(histogram_name: &str) -> Self {
        Self {
            start: Instant::now(),
            histogram_name: Some(histogram_name.to_string()),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        let duration = self.start.elapsed();
        histogram.observe(duration.as_secs_f64());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Finish the timer and record to the associated histogram
    pub fn finish(self) {
        if let Some(name) = self.histogram_name {
            let duration = self.start.elapsed().as_secs_f64();
            match name.as_str() {
                "rpc_latency_seconds" => metrics().rpc_latency.observe(duration),
                "confirmation_latency_seconds" => metrics().confirmation_latency.observe(duration),
                "upload_latency_seconds" => metrics().upload_latency.observe(duration),
                "estimate_latency_seconds" => metrics().estimate_latency.observe(duration),
                _ => {
                    tracing::debug!("Unknown histogram name: {}", name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render_contains_registered_names() {
        let m = Metrics::new().unwrap();
        m.increment_counter("tx_submitted_total");
        m.increment_counter("not_a_counter");
        assert_eq!(m.tx_submitted.get(), 1);

        let text = m.render().unwrap();
        assert!(text.contains("tx_submitted_total 1"));
        assert!(text.contains("confirmation_latency_seconds"));
    }

    #[test]
    fn test_plain_timer_observes_given_histogram() {
        let m = Metrics::new().unwrap();
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(2));

        assert!(timer.elapsed_secs() >= 0.002);
        timer.observe_duration(&m.rpc_latency);
        assert_eq!(m.rpc_latency.get_sample_count(), 1);
        assert!(m.rpc_latency.get_sample_sum() >= 0.002);
    }

    #[test]
    fn test_timer_records_into_histogram() {
        let before = metrics().upload_latency.get_sample_count();
        Timer::with_name("upload_latency_seconds").finish();
        assert!(metrics().upload_latency.get_sample_count() > before);
    }
}
