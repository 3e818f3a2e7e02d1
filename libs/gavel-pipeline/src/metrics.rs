// Prometheus metrics for the evaluation pipeline

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Evaluations started (mode = run | submit | validate)
    pub static ref EVALUATIONS_STARTED: CounterVec = CounterVec::new(
        Opts::new("gavel_evaluations_started_total", "Total evaluations started"),
        &["mode", "language"]
    )
    .expect("metric can be created");

    // Terminal verdicts written to the record store
    pub static ref VERDICTS: CounterVec = CounterVec::new(
        Opts::new("gavel_verdicts_total", "Total submissions finalized by status"),
        &["status"]
    )
    .expect("metric can be created");

    // Judge call failures by operation and kind
    pub static ref JUDGE_ERRORS: CounterVec = CounterVec::new(
        Opts::new("gavel_judge_errors_total", "Total judge call failures"),
        &["operation", "kind"]
    )
    .expect("metric can be created");

    // Poll rounds needed per batch
    pub static ref POLL_ROUNDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("gavel_poll_rounds", "Status fetch rounds per batch")
            .buckets(vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 21.0]),
        &["state"]
    )
    .expect("metric can be created");

    // Batch wall-clock time from dispatch to a final poll state (milliseconds)
    pub static ref BATCH_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("gavel_batch_duration_ms", "Batch duration in milliseconds")
            .buckets(vec![250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0, 60000.0]),
        &["state"]
    )
    .expect("metric can be created");
}

static INIT: Once = Once::new();

/// Register every collector with the registry. Safe to call more than once.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(EVALUATIONS_STARTED.clone()))
            .expect("collector can be registered");

        REGISTRY
            .register(Box::new(VERDICTS.clone()))
            .expect("collector can be registered");

        REGISTRY
            .register(Box::new(JUDGE_ERRORS.clone()))
            .expect("collector can be registered");

        REGISTRY
            .register(Box::new(POLL_ROUNDS.clone()))
            .expect("collector can be registered");

        REGISTRY
            .register(Box::new(BATCH_DURATION.clone()))
            .expect("collector can be registered");
    });
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_evaluation_started(mode: &str, language: &str) {
    EVALUATIONS_STARTED.with_label_values(&[mode, language]).inc();
}

pub fn record_verdict(status: &str) {
    VERDICTS.with_label_values(&[status]).inc();
}

pub fn record_judge_error(operation: &str, kind: &str) {
    JUDGE_ERRORS.with_label_values(&[operation, kind]).inc();
}

/// Record the final state of one polled batch
pub fn record_batch(state: &str, polls: u32, duration_ms: f64) {
    POLL_ROUNDS.with_label_values(&[state]).observe(polls as f64);
    BATCH_DURATION.with_label_values(&[state]).observe(duration_ms);
}
