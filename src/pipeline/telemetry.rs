//! Pipeline telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct PipelineInstruments {
    requests: Counter<u64>,
    duration_seconds: Histogram<f64>,
    rows_returned: Histogram<u64>,
    cache_lookups: Counter<u64>,
    estimated_weight: Histogram<u64>,
    split_chunks: Histogram<u64>,
    dispatch_attempts: Counter<u64>,
    partial_requests: Counter<u64>,
}

fn instruments() -> &'static PipelineInstruments {
    static INSTRUMENTS: OnceLock<PipelineInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("strata.pipeline");
        PipelineInstruments {
            requests: meter
                .u64_counter("strata.pipeline.requests")
                .with_description("Total pipeline requests by outcome")
                .init(),
            duration_seconds: meter
                .f64_histogram("strata.pipeline.duration")
                .with_description("Pipeline end-to-end latency")
                .with_unit("s")
                .init(),
            rows_returned: meter
                .u64_histogram("strata.pipeline.rows_returned")
                .with_description("Rows returned per request")
                .init(),
            cache_lookups: meter
                .u64_counter("strata.pipeline.cache.lookups")
                .with_description("Response cache lookups by outcome")
                .init(),
            estimated_weight: meter
                .u64_histogram("strata.pipeline.weight")
                .with_description("Estimated weight of requests reaching the weight check")
                .init(),
            split_chunks: meter
                .u64_histogram("strata.pipeline.split.chunks")
                .with_description("Sub-queries produced per split backend query")
                .init(),
            dispatch_attempts: meter
                .u64_counter("strata.pipeline.dispatch.attempts")
                .with_description("Backend dispatch attempts by outcome")
                .init(),
            partial_requests: meter
                .u64_counter("strata.pipeline.partial_data")
                .with_description("Requests touching unavailable data by policy outcome")
                .init(),
        }
    })
}

pub struct RequestMetrics {
    pub outcome: &'static str,
    pub error_class: Option<&'static str>,
    pub duration_seconds: f64,
    pub rows_returned: u64,
}

pub fn record_request(metrics: RequestMetrics) {
    let i = instruments();
    let mut attrs = vec![KeyValue::new("outcome", metrics.outcome)];
    if let Some(error_class) = metrics.error_class {
        attrs.push(KeyValue::new("error.class", error_class));
    }

    i.requests.add(1, &attrs);
    i.duration_seconds.record(metrics.duration_seconds, &attrs);
    i.rows_returned.record(metrics.rows_returned, &attrs);
}

pub fn record_cache_lookup(outcome: &'static str) {
    instruments()
        .cache_lookups
        .add(1, &[KeyValue::new("outcome", outcome)]);
}

pub fn record_weight(weight: u64, rejected: bool) {
    instruments()
        .estimated_weight
        .record(weight, &[KeyValue::new("rejected", rejected)]);
}

pub fn record_split(chunks: u64) {
    instruments().split_chunks.record(chunks, &[]);
}

pub fn record_dispatch(outcome: &'static str) {
    instruments()
        .dispatch_attempts
        .add(1, &[KeyValue::new("outcome", outcome)]);
}

pub fn record_partial(outcome: &'static str) {
    instruments()
        .partial_requests
        .add(1, &[KeyValue::new("outcome", outcome)]);
}
