//! HTTP request telemetry
//!
//! Handlers tag their responses with [`ResponseTags`]; the middleware turns
//! those tags into metric attributes and a single log line per request.

use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

/// Outcome details a handler attaches to its response as an extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseTags {
    pub error_class: Option<&'static str>,
    pub partial: bool,
}

struct GatewayHttpInstruments {
    requests: Counter<u64>,
    latency: Histogram<f64>,
    failures: Counter<u64>,
    partial: Counter<u64>,
}

fn instruments() -> &'static GatewayHttpInstruments {
    static INSTRUMENTS: OnceLock<GatewayHttpInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("strata.api.http");
        GatewayHttpInstruments {
            requests: meter
                .u64_counter("strata.http.requests")
                .with_description("Requests answered by the gateway HTTP surface")
                .init(),
            latency: meter
                .f64_histogram("strata.http.latency")
                .with_description("Time from request arrival to response")
                .with_unit("s")
                .init(),
            failures: meter
                .u64_counter("strata.http.failures")
                .with_description("Requests answered with an error, by error class")
                .init(),
            partial: meter
                .u64_counter("strata.http.partial_responses")
                .with_description("Data responses that carried a partial data marker")
                .init(),
        }
    })
}

fn route_of(req: &Request<axum::body::Body>) -> String {
    req.extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

pub async fn track_requests(req: Request<axum::body::Body>, next: Next) -> Response {
    let started = Instant::now();
    let route = route_of(&req);
    let method = req.method().clone();

    let span = info_span!("gateway.http", http.method = %method, http.route = %route);
    let response = next.run(req).instrument(span).await;

    let status = response.status();
    let tags = response
        .extensions()
        .get::<ResponseTags>()
        .copied()
        .unwrap_or_default();
    let elapsed = started.elapsed();

    let route_attr = KeyValue::new("http.route", route.clone());
    let instruments = instruments();
    instruments.requests.add(
        1,
        &[
            route_attr.clone(),
            KeyValue::new("http.status_code", i64::from(status.as_u16())),
        ],
    );
    instruments
        .latency
        .record(elapsed.as_secs_f64(), &[route_attr.clone()]);
    if tags.partial {
        instruments.partial.add(1, &[route_attr.clone()]);
    }

    if status.is_client_error() || status.is_server_error() {
        let class = tags.error_class.unwrap_or("unclassified");
        instruments
            .failures
            .add(1, &[route_attr, KeyValue::new("error.class", class)]);
        if status.is_server_error() {
            warn!(%method, %route, status = status.as_u16(), class, ?elapsed, "request failed");
        } else {
            debug!(%method, %route, status = status.as_u16(), class, ?elapsed, "request rejected");
        }
    } else {
        debug!(%method, %route, status = status.as_u16(), partial = tags.partial, ?elapsed, "request served");
    }

    response
}

