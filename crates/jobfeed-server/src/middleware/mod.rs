//! HTTP middleware: CORS for the dashboard and per-request tracing spans

use axum::http::{header, HeaderValue, Method, Request};
use std::time::Duration;
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    cors::{AllowOrigin, Any, CorsLayer},
    trace::{DefaultOnResponse, MakeSpan, TraceLayer},
    LatencyUnit,
};
use tracing::{Level, Span};

use crate::config::CorsConfig;

const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(3600);

pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
        .max_age(PREFLIGHT_MAX_AGE);

    match parse_origins(&config.allowed_origins) {
        None => base.allow_origin(Any),
        Some(origins) => base
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(config.allow_credentials),
    }
}

/// `None` means any origin; unparsable entries are logged and skipped
fn parse_origins(origins: &[String]) -> Option<Vec<HeaderValue>> {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return None;
    }

    let parsed = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            },
        })
        .collect();

    Some(parsed)
}

/// One `request` span per call, tagged with method and path
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
        )
    }
}

pub fn tracing_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan> {
    TraceLayer::new_for_http()
        .make_span_with(RequestSpan)
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        )
}
