//! Prometheus metrics for the vault server.
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus
//! scraping; restrict it to scraper IPs at the infrastructure level.

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static HTTP_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new("macaroon_http_duration", "Duration of HTTP requests"),
        &["method", "path"],
    )
    .expect("metric creation failed")
});

pub static REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("macaroon_requests_total", "How many HTTP requests processed"),
        &["method", "path", "code"],
    )
    .expect("metric creation failed")
});

pub static AUTH_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "macaroon_auth_requests_total",
            "How many HTTP requests processed per user",
        ),
        &["identifier", "method", "success"],
    )
    .expect("metric creation failed")
});

pub static BOOT_SECRETS_LOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "macaroon_boot_secrets_loaded_total",
        "Secrets loaded into the index at boot",
    )
    .expect("metric creation failed")
});

pub static BOOT_SECRETS_SKIPPED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "macaroon_boot_secrets_skipped_total",
            "Secrets skipped at boot by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static RECOVERED_PANICS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "macaroon_recovered_panics_total",
        "Handler panics recovered by the middleware",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent; subsequent calls are no-ops so tests and embedders can call
/// it freely.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(HTTP_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(AUTH_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BOOT_SECRETS_LOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BOOT_SECRETS_SKIPPED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RECOVERED_PANICS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Middleware recording request duration and status counts.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let timer = HTTP_DURATION
        .with_label_values(&[method.as_str(), path.as_str()])
        .start_timer();
    let response = next.run(req).await;
    timer.observe_duration();

    REQUESTS
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();
    response
}

/// Record a successfully authenticated, admitted request.
pub fn audit_log(identifier: &str, addr: &str, message: &str, method: &str) {
    tracing::info!(identifier, addr, method, "[AUDIT LOG] {message}");
    AUTH_REQUESTS
        .with_label_values(&[identifier, method, "true"])
        .inc();
}

/// Record a rejected or failed request.
pub fn failure_log(identifier: &str, addr: &str, message: &str, method: &str) {
    tracing::info!(identifier, addr, method, "[FAILURE LOG] {message}");
    AUTH_REQUESTS
        .with_label_values(&[identifier, method, "false"])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_registration() {
        // panics if any metric creation failed
        register_metrics();
        register_metrics();
    }
}
