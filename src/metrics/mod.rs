//! Prometheus counters for the order lifecycle, exported on `/metrics`.

use axum::{http::header, http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register(IntCounterVec::new(
        Opts::new(
            "order_transitions_total",
            "Status transitions by kind and outcome",
        ),
        &["kind", "outcome"],
    ))
});

static CHECKOUTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register(IntCounterVec::new(
        Opts::new("checkouts_total", "Checkout confirmations by outcome"),
        &["outcome"],
    ))
});

static NOTIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register(IntCounterVec::new(
        Opts::new(
            "order_notifications_total",
            "Customer notifications by outcome",
        ),
        &["outcome"],
    ))
});

fn register(counter: prometheus::Result<IntCounterVec>) -> IntCounterVec {
    let counter = counter.expect("metric can be created");
    if let Err(e) = REGISTRY.register(Box::new(counter.clone())) {
        error!("metric registration failed: {}", e);
    }
    counter
}

/// `outcome` is one of applied, noop, stale or rejected.
pub fn record_transition(kind: &str, outcome: &str) {
    TRANSITIONS.with_label_values(&[kind, outcome]).inc();
}

pub fn record_checkout(outcome: &str) {
    CHECKOUTS.with_label_values(&[outcome]).inc();
}

pub fn record_notification(outcome: &str) {
    NOTIFICATIONS.with_label_values(&[outcome]).inc();
}

/// Renders every registered metric in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

pub async fn metrics_handler() -> impl IntoResponse {
    match render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("metrics export failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
