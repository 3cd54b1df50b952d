use crate::state::RelayState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
struct MetricsState {
    registry: Registry,
}

pub fn router(state: Arc<RelayState>, registry: Registry) -> Router {
    let health_routes = Router::new().route("/health", get(health)).with_state(state);
    let metrics_routes = Router::new()
        .route("/metrics", get(get_metrics))
        .with_state(MetricsState { registry });
    health_routes.merge(metrics_routes)
}

async fn health(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    let stored = state.store.count().await.unwrap_or(0);
    let degraded = state.degraded.is_degraded();
    axum::Json(serde_json::json!({
        "status": "ok",
        "stored_events": stored,
        "degraded": degraded,
        "subscriptions": state.subscriptions.count(),
    }))
}

async fn get_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    let autometrics = match autometrics::prometheus_exporter::encode_to_string() {
        Ok(metrics) => metrics,
        Err(err) => {
            tracing::error!(error = %err, "could not collect autometrics");
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:?}"));
        }
    };

    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buf = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buf) {
        tracing::error!(error = %err, "could not encode prometheus metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:?}"));
    }
    let prometheus_text = match String::from_utf8(buf) {
        Ok(text) => text,
        Err(err) => {
            tracing::error!(error = %err, "metrics were not valid utf-8");
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:?}"));
        }
    };

    (StatusCode::OK, format!("{autometrics}{prometheus_text}"))
}
