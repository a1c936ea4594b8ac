use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::gateway_util::AppState;

pub const REFINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A handler for a simple liveness check
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "gateway": "ok" }))
}

/// A handler for a status check that also exercises the key-value store
pub async fn status_handler(State(app_state): AppState) -> Json<Value> {
    let kv_round_trip = app_state.kv.ping().await;
    Json(json!({
        "status": "ok",
        "version": REFINE_VERSION,
        "kv": if app_state.kv.is_connected() { "connected" } else { "fallback" },
        "kvRoundTrip": kv_round_trip,
        "model": app_state.completion.model_name(),
        "rateLimiter": app_state.rate_limiter.metrics().get_stats(),
    }))
}
