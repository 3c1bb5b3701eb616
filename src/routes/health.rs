// src/routes/health.rs
//! Liveness endpoint for the telemetry service.
//!
//! Used by container orchestrators and CI to confirm the process answers
//! HTTP. It reports the hub mode and device count alongside the static
//! `ok`, both read from memory without waiting on anything.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::{Hub, Mode};

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    mode: Mode,
    devices: usize,
}

/// Handle `GET /health`.
async fn health(State(hub): State<Hub>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        mode: hub.mode(),
        devices: hub.snapshot().len(),
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<Hub> {
    Router::new().route("/health", get(health))
}
