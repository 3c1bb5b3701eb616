use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Hub, Mode};

// ---

pub fn router() -> Router<Hub> {
    // ---
    Router::new().route("/mode", get(get_mode).put(set_mode))
}

#[derive(Debug, Serialize)]
struct ModeResponse {
    mode: Mode,
    running: bool,
    devices: usize,
}

#[derive(Debug, Deserialize)]
struct ModeRequest {
    mode: Mode,
}

fn status_of(hub: &Hub) -> ModeResponse {
    ModeResponse {
        mode: hub.mode(),
        running: hub.is_running(),
        devices: hub.snapshot().len(),
    }
}

async fn get_mode(State(hub): State<Hub>) -> Json<ModeResponse> {
    Json(status_of(&hub))
}

/// `PUT /mode` – switch between `off`, `demo` and `live`.
///
/// Switching to demo waits for the seed load so the response already
/// reflects the running simulation.
async fn set_mode(State(hub): State<Hub>, Json(req): Json<ModeRequest>) -> Json<ModeResponse> {
    // ---
    info!("PUT /mode - {} -> {}", hub.mode(), req.mode);
    hub.set_mode(req.mode).await;
    Json(status_of(&hub))
}
