use axum::{
    extract::Path, extract::State, http::StatusCode, response::IntoResponse, routing::get,
    routing::post, Json, Router,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{DeviceTelemetry, Hub, TelemetryUpdate};

// ---

pub fn router() -> Router<Hub> {
    // ---
    Router::new()
        .route("/devices", get(list_devices))
        .route("/devices/update", post(push_update))
        .route("/devices/batch", post(push_batch))
        .route("/devices/{device_id}", get(get_device))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
        .into_response()
}

async fn list_devices(State(hub): State<Hub>) -> Json<Vec<DeviceTelemetry>> {
    // ---
    let snapshot = hub.snapshot();
    debug!("GET /devices - {} devices", snapshot.len());
    Json(snapshot)
}

async fn get_device(Path(device_id): Path<String>, State(hub): State<Hub>) -> impl IntoResponse {
    // ---
    match hub.device(&device_id) {
        Some(device) => (StatusCode::OK, Json(device)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("unknown device {device_id}")),
    }
}

/// `POST /devices/update` – ingestion path for a device bridge.
///
/// The body is taken as raw text so malformed payloads come back as a
/// 422 with the hub's own error message instead of an extractor rejection.
async fn push_update(State(hub): State<Hub>, body: String) -> impl IntoResponse {
    // ---
    match hub.push_json(&body) {
        Ok(record) => {
            debug!("POST /devices/update - accepted {}", record.device_id);
            (StatusCode::ACCEPTED, Json(record)).into_response()
        }
        Err(e) => error_response(StatusCode::UNPROCESSABLE_ENTITY, e),
    }
}

#[derive(Debug, Serialize)]
struct Rejected {
    index: usize,
    error: String,
}

#[derive(Debug, Serialize)]
struct BatchResponse {
    accepted: Vec<DeviceTelemetry>,
    rejected: Vec<Rejected>,
}

/// `POST /devices/batch` – array of updates; invalid entries are reported
/// by index and do not block the rest.
async fn push_batch(State(hub): State<Hub>, body: String) -> impl IntoResponse {
    // ---
    let updates: Vec<TelemetryUpdate> = match serde_json::from_str(&body) {
        Ok(updates) => updates,
        Err(e) => {
            warn!("POST /devices/batch - unparseable body: {}", e);
            return error_response(StatusCode::UNPROCESSABLE_ENTITY, format!("malformed payload: {e}"));
        }
    };

    let mut response = BatchResponse {
        accepted: Vec::new(),
        rejected: Vec::new(),
    };
    for (index, result) in hub.push_batch(&updates).into_iter().enumerate() {
        match result {
            Ok(record) => response.accepted.push(record),
            Err(e) => response.rejected.push(Rejected {
                index,
                error: e.to_string(),
            }),
        }
    }

    info!(
        "POST /devices/batch - {} accepted, {} rejected",
        response.accepted.len(),
        response.rejected.len()
    );
    (StatusCode::ACCEPTED, Json(response)).into_response()
}
