//! HTTP gateway (EMBP): merges every sub-router and attaches the hub as
//! shared state so `main.rs` never sees individual endpoints.

use axum::Router;

use crate::Hub;

mod devices;
mod health;
mod mode;

// ---

pub fn router(hub: Hub) -> Router {
    // ---
    Router::new()
        .merge(devices::router())
        .merge(mode::router())
        .merge(health::router())
        .with_state(hub)
}
