//! Dustbin telemetry simulator and live-update hub.
//!
//! The library exposes the hub (`hub`), its data model (`models`), seed
//! loading (`seed`), configuration (`config`) and the HTTP surface
//! (`routes`). The `swachhpath-telemetry` binary composes them.
//!
//! Modules follow the Explicit Module Boundary Pattern (EMBP): each
//! directory module is a gateway that re-exports what siblings need, and
//! route handlers import shared types from the crate root only.

pub mod config;
pub mod hub;
pub mod models;
pub mod routes;
pub mod seed;

pub use config::Config;
pub use hub::{Hub, Mode, SimParams, Subscription};
pub use models::{DeviceStatus, DeviceTelemetry, TelemetryUpdate, UpdateError};
pub use seed::SeedSource;
