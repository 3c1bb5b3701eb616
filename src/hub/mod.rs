//! Telemetry simulator and distribution hub (EMBP gateway).
//!
//! Sibling modules stay private; callers use the re-exports below.

mod mode;
mod runtime;
mod simulator;
mod subscribers;
mod timers;

pub use mode::{transition, Command, Effect, Mode, Transition};
pub use runtime::{Hub, Subscription, SUBSCRIPTION_BUFFER};
pub use simulator::{SeedTicket, SimParams, Simulator};
pub use subscribers::{BatchListener, DeviceListener, Notification, SubscriptionId};
