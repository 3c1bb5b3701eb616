//! Listener registry and fan-out.
//!
//! The simulator only records [`Notification`]s. The hub turns them into
//! [`Delivery`] items, queues them in production order and dispatches them
//! here after releasing the simulator lock, so a listener may call back
//! into the hub.
//!
//! A listener that panics is caught and logged; delivery to the remaining
//! listeners continues and the listener stays registered.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::models::DeviceTelemetry;

// ---

pub type DeviceListener = Box<dyn FnMut(&DeviceTelemetry) + Send>;
pub type BatchListener = Box<dyn FnMut(&[DeviceTelemetry]) + Send>;

/// Handle returned by `subscribe`; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(super) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Something the simulator wants listeners to hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    // ---
    Device(DeviceTelemetry),
    /// One tick, demo start or push batch. Never empty.
    Batch(Vec<DeviceTelemetry>),
}

/// One queued step for the dispatcher. Registration travels through the
/// same queue as notifications so a replay lands exactly between the
/// events before and after it.
pub enum Delivery {
    // ---
    Notify(Notification),
    AddDevice {
        id: SubscriptionId,
        listener: DeviceListener,
        replay: Vec<DeviceTelemetry>,
    },
    AddBatch {
        id: SubscriptionId,
        listener: BatchListener,
        replay: Vec<DeviceTelemetry>,
    },
    Remove(SubscriptionId),
    Clear,
}

impl From<Notification> for Delivery {
    fn from(n: Notification) -> Self {
        Delivery::Notify(n)
    }
}

#[derive(Default)]
pub struct Subscribers {
    // ---
    device: BTreeMap<SubscriptionId, DeviceListener>,
    batch: BTreeMap<SubscriptionId, BatchListener>,
}

impl Subscribers {
    // ---
    pub fn dispatch(&mut self, delivery: Delivery) {
        // ---
        match delivery {
            Delivery::Notify(Notification::Device(device)) => self.notify(&device),
            Delivery::Notify(Notification::Batch(devices)) => self.notify_batch(&devices),
            Delivery::AddDevice { id, mut listener, replay } => {
                for device in &replay {
                    call_device(id, &mut listener, device);
                }
                self.device.insert(id, listener);
            }
            Delivery::AddBatch { id, mut listener, replay } => {
                if !replay.is_empty() {
                    call_batch(id, &mut listener, &replay);
                }
                self.batch.insert(id, listener);
            }
            Delivery::Remove(id) => {
                let removed = self.device.remove(&id).is_some() || self.batch.remove(&id).is_some();
                debug!(subscription = ?id, removed, "unsubscribe");
            }
            Delivery::Clear => {
                self.device.clear();
                self.batch.clear();
            }
        }
    }

    fn notify(&mut self, device: &DeviceTelemetry) {
        for (id, listener) in self.device.iter_mut() {
            call_device(*id, listener, device);
        }
    }

    fn notify_batch(&mut self, devices: &[DeviceTelemetry]) {
        // ---
        if devices.is_empty() {
            return;
        }
        for (id, listener) in self.batch.iter_mut() {
            call_batch(*id, listener, devices);
        }
    }
}

fn call_device(id: SubscriptionId, listener: &mut DeviceListener, device: &DeviceTelemetry) {
    if catch_unwind(AssertUnwindSafe(|| listener(device))).is_err() {
        warn!(subscription = ?id, device_id = %device.device_id, "device listener panicked");
    }
}

fn call_batch(id: SubscriptionId, listener: &mut BatchListener, devices: &[DeviceTelemetry]) {
    if catch_unwind(AssertUnwindSafe(|| listener(devices))).is_err() {
        warn!(subscription = ?id, batch = devices.len(), "batch listener panicked");
    }
}
