//! Async telemetry hub.
//!
//! [`Hub`] wraps a [`Simulator`] in a mutex and runs one tokio driver task
//! that sleeps until the simulator's earliest deadline, then advances the
//! logical clock to the elapsed wall time. Every call that may re-arm a
//! timer wakes the driver so it can recompute its sleep.
//!
//! Notifications leave the simulator while its lock is held and are queued
//! in production order. Whichever caller finds the dispatcher idle drains
//! the queue with no simulator lock held, so listeners may call back into
//! the hub. Calls made from inside a listener are queued and delivered by
//! the same drain once that listener returns.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::mode::Mode;
use super::simulator::{SimParams, Simulator};
use super::subscribers::{BatchListener, Delivery, DeviceListener, Subscribers, SubscriptionId};
use crate::models::{DeviceTelemetry, TelemetryUpdate, UpdateError};
use crate::seed::{self, SeedSource};

// ---

/// Updates a [`Subscription`] buffers before it starts dropping them.
pub const SUBSCRIPTION_BUFFER: usize = 1024;

struct Inner {
    // ---
    sim: Mutex<Simulator>,
    queue: Mutex<VecDeque<Delivery>>,
    listeners: Mutex<Subscribers>,
    next_subscription: AtomicU64,
    wake: Arc<Notify>,
    origin: Instant,
    seed: SeedSource,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    // ---
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Called with the simulator lock held so queue order matches
    /// production order.
    fn enqueue(&self, sim: &mut Simulator, extra: Option<Delivery>) {
        // ---
        let mut queue = self.queue.lock();
        queue.extend(sim.take_notifications().into_iter().map(Delivery::from));
        queue.extend(extra);
    }

    /// Deliver everything queued. Returns at once when another caller, or
    /// an outer frame of this one, is already dispatching; that caller
    /// picks up whatever was queued here.
    fn flush(&self) {
        // ---
        loop {
            let Some(mut listeners) = self.listeners.try_lock() else {
                return;
            };
            loop {
                let next = self.queue.lock().pop_front();
                let Some(delivery) = next else { break };
                listeners.dispatch(delivery);
            }
            drop(listeners);

            let idle = self.queue.lock().is_empty();
            if idle {
                return;
            }
        }
    }

    fn remove(&self, id: SubscriptionId) {
        // ---
        {
            let mut sim = self.sim.lock();
            self.enqueue(&mut sim, Some(Delivery::Remove(id)));
        }
        self.flush();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.get_mut().take() {
            handle.abort();
        }
    }
}

/// Cloneable handle to one telemetry hub. Clones share state.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<Inner>,
}

impl Hub {
    // ---
    /// Build a hub and spawn its driver task. Must be called from within
    /// a tokio runtime. `rng_seed` fixes the simulation for reproducible
    /// demos; `None` seeds from the OS.
    pub fn new(params: SimParams, seed: SeedSource, rng_seed: Option<u64>) -> Self {
        // ---
        let rng = match rng_seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self::with_simulator(Simulator::new(params, rng, Utc::now()), seed)
    }

    pub fn with_simulator(sim: Simulator, seed: SeedSource) -> Self {
        // ---
        let wake = Arc::new(Notify::new());
        let inner = Arc::new(Inner {
            sim: Mutex::new(sim),
            queue: Mutex::new(VecDeque::new()),
            listeners: Mutex::new(Subscribers::default()),
            next_subscription: AtomicU64::new(1),
            wake: Arc::clone(&wake),
            origin: Instant::now(),
            seed,
            driver: Mutex::new(None),
        });

        let handle = tokio::spawn(drive(Arc::downgrade(&inner), wake));
        *inner.driver.lock() = Some(handle);

        Self { inner }
    }

    /// Run `f` against the simulator after catching it up to wall time,
    /// deliver what it produced, then wake the driver.
    fn with_sim<T>(&self, f: impl FnOnce(&mut Simulator) -> T) -> T {
        // ---
        let out = {
            let mut sim = self.inner.sim.lock();
            sim.advance_to(self.inner.now_ms());
            let out = f(&mut *sim);
            self.inner.enqueue(&mut sim, None);
            out
        };
        self.inner.flush();
        self.inner.wake.notify_one();
        out
    }

    // --- mode control

    /// Enter demo mode: load seed data (never fails, see [`seed::load`]),
    /// announce every device and start ticking. No-op when already in demo.
    pub async fn start_demo(&self) {
        // ---
        let Some(ticket) = self.with_sim(|sim| sim.start_demo()) else {
            return;
        };
        let devices = seed::load(&self.inner.seed).await;
        if !self.with_sim(|sim| sim.complete_demo(ticket, devices)) {
            debug!("demo start superseded while loading seed data");
        }
    }

    pub fn stop_demo(&self) {
        self.with_sim(|sim| sim.stop_demo());
    }

    pub fn set_live_mode(&self) {
        self.with_sim(|sim| sim.set_live_mode());
    }

    /// Go to `off` from any mode. Safe to call repeatedly.
    pub fn stop(&self) {
        self.with_sim(|sim| sim.stop());
    }

    pub async fn set_mode(&self, mode: Mode) {
        // ---
        match mode {
            Mode::Off => self.stop(),
            Mode::Demo => self.start_demo().await,
            Mode::Live => self.set_live_mode(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.inner.sim.lock().mode()
    }

    pub fn is_running(&self) -> bool {
        self.inner.sim.lock().is_running()
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.sim.lock().pending_timers()
    }

    /// Full teardown: clears devices and listeners, cancels every timer and
    /// stops the driver task. Later calls are no-ops.
    pub fn shutdown(&self) {
        // ---
        {
            let mut sim = self.inner.sim.lock();
            sim.shutdown();
            self.inner.enqueue(&mut sim, Some(Delivery::Clear));
        }
        self.inner.flush();
        if let Some(handle) = self.inner.driver.lock().take() {
            handle.abort();
        }
        info!("telemetry hub shut down");
    }

    // --- ingestion

    pub fn push_update(&self, update: &TelemetryUpdate) -> Result<DeviceTelemetry, UpdateError> {
        self.with_sim(|sim| sim.push_update(update))
    }

    /// Push a raw JSON payload as received from a device bridge.
    pub fn push_json(&self, raw: &str) -> Result<DeviceTelemetry, UpdateError> {
        // ---
        let update = TelemetryUpdate::from_json(raw).inspect_err(|e| {
            warn!(error = %e, "dropping unparseable telemetry payload");
        })?;
        self.push_update(&update)
    }

    pub fn push_batch(&self, updates: &[TelemetryUpdate]) -> Vec<Result<DeviceTelemetry, UpdateError>> {
        self.with_sim(|sim| sim.push_batch(updates))
    }

    // --- subscriptions and reads

    /// Subscribe through a channel holding up to [`SUBSCRIPTION_BUFFER`]
    /// updates. The current snapshot is queued before this returns;
    /// dropping the [`Subscription`] unsubscribes.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with_capacity(SUBSCRIPTION_BUFFER)
    }

    /// Like [`Hub::subscribe`] with a custom buffer. A reader more than
    /// `capacity` updates behind loses the newest ones until it catches
    /// up; the first loss of each overflow is logged.
    pub fn subscribe_with_capacity(&self, capacity: usize) -> Subscription {
        // ---
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut overflowing = false;
        let listener: DeviceListener = Box::new(move |device: &DeviceTelemetry| {
            match tx.try_send(device.clone()) {
                Ok(()) => overflowing = false,
                Err(TrySendError::Full(dropped)) => {
                    if !overflowing {
                        warn!(device_id = %dropped.device_id, capacity, "subscriber lagging, dropping updates");
                        overflowing = true;
                    }
                }
                Err(TrySendError::Closed(_)) => {}
            }
        });
        let id = self.subscribe_with(listener);
        Subscription {
            rx,
            id,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Register a callback listener. It receives the current snapshot, then
    /// every later single-device update. `None` after shutdown.
    pub fn subscribe_with(&self, listener: DeviceListener) -> Option<SubscriptionId> {
        self.register(|id, replay| Delivery::AddDevice { id, listener, replay })
    }

    /// Register a listener for whole batches (one per tick, demo start or
    /// push batch). A non-empty snapshot is replayed as a first batch.
    pub fn subscribe_bulk(&self, listener: BatchListener) -> Option<SubscriptionId> {
        self.register(|id, replay| Delivery::AddBatch { id, listener, replay })
    }

    /// The registration is queued behind everything produced so far, with
    /// the snapshot taken under the same lock as its replay.
    fn register(
        &self,
        add: impl FnOnce(SubscriptionId, Vec<DeviceTelemetry>) -> Delivery,
    ) -> Option<SubscriptionId> {
        // ---
        let id = {
            let mut sim = self.inner.sim.lock();
            sim.advance_to(self.inner.now_ms());
            if sim.is_terminated() {
                self.inner.enqueue(&mut sim, None);
                None
            } else {
                let raw = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
                let id = SubscriptionId::new(raw);
                let replay = sim.snapshot();
                self.inner.enqueue(&mut sim, Some(add(id, replay)));
                Some(id)
            }
        };
        self.inner.flush();
        self.inner.wake.notify_one();
        id
    }

    /// Stop delivering to `id`. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.remove(id);
    }

    pub fn snapshot(&self) -> Vec<DeviceTelemetry> {
        self.with_sim(|sim| sim.snapshot())
    }

    pub fn device(&self, device_id: &str) -> Option<DeviceTelemetry> {
        self.with_sim(|sim| sim.device(device_id))
    }
}

/// Channel-backed subscription returned by [`Hub::subscribe`].
pub struct Subscription {
    // ---
    rx: mpsc::Receiver<DeviceTelemetry>,
    id: Option<SubscriptionId>,
    hub: Weak<Inner>,
}

impl Subscription {
    // ---
    /// Next update; `None` once unsubscribed or the hub is gone.
    pub async fn recv(&mut self) -> Option<DeviceTelemetry> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<DeviceTelemetry> {
        self.rx.try_recv().ok()
    }

    /// Everything already queued, without waiting.
    pub fn drain(&mut self) -> Vec<DeviceTelemetry> {
        std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
    }

    /// False when the hub refused the subscription (after shutdown).
    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let (Some(id), Some(inner)) = (self.id.take(), self.hub.upgrade()) {
            inner.remove(id);
        }
    }
}

async fn drive(hub: Weak<Inner>, wake: Arc<Notify>) {
    // ---
    loop {
        let notified = wake.notified();

        let deadline = {
            let Some(inner) = hub.upgrade() else { break };
            let sim = inner.sim.lock();
            if sim.is_terminated() {
                break;
            }
            let next = sim.next_deadline();
            next.map(|ms| inner.origin + Duration::from_millis(ms))
        };

        match deadline {
            Some(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {
                        let Some(inner) = hub.upgrade() else { break };
                        {
                            let mut sim = inner.sim.lock();
                            sim.advance_to(inner.now_ms());
                            inner.enqueue(&mut sim, None);
                        }
                        inner.flush();
                    }
                    _ = notified => {}
                }
            }
            None => notified.await,
        }
    }
    debug!("telemetry driver stopped");
}
