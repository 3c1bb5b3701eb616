//! Deterministic telemetry simulator.
//!
//! The simulator owns the device registry and every pending deadline. It
//! never reads a wall clock: time only moves when the caller invokes
//! [`Simulator::advance_to`], and randomness comes from the injected
//! [`RngCore`]. Listener traffic is recorded as [`Notification`]s and
//! collected with [`Simulator::take_notifications`]. The async
//! [`Hub`](super::Hub) drives one of these from a tokio task and delivers
//! the notifications; tests drive it directly.

use std::collections::BTreeMap;
use std::mem;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, RngCore};
use tracing::{debug, info, warn};

use super::mode::{transition, Command, Effect, Mode};
use super::subscribers::Notification;
use super::timers::{Timer, Timers};
use crate::models::{DeviceStatus, DeviceTelemetry, TelemetryUpdate, TickDelta, UpdateError};

// ---

/// Simulation constants. `Default` gives the dashboard's demo behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct SimParams {
    // ---
    /// Tick interval is drawn from `[tick_min_ms, tick_max_ms)`.
    pub tick_min_ms: u64,
    pub tick_max_ms: u64,

    /// Integer fill change per tick, inclusive on both ends.
    pub fill_delta_min: i32,
    pub fill_delta_max: i32,

    /// Maximum GPS jitter per axis, in degrees.
    pub gps_drift_deg: f64,

    /// Probability that a tick drains one percent of battery.
    pub battery_drain_chance: f64,

    pub offline_min_ms: u64,
    pub offline_max_ms: u64,
    pub restore_min_ms: u64,
    pub restore_max_ms: u64,

    /// Injector retry when the registry is empty.
    pub retry_no_devices_ms: u64,

    /// Injector retry when no device is eligible to go offline.
    pub retry_no_online_ms: u64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            tick_min_ms: 3_000,
            tick_max_ms: 5_000,
            fill_delta_min: -2,
            fill_delta_max: 5,
            gps_drift_deg: 0.0001,
            battery_drain_chance: 0.3,
            offline_min_ms: 120_000,
            offline_max_ms: 240_000,
            restore_min_ms: 60_000,
            restore_max_ms: 90_000,
            retry_no_devices_ms: 60_000,
            retry_no_online_ms: 30_000,
        }
    }
}

/// Proof that a demo start is waiting on seed data.
///
/// Handing it back through [`Simulator::complete_demo`] only takes effect
/// if no other mode change happened in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct SeedTicket {
    epoch: u64,
}

pub struct Simulator<R = StdRng> {
    // ---
    mode: Mode,
    epoch: u64,
    registry: BTreeMap<String, DeviceTelemetry>,
    timers: Timers,
    outbox: Vec<Notification>,
    params: SimParams,
    rng: R,
    now: u64,
    origin: DateTime<Utc>,
    terminated: bool,
}

impl<R: RngCore> Simulator<R> {
    // ---
    /// `origin` is the wall-clock instant that logical time zero maps to;
    /// it only affects record timestamps.
    pub fn new(params: SimParams, rng: R, origin: DateTime<Utc>) -> Self {
        // ---
        Self {
            mode: Mode::Off,
            epoch: 0,
            registry: BTreeMap::new(),
            timers: Timers::default(),
            outbox: Vec::new(),
            params,
            rng,
            now: 0,
            origin,
            terminated: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    /// True while the tick scheduler is armed.
    pub fn is_running(&self) -> bool {
        self.timers.tick_armed()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    // --- mode control

    /// Enter demo mode. Returns a ticket when seed data must be loaded;
    /// `None` when already in demo (or shut down).
    pub fn start_demo(&mut self) -> Option<SeedTicket> {
        self.apply(Command::StartDemo)
    }

    pub fn stop_demo(&mut self) {
        let _ = self.apply(Command::StopDemo);
    }

    pub fn set_live_mode(&mut self) {
        let _ = self.apply(Command::SetLive);
    }

    pub fn stop(&mut self) {
        let _ = self.apply(Command::Stop);
    }

    fn apply(&mut self, command: Command) -> Option<SeedTicket> {
        // ---
        if self.terminated {
            debug!(?command, "ignoring mode command after shutdown");
            return None;
        }

        let t = transition(self.mode, command);
        if t.is_noop(self.mode) {
            return None;
        }

        info!(from = %self.mode, to = %t.next, ?command, "mode transition");
        self.mode = t.next;
        self.epoch += 1;

        let mut ticket = None;
        for effect in t.effects {
            match effect {
                Effect::CancelDemoTimers => self.timers.cancel_all(),
                Effect::LoadSeed => ticket = Some(SeedTicket { epoch: self.epoch }),
            }
        }
        ticket
    }

    /// Finish a demo start with the loaded seed devices.
    ///
    /// Devices already in the registry keep their current state. Every
    /// registered device is announced once, then the tick scheduler and
    /// the offline injector are armed. Returns false when the ticket is
    /// stale and nothing was done.
    pub fn complete_demo(&mut self, ticket: SeedTicket, devices: Vec<DeviceTelemetry>) -> bool {
        // ---
        if self.terminated || self.mode != Mode::Demo || ticket.epoch != self.epoch {
            debug!(
                ticket = ticket.epoch,
                current = self.epoch,
                "discarding seed load for superseded demo start"
            );
            return false;
        }

        let at = self.timestamp();
        for device in devices {
            let device = device.normalized(at);
            if device.device_id.is_empty() || self.registry.contains_key(&device.device_id) {
                continue;
            }
            self.registry.insert(device.device_id.clone(), device);
        }

        let announced: Vec<DeviceTelemetry> = self.registry.values().cloned().collect();
        for device in &announced {
            self.notify(device.clone());
        }
        self.notify_batch(announced.clone());

        let tick_at = self.now + self.tick_interval();
        let injector_at = self.now + self.draw_ms(self.params.offline_min_ms, self.params.offline_max_ms);
        self.timers.arm_tick(tick_at);
        self.timers.arm_injector(injector_at);

        info!(devices = announced.len(), tick_at, injector_at, "demo simulation running");
        true
    }

    /// Full teardown: timers, undelivered notifications and registry are
    /// dropped and every later call becomes a no-op.
    pub fn shutdown(&mut self) {
        // ---
        if self.terminated {
            return;
        }
        self.timers.cancel_all();
        self.outbox.clear();
        self.registry.clear();
        self.mode = Mode::Off;
        self.epoch += 1;
        self.terminated = true;
        info!("telemetry simulator shut down");
    }

    /// Hand over everything recorded for listeners since the last call,
    /// in production order.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        mem::take(&mut self.outbox)
    }

    fn notify(&mut self, device: DeviceTelemetry) {
        self.outbox.push(Notification::Device(device));
    }

    fn notify_batch(&mut self, devices: Vec<DeviceTelemetry>) {
        if !devices.is_empty() {
            self.outbox.push(Notification::Batch(devices));
        }
    }

    // --- time

    /// Move the logical clock forward to `now`, firing every deadline that
    /// falls due on the way in deadline order. Going backwards is ignored.
    pub fn advance_to(&mut self, now: u64) {
        // ---
        while let Some((at, timer)) = self.timers.pop_due(now) {
            self.now = self.now.max(at);
            self.fire(timer);
        }
        self.now = self.now.max(now);
    }

    fn fire(&mut self, timer: Timer) {
        // ---
        match timer {
            Timer::Tick => {
                self.tick();
                if self.mode == Mode::Demo {
                    let next = self.now + self.tick_interval();
                    self.timers.arm_tick(next);
                }
            }
            Timer::Injector => {
                let delay = self.inject_offline();
                if self.mode == Mode::Demo {
                    self.timers.arm_injector(self.now + delay);
                }
            }
            Timer::Restore(device_id) => self.restore_online(&device_id),
        }
    }

    fn timestamp(&self) -> DateTime<Utc> {
        let offset = Duration::milliseconds(i64::try_from(self.now).unwrap_or(i64::MAX / 2));
        self.origin
            .checked_add_signed(offset)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn draw_ms(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            min
        } else {
            self.rng.gen_range(min..max)
        }
    }

    fn tick_interval(&mut self) -> u64 {
        self.draw_ms(self.params.tick_min_ms, self.params.tick_max_ms)
    }

    // --- simulation

    fn draw_delta(&mut self) -> TickDelta {
        // ---
        let p = &self.params;
        let (lo, hi) = (p.fill_delta_min, p.fill_delta_max.max(p.fill_delta_min));
        let drift = p.gps_drift_deg.abs();
        let chance = if p.battery_drain_chance.is_nan() {
            0.0
        } else {
            p.battery_drain_chance.clamp(0.0, 1.0)
        };

        let fill = f64::from(self.rng.gen_range(lo..=hi));
        let (lat, lng) = if drift > 0.0 && drift.is_finite() {
            (self.rng.gen_range(-drift..drift), self.rng.gen_range(-drift..drift))
        } else {
            (0.0, 0.0)
        };
        let battery = if self.rng.gen_bool(chance) { -1.0 } else { 0.0 };

        TickDelta { fill, lat, lng, battery }
    }

    /// Advance every device by one simulation step and notify.
    ///
    /// Returns the updated records. Only demo mode simulates; outside it,
    /// or with an empty registry, nothing happens.
    pub fn tick(&mut self) -> Vec<DeviceTelemetry> {
        // ---
        if self.mode != Mode::Demo {
            debug!(mode = %self.mode, "tick ignored outside demo mode");
            return Vec::new();
        }
        if self.registry.is_empty() {
            debug!("tick skipped, no devices registered");
            return Vec::new();
        }

        let at = self.timestamp();
        let ids: Vec<String> = self.registry.keys().cloned().collect();
        let mut updated = Vec::with_capacity(ids.len());

        for id in ids {
            let delta = self.draw_delta();
            let Some(current) = self.registry.get(&id) else {
                continue;
            };
            let next = current.apply(delta, at);
            self.registry.insert(id, next.clone());
            self.notify(next.clone());
            updated.push(next);
        }

        self.notify_batch(updated.clone());
        debug!(devices = updated.len(), now = self.now, "tick");
        updated
    }

    /// Force one random online device offline and schedule its restore.
    ///
    /// Returns the delay until the injector should run again.
    fn inject_offline(&mut self) -> u64 {
        // ---
        if self.registry.is_empty() {
            return self.params.retry_no_devices_ms;
        }

        let candidates: Vec<String> = self
            .registry
            .values()
            .filter(|d| d.is_online() && !self.timers.has_restore(&d.device_id))
            .map(|d| d.device_id.clone())
            .collect();
        if candidates.is_empty() {
            return self.params.retry_no_online_ms;
        }

        let pick = candidates[self.rng.gen_range(0..candidates.len())].clone();
        let restore_at = self.now + self.draw_ms(self.params.restore_min_ms, self.params.restore_max_ms);
        self.set_status(&pick, DeviceStatus::Offline);
        self.timers.arm_restore(&pick, restore_at);
        info!(device_id = %pick, restore_at, "simulated device outage");

        self.draw_ms(self.params.offline_min_ms, self.params.offline_max_ms)
    }

    fn restore_online(&mut self, device_id: &str) {
        // ---
        let offline = self
            .registry
            .get(device_id)
            .is_some_and(|d| d.status == DeviceStatus::Offline);
        if offline {
            self.set_status(device_id, DeviceStatus::Online);
            info!(device_id, "simulated device back online");
        }
    }

    fn set_status(&mut self, device_id: &str, status: DeviceStatus) {
        // ---
        let at = self.timestamp();
        if let Some(device) = self.registry.get_mut(device_id) {
            device.status = status;
            device.timestamp = at;
            let device = device.clone();
            self.notify(device);
        }
    }

    // --- ingestion

    fn ingest(&mut self, update: &TelemetryUpdate) -> Result<DeviceTelemetry, UpdateError> {
        // ---
        if self.terminated {
            return Err(UpdateError::ShutDown);
        }

        let existing = update
            .device_id
            .as_deref()
            .map(str::trim)
            .and_then(|id| self.registry.get(id));
        let record = update.resolve(existing, self.timestamp()).inspect_err(|e| {
            warn!(error = %e, "dropping telemetry update");
        })?;

        if self.timers.cancel_restore(&record.device_id) {
            debug!(device_id = %record.device_id, "pushed update supersedes simulated outage");
        }
        self.registry.insert(record.device_id.clone(), record.clone());
        self.notify(record.clone());
        Ok(record)
    }

    /// Upsert one externally reported record and notify listeners.
    ///
    /// Invalid payloads are logged and returned as errors; the registry is
    /// left untouched.
    pub fn push_update(&mut self, update: &TelemetryUpdate) -> Result<DeviceTelemetry, UpdateError> {
        self.ingest(update)
    }

    /// Apply several updates, then hand every accepted record to batch
    /// listeners in one call.
    pub fn push_batch(&mut self, updates: &[TelemetryUpdate]) -> Vec<Result<DeviceTelemetry, UpdateError>> {
        // ---
        let results: Vec<_> = updates.iter().map(|u| self.ingest(u)).collect();
        let accepted: Vec<DeviceTelemetry> = results.iter().filter_map(|r| r.as_ref().ok().cloned()).collect();
        self.notify_batch(accepted);
        results
    }

    // --- reads

    /// Current records ordered by device id.
    pub fn snapshot(&self) -> Vec<DeviceTelemetry> {
        self.registry.values().cloned().collect()
    }

    pub fn device(&self, device_id: &str) -> Option<DeviceTelemetry> {
        self.registry.get(device_id).cloned()
    }
}
