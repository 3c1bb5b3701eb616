//! Pending deadlines on the simulator's logical clock (milliseconds).

use std::collections::BTreeMap;

// ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    // ---
    Tick,
    Injector,
    Restore(String),
}

/// Every deadline the demo mode can have outstanding.
///
/// There is at most one tick, one injector and one restore per device.
#[derive(Debug, Default)]
pub struct Timers {
    // ---
    tick: Option<u64>,
    injector: Option<u64>,
    restores: BTreeMap<String, u64>,
}

impl Timers {
    // ---
    pub fn arm_tick(&mut self, at: u64) {
        self.tick = Some(at);
    }

    pub fn arm_injector(&mut self, at: u64) {
        self.injector = Some(at);
    }

    /// Returns false, leaving the existing deadline alone, when the device
    /// already has a restore pending.
    pub fn arm_restore(&mut self, device_id: &str, at: u64) -> bool {
        // ---
        if self.restores.contains_key(device_id) {
            return false;
        }
        self.restores.insert(device_id.to_string(), at);
        true
    }

    pub fn has_restore(&self, device_id: &str) -> bool {
        self.restores.contains_key(device_id)
    }

    pub fn cancel_restore(&mut self, device_id: &str) -> bool {
        self.restores.remove(device_id).is_some()
    }

    pub fn cancel_all(&mut self) {
        // ---
        self.tick = None;
        self.injector = None;
        self.restores.clear();
    }

    pub fn tick_armed(&self) -> bool {
        self.tick.is_some()
    }

    pub fn pending(&self) -> usize {
        usize::from(self.tick.is_some()) + usize::from(self.injector.is_some()) + self.restores.len()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        // ---
        self.tick
            .into_iter()
            .chain(self.injector)
            .chain(self.restores.values().copied())
            .min()
    }

    /// Remove and return the earliest timer due at or before `now`.
    ///
    /// Equal deadlines fire tick first, then the injector, then restores in
    /// device-id order.
    pub fn pop_due(&mut self, now: u64) -> Option<(u64, Timer)> {
        // ---
        let mut best: Option<(u64, Timer)> = None;
        let mut consider = |at: u64, timer: Timer| {
            if at <= now && best.as_ref().map_or(true, |(b, _)| at < *b) {
                best = Some((at, timer));
            }
        };

        if let Some(at) = self.tick {
            consider(at, Timer::Tick);
        }
        if let Some(at) = self.injector {
            consider(at, Timer::Injector);
        }
        for (id, at) in &self.restores {
            consider(*at, Timer::Restore(id.clone()));
        }

        match &best {
            Some((_, Timer::Tick)) => self.tick = None,
            Some((_, Timer::Injector)) => self.injector = None,
            Some((_, Timer::Restore(id))) => {
                self.restores.remove(id);
            }
            None => {}
        }
        best
    }
}
