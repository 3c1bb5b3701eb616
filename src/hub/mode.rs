//! Hub operating modes as an explicit state machine.
//!
//! [`transition`] is pure: it maps the current mode and a command to the
//! next mode plus the effects the simulator must carry out. Nothing here
//! touches timers directly, so every edge is testable without a clock.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    // ---
    #[default]
    Off,
    Demo,
    Live,
}

/// A request to change mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    // ---
    StartDemo,
    StopDemo,
    SetLive,
    Stop,
}

/// Side effects of a transition, in the order they must be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    // ---
    /// Drop the tick deadline, the injector deadline and every restore.
    CancelDemoTimers,
    /// Load the seed dataset; ticking starts once it lands.
    LoadSeed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    // ---
    pub next: Mode,
    pub effects: Vec<Effect>,
}

impl Transition {
    // ---
    fn stay(mode: Mode) -> Self {
        Self {
            next: mode,
            effects: Vec::new(),
        }
    }

    /// True when nothing changes at all.
    pub fn is_noop(&self, from: Mode) -> bool {
        self.next == from && self.effects.is_empty()
    }
}

pub fn transition(from: Mode, command: Command) -> Transition {
    // ---
    use Command::*;
    use Effect::*;

    match (from, command) {
        (Mode::Demo, StartDemo) => Transition::stay(Mode::Demo),
        (_, StartDemo) => Transition {
            next: Mode::Demo,
            effects: vec![CancelDemoTimers, LoadSeed],
        },
        (Mode::Demo, StopDemo) => Transition {
            next: Mode::Off,
            effects: vec![CancelDemoTimers],
        },
        (other, StopDemo) => Transition::stay(other),
        (Mode::Live, SetLive) => Transition::stay(Mode::Live),
        (_, SetLive) => Transition {
            next: Mode::Live,
            effects: vec![CancelDemoTimers],
        },
        (Mode::Off, Stop) => Transition::stay(Mode::Off),
        (_, Stop) => Transition {
            next: Mode::Off,
            effects: vec![CancelDemoTimers],
        },
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Off => "off",
            Mode::Demo => "demo",
            Mode::Live => "live",
        };
        f.write_str(s)
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(Mode::Off),
            "demo" => Ok(Mode::Demo),
            "live" => Ok(Mode::Live),
            other => Err(format!("unknown mode '{other}', expected off|demo|live")),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_start_demo_is_idempotent() {
        // ---
        let t = transition(Mode::Demo, Command::StartDemo);
        assert!(t.is_noop(Mode::Demo));
    }

    #[test]
    fn test_start_demo_from_off_and_live_loads_seed() {
        // ---
        for from in [Mode::Off, Mode::Live] {
            let t = transition(from, Command::StartDemo);
            assert_eq!(t.next, Mode::Demo);
            assert_eq!(t.effects, vec![Effect::CancelDemoTimers, Effect::LoadSeed]);
        }
    }

    #[test]
    fn test_demo_to_live_tears_down_timers() {
        // ---
        let t = transition(Mode::Demo, Command::SetLive);
        assert_eq!(t.next, Mode::Live);
        assert_eq!(t.effects, vec![Effect::CancelDemoTimers]);
    }

    #[test]
    fn test_stop_is_safe_when_already_off() {
        // ---
        assert!(transition(Mode::Off, Command::Stop).is_noop(Mode::Off));
        assert!(transition(Mode::Off, Command::StopDemo).is_noop(Mode::Off));
    }

    #[test]
    fn test_stop_demo_leaves_live_alone() {
        // ---
        assert!(transition(Mode::Live, Command::StopDemo).is_noop(Mode::Live));
        assert_eq!(transition(Mode::Live, Command::Stop).next, Mode::Off);
    }

    #[test]
    fn test_mode_parse_and_display() {
        // ---
        assert_eq!("Demo".parse::<Mode>(), Ok(Mode::Demo));
        assert_eq!(" live ".parse::<Mode>(), Ok(Mode::Live));
        assert!("turbo".parse::<Mode>().is_err());
        assert_eq!(Mode::Off.to_string(), "off");
    }
}
