//! Service settings read from the environment.
//!
//! `main` loads `.env` first, so a local file and real variables look the
//! same here. Each variable is optional; a present but unparsable value is
//! a startup error naming the variable.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};

use crate::hub::{Mode, SimParams};
use crate::seed::SeedSource;

/// Parse an optional environment variable through `FromStr`.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Settings for one service run, fixed once loaded.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// HTTP listen address.
    pub bind_addr: SocketAddr,

    /// Mode entered at startup.
    pub initial_mode: Mode,

    /// Where demo seed data comes from.
    pub seed: SeedSource,

    /// Simulation constants (tick interval bounds are configurable).
    pub sim: SimParams,

    /// Fixed RNG seed for reproducible demos.
    pub rng_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            initial_mode: Mode::Demo,
            seed: SeedSource::Bundled,
            sim: SimParams::default(),
            rng_seed: None,
        }
    }
}

/// Build a [`Config`] from the environment, defaulting anything unset.
///
/// - `BIND_ADDR` – listen address (default: `0.0.0.0:8080`)
/// - `IOT_MODE` – `off`, `demo` or `live` (default: `demo`)
/// - `IOT_SEED_URL` – fetch seed JSON from this URL
/// - `IOT_SEED_PATH` – read seed JSON from this file (ignored if a URL is set)
/// - `IOT_TICK_MIN_MS` / `IOT_TICK_MAX_MS` – tick interval bounds (default: 3000 / 5000)
/// - `IOT_RNG_SEED` – fixed RNG seed
///
/// Fails on unparsable values and on inverted or zero tick bounds.
pub fn load_from_env() -> Result<Config> {
    // ---
    let defaults = Config::default();

    let bind_addr = parse_env!("BIND_ADDR", SocketAddr, defaults.bind_addr);
    let initial_mode = parse_env!("IOT_MODE", Mode, defaults.initial_mode);

    let seed = match (env::var("IOT_SEED_URL"), env::var("IOT_SEED_PATH")) {
        (Ok(url), _) if !url.trim().is_empty() => SeedSource::Url(url.trim().to_string()),
        (_, Ok(path)) if !path.trim().is_empty() => SeedSource::File(PathBuf::from(path.trim())),
        _ => SeedSource::Bundled,
    };

    let mut sim = SimParams::default();
    sim.tick_min_ms = parse_env!("IOT_TICK_MIN_MS", u64, sim.tick_min_ms);
    sim.tick_max_ms = parse_env!("IOT_TICK_MAX_MS", u64, sim.tick_max_ms);
    validate_tick_bounds(&sim)?;

    let rng_seed = env::var("IOT_RNG_SEED")
        .ok()
        .map(|v| v.trim().parse::<u64>())
        .transpose()
        .map_err(|e| anyhow!("Invalid IOT_RNG_SEED: {}", e))?;

    Ok(Config {
        bind_addr,
        initial_mode,
        seed,
        sim,
        rng_seed,
    })
}

fn validate_tick_bounds(sim: &SimParams) -> Result<()> {
    // ---
    if sim.tick_min_ms == 0 {
        bail!("IOT_TICK_MIN_MS must be greater than zero");
    }
    if sim.tick_max_ms < sim.tick_min_ms {
        bail!(
            "IOT_TICK_MAX_MS ({}) must not be below IOT_TICK_MIN_MS ({})",
            sim.tick_max_ms,
            sim.tick_min_ms
        );
    }
    Ok(())
}

impl Config {
    /// Dump the settings at `info` once at startup.
    ///
    /// Seed URLs may carry credentials in their query string, so only the
    /// part before `?` is shown.
    pub fn log_config(&self) {
        // ---
        let seed = match &self.seed {
            SeedSource::Url(url) => match url.split_once('?') {
                Some((base, _)) => format!("{}?****", base),
                None => url.clone(),
            },
            SeedSource::File(path) => path.display().to_string(),
            SeedSource::Bundled => "bundled".to_string(),
            SeedSource::Inline(devices) => format!("inline ({} devices)", devices.len()),
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  BIND_ADDR      : {}", self.bind_addr);
        tracing::info!("  IOT_MODE       : {}", self.initial_mode);
        tracing::info!("  SEED           : {}", seed);
        tracing::info!(
            "  TICK_MS        : {}..{}",
            self.sim.tick_min_ms,
            self.sim.tick_max_ms
        );
        tracing::info!("  IOT_RNG_SEED   : {:?}", self.rng_seed);
    }
}
