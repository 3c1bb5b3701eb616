//! `swachhpath-telemetry` service binary.
//!
//! Startup order: tracing, `.env`, config, hub (entering `IOT_MODE`), then
//! the axum server built from the `routes` gateway. Ctrl-C drains the
//! server and shuts the hub down.
//!
//! Logging knobs read here rather than in `config`: `RUST_LOG` wins when
//! set, otherwise `AXUM_LOG_LEVEL` (default `debug`); `AXUM_SPAN_EVENTS`
//! and `FORCE_COLOR` shape the output. Everything else is listed on
//! [`config::load_from_env`].
use std::{env, io::IsTerminal};

use anyhow::Result;
use axum::Router;
use dotenvy::dotenv;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use swachhpath_telemetry::{config, routes, Hub};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let hub = Hub::new(cfg.sim.clone(), cfg.seed.clone(), cfg.rng_seed);
    hub.set_mode(cfg.initial_mode).await;
    tracing::info!("Telemetry hub started in {} mode", hub.mode());

    // Every endpoint comes from the routes gateway
    let app: Router = routes::router(hub.clone());

    tracing::info!("Listening on {}", cfg.bind_addr);

    let listener = tokio::net::TcpListener::bind(cfg.bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", cfg.bind_addr, e))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    hub.shutdown();
    Ok(())
}

// ---

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Install the process-wide compact fmt subscriber.
///
/// Output carries target, file and line. `AXUM_SPAN_EVENTS=full` adds span
/// enter/exit/close with timings, `enter_exit` drops the close, anything
/// else logs close only. `FORCE_COLOR` accepts `1|true|yes` and
/// `0|false|no`; unset means color only on a TTY. Hyper and reqwest are
/// held at `warn` so request plumbing does not drown the hub's own events.
fn init_tracing() {
    // ---
    let span_events = match env::var("AXUM_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AXUM_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},hyper=warn,reqwest=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
