use std::net::SocketAddr;

use anyhow::Result;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use swachhpath_telemetry::{routes, DeviceTelemetry, Hub, SeedSource, SimParams};

#[derive(Debug, Deserialize)]
struct ModeStatus {
    mode: String,
    running: bool,
    devices: usize,
}

#[derive(Debug, Deserialize)]
struct BatchResult {
    accepted: Vec<DeviceTelemetry>,
    rejected: Vec<serde_json::Value>,
}

fn seed_devices() -> Vec<DeviceTelemetry> {
    (1..=3)
        .map(|i| DeviceTelemetry::new(format!("GB{i:02}"), 26.76, 83.37, 40.0, 90.0))
        .collect()
}

/// Serve the router for a fresh hub on an ephemeral port.
async fn spawn_app() -> Result<(String, Hub)> {
    // ---
    let hub = Hub::new(SimParams::default(), SeedSource::Inline(seed_devices()), Some(1));
    let app = routes::router(hub.clone());

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok((format!("http://{}", addr), hub))
}

#[tokio::test]
async fn health_reports_mode() -> Result<()> {
    // ---
    let (base, _hub) = spawn_app().await?;
    let body: serde_json::Value = Client::new()
        .get(format!("{}/health", base))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body["status"], "ok");
    assert_eq!(body["mode"], "off");
    Ok(())
}

#[tokio::test]
async fn mode_switch_seeds_devices() -> Result<()> {
    // ---
    let (base, hub) = spawn_app().await?;
    let client = Client::new();

    let status: ModeStatus = client
        .put(format!("{}/mode", base))
        .json(&json!({ "mode": "demo" }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(status.mode, "demo");
    assert!(status.running);
    assert_eq!(status.devices, 3);

    let devices: Vec<DeviceTelemetry> = client.get(format!("{}/devices", base)).send().await?.json().await?;
    assert_eq!(devices.len(), 3);
    assert!(devices.windows(2).all(|w| w[0].device_id < w[1].device_id));

    let status: ModeStatus = client
        .put(format!("{}/mode", base))
        .json(&json!({ "mode": "off" }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(status.mode, "off");
    assert!(!status.running);
    assert_eq!(hub.pending_timers(), 0);

    let bad = client
        .put(format!("{}/mode", base))
        .json(&json!({ "mode": "turbo" }))
        .send()
        .await?;
    assert!(bad.status().is_client_error());
    Ok(())
}

#[tokio::test]
async fn push_endpoint_upserts_and_clamps() -> Result<()> {
    // ---
    let (base, hub) = spawn_app().await?;
    hub.set_live_mode();
    let client = Client::new();

    let resp = client
        .post(format!("{}/devices/update", base))
        .json(&json!({
            "deviceId": "X1", "lat": 1.0, "lng": 2.0,
            "fillLevel": 999, "battery": -5, "status": "online"
        }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let stored: DeviceTelemetry = resp.json().await?;
    assert_eq!(stored.fill_level, 100.0);
    assert_eq!(stored.battery, 0.0);

    let fetched: DeviceTelemetry = client
        .get(format!("{}/devices/X1", base))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(fetched, stored);

    let missing = client.get(format!("{}/devices/NOPE", base)).send().await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn malformed_push_is_rejected_without_side_effects() -> Result<()> {
    // ---
    let (base, hub) = spawn_app().await?;
    let client = Client::new();

    for body in [
        r#"{"lat":1,"lng":2}"#,
        r#"{"deviceId":"X2","lat":"north","lng":2}"#,
        r#"{"deviceId":"X3"}"#,
        "garbage",
    ] {
        let resp = client
            .post(format!("{}/devices/update", base))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await?;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY, "body {body}");
    }

    assert!(hub.snapshot().is_empty());
    Ok(())
}

#[tokio::test]
async fn batch_push_reports_rejections_by_index() -> Result<()> {
    // ---
    let (base, hub) = spawn_app().await?;
    let result: BatchResult = Client::new()
        .post(format!("{}/devices/batch", base))
        .json(&json!([
            { "deviceId": "A1", "lat": 1.0, "lng": 1.0, "fillLevel": 20 },
            { "lat": 1.0, "lng": 1.0 },
            { "deviceId": "A2", "lat": 2.0, "lng": 2.0, "status": "maintenance" }
        ]))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(result.accepted.len(), 2);
    assert_eq!(result.rejected.len(), 1);
    assert_eq!(result.rejected[0]["index"], 1);
    assert_eq!(hub.snapshot().len(), 2);
    Ok(())
}
