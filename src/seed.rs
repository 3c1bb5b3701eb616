//! Seed dataset for demo mode.
//!
//! Seed data can come from a JSON file, a URL, an in-memory list, or the
//! dataset bundled into the binary. Loading never fails from the caller's
//! point of view: any error (missing file, bad JSON, unreachable URL, empty
//! list) is logged and the built-in fallback devices are used instead.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::DeviceTelemetry;

// ---

/// Dataset compiled into the binary, used when no source is configured.
const BUNDLED_SEED: &str = include_str!("../data/iot_stream.json");

#[derive(Debug, Clone, Default)]
pub enum SeedSource {
    // ---
    #[default]
    Bundled,
    File(PathBuf),
    Url(String),
    Inline(Vec<DeviceTelemetry>),
}

#[derive(Debug, Error)]
pub enum SeedError {
    // ---
    #[error("failed to read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to fetch seed data: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid seed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("seed dataset contains no usable devices")]
    Empty,
}

/// On-disk shape: `{ "devices": [ ... ] }`.
#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    devices: Vec<DeviceTelemetry>,
}

/// Devices used whenever the configured seed cannot be loaded.
pub fn fallback_devices() -> Vec<DeviceTelemetry> {
    // ---
    vec![
        DeviceTelemetry::new("GB01", 26.7606, 83.3732, 45.0, 85.0),
        DeviceTelemetry::new("GB02", 26.7615, 83.3725, 62.0, 78.0),
        DeviceTelemetry::new("GB03", 26.7598, 83.3740, 88.0, 92.0),
        DeviceTelemetry::new("GB04", 26.7620, 83.3735, 35.0, 81.0),
        DeviceTelemetry::new("GB05", 26.7610, 83.3745, 71.0, 88.0),
    ]
}

/// Parse a seed document. Ids are trimmed; duplicate ids (first wins),
/// blank ids and records with non-finite numbers are dropped.
pub fn parse(raw: &str) -> Result<Vec<DeviceTelemetry>, SeedError> {
    // ---
    let file: SeedFile = serde_json::from_str(raw)?;
    sanitize(file.devices)
}

fn sanitize(devices: Vec<DeviceTelemetry>) -> Result<Vec<DeviceTelemetry>, SeedError> {
    // ---
    let mut seen = HashSet::new();
    let devices: Vec<DeviceTelemetry> = devices
        .into_iter()
        .map(|mut d| {
            d.device_id = d.device_id.trim().to_string();
            d
        })
        .filter(|d| {
            let usable = !d.device_id.trim().is_empty()
                && [d.lat, d.lng, d.fill_level, d.battery].iter().all(|v| v.is_finite());
            if !usable {
                warn!(device_id = %d.device_id, "skipping unusable seed record");
            }
            usable && seen.insert(d.device_id.clone())
        })
        .collect();

    if devices.is_empty() {
        return Err(SeedError::Empty);
    }
    Ok(devices)
}

async fn try_load(source: &SeedSource) -> Result<Vec<DeviceTelemetry>, SeedError> {
    // ---
    match source {
        SeedSource::Bundled => parse(BUNDLED_SEED),
        SeedSource::File(path) => {
            let raw = tokio::fs::read_to_string(path).await?;
            parse(&raw)
        }
        SeedSource::Url(url) => {
            let raw = reqwest::get(url).await?.error_for_status()?.text().await?;
            parse(&raw)
        }
        SeedSource::Inline(devices) => sanitize(devices.clone()),
    }
}

/// Load the seed dataset, falling back to [`fallback_devices`] on any error.
/// Always returns at least one device.
pub async fn load(source: &SeedSource) -> Vec<DeviceTelemetry> {
    // ---
    match try_load(source).await {
        Ok(devices) => {
            info!(devices = devices.len(), source = %source_label(source), "loaded seed data");
            devices
        }
        Err(e) => {
            warn!(error = %e, source = %source_label(source), "seed load failed, using fallback devices");
            fallback_devices()
        }
    }
}

fn source_label(source: &SeedSource) -> String {
    match source {
        SeedSource::Bundled => "bundled".to_string(),
        SeedSource::File(path) => path.display().to_string(),
        SeedSource::Url(url) => url.clone(),
        SeedSource::Inline(devices) => format!("inline({})", devices.len()),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_bundled_seed_parses() {
        // ---
        let devices = assert_ok!(parse(BUNDLED_SEED));
        assert!(devices.len() >= 5);
        assert!(devices.iter().all(|d| (0.0..=100.0).contains(&d.fill_level)));
    }

    #[test]
    fn test_parse_drops_duplicates_and_bad_records() {
        // ---
        let raw = r#"{"devices":[
            {"deviceId":"A","lat":1.0,"lng":2.0,"fillLevel":10,"battery":90,"status":"online"},
            {"deviceId":"A","lat":9.0,"lng":9.0,"fillLevel":99,"battery":9,"status":"offline"},
            {"deviceId":"","lat":1.0,"lng":2.0,"fillLevel":10,"battery":90}
        ]}"#;
        let devices = assert_ok!(parse(raw));
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].fill_level, 10.0);
    }

    #[test]
    fn test_parse_trims_ids_before_dedup() {
        // ---
        let raw = r#"{"devices":[
            {"deviceId":"GB01 ","lat":1.0,"lng":2.0,"fillLevel":10,"battery":90},
            {"deviceId":"GB01","lat":9.0,"lng":9.0,"fillLevel":99,"battery":9}
        ]}"#;
        let devices = assert_ok!(parse(raw));
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_id, "GB01");
        assert_eq!(devices[0].fill_level, 10.0);
    }

    #[test]
    fn test_parse_rejects_empty_and_malformed() {
        // ---
        assert!(matches!(parse(r#"{"devices":[]}"#), Err(SeedError::Empty)));
        assert!(matches!(parse("{}"), Err(SeedError::Empty)));
        assert_err!(parse("not json"));
    }

    #[test]
    fn test_missing_file_falls_back() {
        // ---
        let source = SeedSource::File(PathBuf::from("/definitely/not/here/iot_stream.json"));
        let devices = tokio_test::block_on(load(&source));
        assert_eq!(devices, fallback_devices());
    }

    #[test]
    fn test_empty_inline_falls_back() {
        // ---
        let devices = tokio_test::block_on(load(&SeedSource::Inline(Vec::new())));
        assert_eq!(devices.len(), 5);
    }

    #[tokio::test]
    async fn test_file_seed_is_read() {
        // ---
        let path = std::env::temp_dir().join(format!("swachhpath-seed-{}.json", std::process::id()));
        tokio::fs::write(
            &path,
            r#"{"devices":[{"deviceId":"Z9","lat":1.0,"lng":2.0,"fillLevel":12,"battery":34}]}"#,
        )
        .await
        .unwrap();

        let devices = load(&SeedSource::File(path.clone())).await;
        let _ = tokio::fs::remove_file(&path).await;

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_id, "Z9");
    }
}
