//! Data models for dustbin telemetry.
//!
//! `DeviceTelemetry` is the single record the hub keeps per device;
//! `TelemetryUpdate` is the partial payload accepted on the push path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---

pub const LEVEL_MIN: f64 = 0.0;
pub const LEVEL_MAX: f64 = 100.0;

/// Battery assumed for a device first seen through a push without one.
pub const DEFAULT_BATTERY: f64 = 100.0;

/// Reported connectivity of a dustbin sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    // ---
    #[default]
    Online,
    Offline,
    Maintenance,
}

/// Latest known state of one dustbin sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTelemetry {
    // ---
    pub device_id: String,
    pub lat: f64,
    pub lng: f64,
    pub fill_level: f64,
    pub battery: f64,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Partial telemetry pushed by a live device or bridge.
///
/// Every field is optional on the wire; validation happens in
/// [`TelemetryUpdate::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryUpdate {
    // ---
    pub device_id: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub fill_level: Option<f64>,
    pub battery: Option<f64>,
    pub status: Option<DeviceStatus>,
}

/// Why a pushed update was dropped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpdateError {
    // ---
    #[error("update has no deviceId")]
    MissingDeviceId,

    #[error("field `{field}` of device {device_id} is not a finite number")]
    NonFiniteField {
        device_id: String,
        field: &'static str,
    },

    #[error("unknown device {0} must report both lat and lng")]
    MissingCoordinates(String),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("hub has been shut down")]
    ShutDown,
}

/// Per-tick change applied to a device by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TickDelta {
    // ---
    pub fill: f64,
    pub lat: f64,
    pub lng: f64,
    pub battery: f64,
}

/// Round to a whole percentage and clamp into `[0, 100]`.
pub fn clamp_level(level: f64) -> f64 {
    // ---
    level.round().clamp(LEVEL_MIN, LEVEL_MAX)
}

impl DeviceTelemetry {
    // ---
    pub fn new(device_id: impl Into<String>, lat: f64, lng: f64, fill_level: f64, battery: f64) -> Self {
        // ---
        Self {
            device_id: device_id.into(),
            lat,
            lng,
            fill_level: clamp_level(fill_level),
            battery: clamp_level(battery),
            status: DeviceStatus::Online,
            timestamp: DateTime::<Utc>::default(),
        }
    }

    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }

    /// Apply a simulation delta. Levels are clamped, status is untouched
    /// and the battery never rises here whatever the delta says.
    pub fn apply(&self, delta: TickDelta, at: DateTime<Utc>) -> Self {
        // ---
        Self {
            device_id: self.device_id.clone(),
            lat: self.lat + delta.lat,
            lng: self.lng + delta.lng,
            fill_level: clamp_level(self.fill_level + delta.fill),
            battery: clamp_level(self.battery + delta.battery.min(0.0)),
            status: self.status,
            timestamp: at,
        }
    }

    /// Seed records may come from hand-edited files; force them into range.
    /// The id is trimmed the same way pushed ids are, so a push naming a
    /// seeded device always finds it.
    pub fn normalized(mut self, at: DateTime<Utc>) -> Self {
        // ---
        if self.device_id.trim().len() != self.device_id.len() {
            self.device_id = self.device_id.trim().to_string();
        }
        self.fill_level = clamp_level(self.fill_level);
        self.battery = clamp_level(self.battery);
        self.timestamp = at;
        self
    }
}

impl TelemetryUpdate {
    // ---
    pub fn for_device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Self::default()
        }
    }

    /// Turn the update into a full record, merged over `existing` when the
    /// device is already known.
    ///
    /// Missing `status` always means `online`. An unknown device must carry
    /// coordinates; its fill defaults to 0 and battery to 100.
    pub fn resolve(
        &self,
        existing: Option<&DeviceTelemetry>,
        at: DateTime<Utc>,
    ) -> Result<DeviceTelemetry, UpdateError> {
        // ---
        let device_id = match self.device_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(UpdateError::MissingDeviceId),
        };

        let fields = [
            ("lat", self.lat),
            ("lng", self.lng),
            ("fillLevel", self.fill_level),
            ("battery", self.battery),
        ];
        if let Some(&(field, _)) = fields
            .iter()
            .find(|(_, v)| v.is_some_and(|v| !v.is_finite()))
        {
            return Err(UpdateError::NonFiniteField { device_id, field });
        }

        let (lat, lng, fill, battery) = match existing {
            Some(prev) => (
                self.lat.unwrap_or(prev.lat),
                self.lng.unwrap_or(prev.lng),
                self.fill_level.unwrap_or(prev.fill_level),
                self.battery.unwrap_or(prev.battery),
            ),
            None => match (self.lat, self.lng) {
                (Some(lat), Some(lng)) => (
                    lat,
                    lng,
                    self.fill_level.unwrap_or(LEVEL_MIN),
                    self.battery.unwrap_or(DEFAULT_BATTERY),
                ),
                _ => return Err(UpdateError::MissingCoordinates(device_id)),
            },
        };

        Ok(DeviceTelemetry {
            device_id,
            lat,
            lng,
            fill_level: clamp_level(fill),
            battery: clamp_level(battery),
            status: self.status.unwrap_or_default(),
            timestamp: at,
        })
    }

    /// Parse a raw wire payload. Type mismatches (e.g. a string latitude)
    /// are reported as [`UpdateError::Malformed`].
    pub fn from_json(raw: &str) -> Result<Self, UpdateError> {
        // ---
        serde_json::from_str(raw).map_err(|e| UpdateError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap()
    }

    fn create_test_device(fill: f64, battery: f64) -> DeviceTelemetry {
        DeviceTelemetry::new("GB01", 26.7606, 83.3732, fill, battery)
    }

    #[test]
    fn test_clamp_level() {
        // ---
        assert_eq!(clamp_level(-5.0), 0.0);
        assert_eq!(clamp_level(999.0), 100.0);
        assert_eq!(clamp_level(49.6), 50.0);
        assert_eq!(clamp_level(100.4), 100.0);
    }

    #[test]
    fn test_apply_extreme_deltas_stay_in_range() {
        // ---
        let device = create_test_device(50.0, 50.0);
        for fill in [-1e9, -101.0, -2.0, 0.0, 5.0, 101.0, 1e9] {
            for battery in [-1e9, -1.0, 0.0, 1e9] {
                let delta = TickDelta {
                    fill,
                    battery,
                    ..TickDelta::default()
                };
                let next = device.apply(delta, at());
                assert!((0.0..=100.0).contains(&next.fill_level), "fill {}", next.fill_level);
                assert!((0.0..=100.0).contains(&next.battery), "battery {}", next.battery);
                assert!(next.battery <= device.battery);
            }
        }
    }

    #[test]
    fn test_apply_keeps_identity_and_status() {
        // ---
        let device = create_test_device(10.0, 90.0).with_status(DeviceStatus::Maintenance);
        let delta = TickDelta {
            fill: 3.0,
            lat: 0.0001,
            lng: -0.0001,
            battery: -1.0,
        };
        let next = device.apply(delta, at());

        assert_eq!(next.device_id, "GB01");
        assert_eq!(next.status, DeviceStatus::Maintenance);
        assert_eq!(next.fill_level, 13.0);
        assert_eq!(next.battery, 89.0);
        assert!((next.lat - 26.7607).abs() < 1e-9);
        assert_eq!(next.timestamp, at());
    }

    #[test]
    fn test_normalized_trims_id_like_resolve() {
        // ---
        let seeded = DeviceTelemetry::new(" GB01 ", 1.0, 2.0, 140.0, 50.0).normalized(at());
        assert_eq!(seeded.device_id, "GB01");
        assert_eq!(seeded.fill_level, 100.0);

        let mut update = TelemetryUpdate::for_device(" GB01 ");
        update.fill_level = Some(77.0);
        let merged = update.resolve(Some(&seeded), at()).unwrap();
        assert_eq!(merged.device_id, seeded.device_id);
    }

    #[test]
    fn test_resolve_clamps_pushed_levels() {
        // ---
        let update = TelemetryUpdate {
            device_id: Some("X1".into()),
            lat: Some(1.0),
            lng: Some(2.0),
            fill_level: Some(999.0),
            battery: Some(-5.0),
            status: Some(DeviceStatus::Online),
        };
        let record = update.resolve(None, at()).unwrap();

        assert_eq!(record.fill_level, 100.0);
        assert_eq!(record.battery, 0.0);
        assert_eq!(record.status, DeviceStatus::Online);
    }

    #[test]
    fn test_resolve_defaults_status_to_online() {
        // ---
        let existing = create_test_device(40.0, 80.0).with_status(DeviceStatus::Offline);
        let mut update = TelemetryUpdate::for_device("GB01");
        update.fill_level = Some(42.0);

        let record = update.resolve(Some(&existing), at()).unwrap();
        assert_eq!(record.status, DeviceStatus::Online);
        assert_eq!(record.fill_level, 42.0);
        assert_eq!(record.battery, 80.0);
        assert_eq!(record.lat, existing.lat);
    }

    #[test]
    fn test_resolve_rejects_invalid_payloads() {
        // ---
        assert_eq!(
            TelemetryUpdate::default().resolve(None, at()),
            Err(UpdateError::MissingDeviceId)
        );
        assert_eq!(
            TelemetryUpdate::for_device("  ").resolve(None, at()),
            Err(UpdateError::MissingDeviceId)
        );
        assert_eq!(
            TelemetryUpdate::for_device("X2").resolve(None, at()),
            Err(UpdateError::MissingCoordinates("X2".into()))
        );

        let mut nan = TelemetryUpdate::for_device("X3");
        nan.lat = Some(f64::NAN);
        nan.lng = Some(2.0);
        assert_eq!(
            nan.resolve(None, at()),
            Err(UpdateError::NonFiniteField {
                device_id: "X3".into(),
                field: "lat"
            })
        );
    }

    #[test]
    fn test_resolve_new_device_defaults() {
        // ---
        let update = TelemetryUpdate {
            device_id: Some("X4".into()),
            lat: Some(1.0),
            lng: Some(2.0),
            ..TelemetryUpdate::default()
        };
        let record = update.resolve(None, at()).unwrap();
        assert_eq!(record.fill_level, 0.0);
        assert_eq!(record.battery, DEFAULT_BATTERY);
    }

    #[test]
    fn test_from_json_wire_format() {
        // ---
        let update = TelemetryUpdate::from_json(
            r#"{"deviceId":"GB01","lat":26.76,"lng":83.37,"fillLevel":80,"battery":90,"status":"maintenance"}"#,
        )
        .unwrap();
        assert_eq!(update.device_id.as_deref(), Some("GB01"));
        assert_eq!(update.status, Some(DeviceStatus::Maintenance));

        let bad = TelemetryUpdate::from_json(r#"{"deviceId":"GB01","lat":"north"}"#);
        assert!(matches!(bad, Err(UpdateError::Malformed(_))));

        let bad_status = TelemetryUpdate::from_json(r#"{"deviceId":"GB01","status":"exploded"}"#);
        assert!(matches!(bad_status, Err(UpdateError::Malformed(_))));
    }
}
