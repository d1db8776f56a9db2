//! Position fixes

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::DeviceId;

/// A location snapshot reported by a device
///
/// Immutable once handed to the dispatcher; only `id` is filled in after
/// storage assigns one. Protocol-specific values go into `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Storage id, `None` until persisted
    pub id: Option<u64>,
    pub device_id: DeviceId,
    pub protocol: String,
    /// When the server received the fix
    pub server_time: DateTime<Utc>,
    /// Device clock at report time
    pub device_time: DateTime<Utc>,
    /// Time of the GNSS fix; orders positions for "latest" purposes
    pub fix_time: DateTime<Utc>,
    pub valid: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Knots
    pub speed: f64,
    /// Degrees from north
    pub course: f64,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Position {
    /// Create a valid fix at `time` for all three clocks
    pub fn new(
        device_id: DeviceId,
        protocol: impl Into<String>,
        time: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            id: None,
            device_id,
            protocol: protocol.into(),
            server_time: time,
            device_time: time,
            fix_time: time,
            valid: true,
            latitude,
            longitude,
            altitude: 0.0,
            speed: 0.0,
            course: 0.0,
            attributes: BTreeMap::new(),
        }
    }

    /// Attach a protocol-specific attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Whether this fix may replace `current` as the device's latest position
    ///
    /// Newer or equal fix times win.
    pub fn supersedes(&self, current: &Position) -> bool {
        self.fix_time >= current.fix_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_supersedes_newer_and_equal() {
        let old = Position::new(DeviceId::new(1), "gt06", at(0), 37.7749, -122.4194);
        let same = Position::new(DeviceId::new(1), "gt06", at(0), 37.7750, -122.4195);
        let newer = Position::new(DeviceId::new(1), "gt06", at(0) + Duration::seconds(5), 37.0, -122.0);

        assert!(same.supersedes(&old));
        assert!(newer.supersedes(&old));
        assert!(!old.supersedes(&newer));
    }

    #[test]
    fn test_json_keeps_attributes() {
        let position = Position::new(DeviceId::new(1), "gt06", at(0), 37.7749, -122.4194)
            .with_attribute("ignition", true)
            .with_attribute("odometer", 120_344);

        let json = serde_json::to_string(&position).unwrap();
        let decoded: Position = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, position);
        assert_eq!(decoded.attributes["ignition"], serde_json::Value::Bool(true));
    }

    fn finite() -> impl Strategy<Value = f64> {
        any::<f64>().prop_filter("finite", |value| value.is_finite())
    }

    proptest! {
        #[test]
        fn prop_json_keeps_measurements_bit_exact(
            latitude in finite(),
            longitude in finite(),
            altitude in finite(),
            speed in finite(),
            course in finite(),
        ) {
            let mut position = Position::new(DeviceId::new(1), "gt06", at(0), latitude, longitude);
            position.altitude = altitude;
            position.speed = speed;
            position.course = course;

            let json = serde_json::to_string(&position).unwrap();
            let decoded: Position = serde_json::from_str(&json).unwrap();

            prop_assert_eq!(decoded.latitude.to_bits(), latitude.to_bits());
            prop_assert_eq!(decoded.longitude.to_bits(), longitude.to_bits());
            prop_assert_eq!(decoded.altitude.to_bits(), altitude.to_bits());
            prop_assert_eq!(decoded.speed.to_bits(), speed.to_bits());
            prop_assert_eq!(decoded.course.to_bits(), course.to_bits());
        }
    }
}
