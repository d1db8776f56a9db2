//! Events and connection log records

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionKey, DeviceId};

/// A point-in-time occurrence for a device (alarm, geofence enter, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Storage id, `None` until persisted
    pub id: Option<u64>,
    pub event_type: String,
    pub device_id: DeviceId,
    pub event_time: DateTime<Utc>,
    pub position_id: Option<u64>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Event {
    /// Create an event stamped with the current time
    pub fn new(event_type: impl Into<String>, device_id: DeviceId) -> Self {
        Self {
            id: None,
            event_type: event_type.into(),
            device_id,
            event_time: Utc::now(),
            position_id: None,
            attributes: BTreeMap::new(),
        }
    }

    /// Link the event to the position that triggered it
    pub fn with_position(mut self, position_id: u64) -> Self {
        self.position_id = Some(position_id);
        self
    }
}

/// A raw frame seen on a connection, kept for diagnostics
///
/// Tied to the node holding the connection, so it never crosses the
/// broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub connection_key: ConnectionKey,
    /// Set once the connection is identified
    pub device_id: Option<DeviceId>,
    /// Identifier the device announced, if any
    pub unique_id: Option<String>,
    /// Hex-encoded frame
    pub data: String,
    pub received_at: DateTime<Utc>,
}

impl LogRecord {
    /// Create a record for a frame received now
    pub fn new(connection_key: ConnectionKey, data: impl Into<String>) -> Self {
        Self {
            connection_key,
            device_id: None,
            unique_id: None,
            data: data.into(),
            received_at: Utc::now(),
        }
    }

    pub fn with_device(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }
}
