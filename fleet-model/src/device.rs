//! Device record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::DeviceId;
use crate::status::DeviceStatus;

/// A tracked physical unit
///
/// The cache holds one authoritative copy per device; the session core only
/// touches `status`, `last_update` and `position_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Human-readable name
    pub name: String,
    /// Identifier the device reports on the wire (IMEI, serial, ...)
    pub unique_id: String,
    pub status: DeviceStatus,
    /// Timestamp of the last accepted status change
    pub last_update: Option<DateTime<Utc>>,
    /// Storage id of the latest persisted position
    pub position_id: Option<u64>,
}

impl Device {
    /// Create a device in the initial `unknown` state
    pub fn new(id: DeviceId, name: impl Into<String>, unique_id: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            unique_id: unique_id.into(),
            status: DeviceStatus::Unknown,
            last_update: None,
            position_id: None,
        }
    }

    /// Builder-style status override, mostly for seeding stores
    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }
}
