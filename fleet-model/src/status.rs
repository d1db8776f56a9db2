//! Device connectivity status

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Connectivity status of a device
///
/// Stored on the cached [`Device`](crate::Device). The lowercase string form
/// (`"online"`, `"idle"`, ...) is what listeners and the broadcast wire see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Never seen, or state could not be determined
    Unknown,
    /// Explicitly disconnected or stopped
    Offline,
    /// First contact or reconnect in progress
    Connecting,
    /// Protocol handshake under way
    Authenticating,
    /// Authenticated and reporting
    Online,
    /// Authenticated but silent for longer than the inactivity timeout
    Idle,
    /// Connection or authentication failed
    Error,
}

impl DeviceStatus {
    /// All statuses, in declaration order
    pub const ALL: [DeviceStatus; 7] = [
        DeviceStatus::Unknown,
        DeviceStatus::Offline,
        DeviceStatus::Connecting,
        DeviceStatus::Authenticating,
        DeviceStatus::Online,
        DeviceStatus::Idle,
        DeviceStatus::Error,
    ];

    /// Lowercase string form
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Unknown => "unknown",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Connecting => "connecting",
            DeviceStatus::Authenticating => "authenticating",
            DeviceStatus::Online => "online",
            DeviceStatus::Idle => "idle",
            DeviceStatus::Error => "error",
        }
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Unknown
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known status
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown device status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for DeviceStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}
