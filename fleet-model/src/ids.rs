//! Identity types: devices, channels and connection keys

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Unique identifier for a tracked device
///
/// The key for all session state. Opaque outside of storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Create a new device ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DeviceId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Handle of a network channel as seen by the protocol layer
///
/// A TCP channel carries one device connection; a UDP channel may carry
/// several, told apart by their remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Create a new channel handle
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw handle value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

impl From<u64> for ChannelId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identifies one live network connection
///
/// Protocol plus both endpoints, tagged with the channel it arrived on so a
/// disconnect can be resolved from the channel handle alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    /// Channel the connection belongs to
    pub channel: ChannelId,
    /// Protocol name, e.g. "gt06"
    pub protocol: String,
    /// Local (server) endpoint
    pub local: SocketAddr,
    /// Remote (device) endpoint
    pub remote: SocketAddr,
}

impl ConnectionKey {
    /// Create a new connection key
    pub fn new(
        channel: ChannelId,
        protocol: impl Into<String>,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Self {
        Self {
            channel,
            protocol: protocol.into(),
            local,
            remote,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} {} -> {}",
            self.protocol, self.channel, self.remote, self.local
        )
    }
}
