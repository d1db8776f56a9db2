//! Wire types of the broadcast channel

use std::fmt;

use chrono::{DateTime, Utc};
use fleet_model::{DeviceId, DeviceStatus, Event, Position};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a server node in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh random node id
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for NodeId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// An update relayed between nodes
///
/// Logs are deliberately absent: they belong to the node holding the
/// connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BroadcastMessage {
    /// Device status changed
    #[serde(rename_all = "camelCase")]
    DeviceStatus {
        device_id: DeviceId,
        status: DeviceStatus,
        timestamp: DateTime<Utc>,
    },
    /// New position accepted
    Position { position: Position },
    /// New event recorded
    Event { event: Event },
}

impl BroadcastMessage {
    pub fn device_status(device_id: DeviceId, status: DeviceStatus, timestamp: DateTime<Utc>) -> Self {
        BroadcastMessage::DeviceStatus {
            device_id,
            status,
            timestamp,
        }
    }

    /// Device the message is about
    pub fn device_id(&self) -> DeviceId {
        match self {
            BroadcastMessage::DeviceStatus { device_id, .. } => *device_id,
            BroadcastMessage::Position { position } => position.device_id,
            BroadcastMessage::Event { event } => event.device_id,
        }
    }
}

/// A message tagged with the node that published it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: NodeId,
    pub message: BroadcastMessage,
}

impl Envelope {
    pub fn new(origin: NodeId, message: BroadcastMessage) -> Self {
        Self { origin, message }
    }

    /// Encode as JSON bytes
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
