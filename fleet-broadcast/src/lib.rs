//! # Fleet Broadcast
//!
//! Cluster-wide propagation of device updates between server nodes.
//!
//! Every node publishes the updates it accepted locally; every node
//! (the originator included) receives them. The [`Envelope`] carries the
//! originating [`NodeId`] so a receiver can drop its own messages and replay
//! the rest as remote updates without publishing them again.
//!
//! ## Transports
//!
//! - [`NullBroadcast`]: single-node deployment, publishing is a no-op
//! - [`BroadcastHub`]: in-process fan-out, for several nodes in one process
//! - [`MulticastBroadcast`]: UDP multicast between hosts, JSON on the wire
//!
//! ## Usage
//!
//! ```rust
//! use fleet_broadcast::{BroadcastHub, BroadcastMessage, BroadcastService, Envelope, NodeId};
//! use fleet_model::{DeviceId, DeviceStatus};
//!
//! let hub = BroadcastHub::new();
//! let (node_a, _inbox_a) = hub.join(NodeId::random());
//! let (_node_b, inbox_b) = hub.join(NodeId::random());
//!
//! let message = BroadcastMessage::device_status(DeviceId::new(1), DeviceStatus::Online, chrono::Utc::now());
//! node_a.publish(&Envelope::new(node_a.node_id(), message)).unwrap();
//!
//! assert!(inbox_b.try_recv().is_some());
//! ```

pub mod error;
pub mod hub;
pub mod message;
pub mod multicast;

pub use error::{BroadcastError, Result};
pub use hub::{BroadcastHub, HubPublisher, Subscription};
pub use message::{BroadcastMessage, Envelope, NodeId};
pub use multicast::{MulticastBroadcast, MulticastConfig};

/// Publishing side of the broadcast channel
///
/// Fire-and-forget: an `Ok` means the envelope left this node, not that any
/// peer applied it.
pub trait BroadcastService: Send + Sync {
    /// Publish an envelope to every node in the cluster
    fn publish(&self, envelope: &Envelope) -> Result<()>;

    /// Whether this node is alone, letting callers skip building envelopes
    fn is_single_node(&self) -> bool {
        false
    }
}

/// Broadcast service for a single-node deployment
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBroadcast;

impl BroadcastService for NullBroadcast {
    fn publish(&self, _envelope: &Envelope) -> Result<()> {
        Ok(())
    }

    fn is_single_node(&self) -> bool {
        true
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        BroadcastError, BroadcastHub, BroadcastMessage, BroadcastService, Envelope, NodeId,
        NullBroadcast, Subscription,
    };
}
