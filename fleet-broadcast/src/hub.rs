//! In-process broadcast fan-out
//!
//! Lets several nodes live in one process (embedded deployments, tests).
//! Every envelope published by any member reaches every member, the
//! publisher included, exactly like a real cluster transport.

use std::sync::{mpsc, Arc};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{BroadcastError, Result};
use crate::message::{Envelope, NodeId};
use crate::BroadcastService;

/// Shared fan-out point for in-process nodes
#[derive(Clone, Default)]
pub struct BroadcastHub {
    members: Arc<Mutex<Vec<(NodeId, mpsc::Sender<Envelope>)>>>,
}

impl BroadcastHub {
    /// Create a hub with no members
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the hub as `node`
    ///
    /// Returns the publishing handle for the node and its inbox.
    pub fn join(&self, node: NodeId) -> (HubPublisher, Subscription) {
        let (tx, rx) = mpsc::channel();
        self.members.lock().push((node, tx));
        tracing::debug!(node = %node, "Node joined broadcast hub");

        let publisher = HubPublisher {
            node,
            hub: self.clone(),
        };
        (publisher, Subscription::new(rx))
    }

    /// Number of members with a live inbox
    pub fn member_count(&self) -> usize {
        self.members.lock().len()
    }

    fn deliver(&self, envelope: &Envelope) -> Result<()> {
        let mut members = self.members.lock();
        members.retain(|(node, tx)| {
            let alive = tx.send(envelope.clone()).is_ok();
            if !alive {
                tracing::debug!(node = %node, "Pruning disconnected hub member");
            }
            alive
        });

        if members.is_empty() {
            return Err(BroadcastError::Disconnected);
        }
        Ok(())
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("member_count", &self.member_count())
            .finish()
    }
}

/// Publishing handle of one hub member
#[derive(Debug, Clone)]
pub struct HubPublisher {
    node: NodeId,
    hub: BroadcastHub,
}

impl HubPublisher {
    /// Node this handle publishes for
    pub fn node_id(&self) -> NodeId {
        self.node
    }
}

impl BroadcastService for HubPublisher {
    fn publish(&self, envelope: &Envelope) -> Result<()> {
        self.hub.deliver(envelope)
    }
}

/// Receiving side of a broadcast transport
///
/// Blocking by default, with non-blocking and timeout variants.
pub struct Subscription {
    rx: mpsc::Receiver<Envelope>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<Envelope>) -> Self {
        Self { rx }
    }

    /// Block until an envelope arrives
    ///
    /// Returns `None` once every sender is gone.
    pub fn recv(&self) -> Option<Envelope> {
        self.rx.recv().ok()
    }

    /// Take an envelope if one is waiting
    pub fn try_recv(&self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Block for at most `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Envelope> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl Iterator for Subscription {
    type Item = Envelope;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::BroadcastMessage;
    use chrono::Utc;
    use fleet_model::{DeviceId, DeviceStatus};

    fn status_envelope(origin: NodeId) -> Envelope {
        Envelope::new(
            origin,
            BroadcastMessage::device_status(DeviceId::new(1), DeviceStatus::Online, Utc::now()),
        )
    }

    #[test]
    fn test_every_member_receives_including_origin() {
        let hub = BroadcastHub::new();
        let (a, inbox_a) = hub.join(NodeId::random());
        let (_b, inbox_b) = hub.join(NodeId::random());

        a.publish(&status_envelope(a.node_id())).unwrap();

        assert_eq!(inbox_a.try_recv().unwrap().origin, a.node_id());
        assert_eq!(inbox_b.try_recv().unwrap().origin, a.node_id());
    }

    #[test]
    fn test_dropped_inbox_is_pruned() {
        let hub = BroadcastHub::new();
        let (a, _inbox_a) = hub.join(NodeId::random());
        let (_b, inbox_b) = hub.join(NodeId::random());
        drop(inbox_b);

        a.publish(&status_envelope(a.node_id())).unwrap();
        assert_eq!(hub.member_count(), 1);
    }

    #[test]
    fn test_publish_without_members_is_disconnected() {
        let hub = BroadcastHub::new();
        let (a, inbox) = hub.join(NodeId::random());
        drop(inbox);

        let err = a.publish(&status_envelope(a.node_id())).unwrap_err();
        assert!(matches!(err, BroadcastError::Disconnected));
    }
}
