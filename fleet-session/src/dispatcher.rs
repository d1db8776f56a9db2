//! Update dispatcher
//!
//! Every device-state change in the process goes through
//! [`UpdateDispatcher`]: status changes, positions, events and raw logs, from
//! local connectors and from other nodes alike.
//!
//! # Ordering
//!
//! Per device, a re-entrant critical section covers mutate, listener snapshot
//! and notification, so listeners of one device observe its updates in the
//! order they were applied. Storage reads and writes and broadcast publishing
//! run outside it. Different devices never contend.
//!
//! Remote replays for a device with no session on this node skip the
//! section entirely and rely on the cache's per-entry atomicity, so the
//! registry only holds devices this node actually serves or watches.
//!
//! Listeners are called synchronously while that device's section is held.
//! A listener may dispatch for the same device; dispatching for another
//! device from inside a listener is allowed but must not form a cycle.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use device_cache::CacheManager;
use fleet_broadcast::{BroadcastMessage, BroadcastService, Envelope, NodeId};
use fleet_model::{ChannelId, ConnectionKey, Device, DeviceId, DeviceStatus, Event, LogRecord, Position};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::listener::{ListenerError, UpdateListener};
use crate::registry::{Session, SessionRegistry};
use crate::state::StateMachine;
use crate::storage::{Record, Storage};

/// Where an update came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Produced on this node, by a connector or the inactivity monitor
    Local,
    /// Replayed from another node's broadcast
    Remote,
}

impl Origin {
    pub fn is_local(self) -> bool {
        matches!(self, Origin::Local)
    }
}

/// Single synchronization point for device-state changes
pub struct UpdateDispatcher {
    node_id: NodeId,
    state_machine: StateMachine,
    cache: Arc<dyn CacheManager>,
    storage: Arc<dyn Storage>,
    broadcast: Arc<dyn BroadcastService>,
    registry: Arc<SessionRegistry>,
    listener_failures: AtomicU64,
}

impl UpdateDispatcher {
    /// Create a dispatcher over the given collaborators
    ///
    /// Fails with [`SessionError::Configuration`] when `config` is invalid.
    /// Without a configured node id a random one is generated.
    pub fn new(
        config: SessionConfig,
        cache: Arc<dyn CacheManager>,
        storage: Arc<dyn Storage>,
        broadcast: Arc<dyn BroadcastService>,
        registry: Arc<SessionRegistry>,
    ) -> Result<Self> {
        config.validate()?;

        let node_id = config.node_id.unwrap_or_else(NodeId::random);
        tracing::info!(%node_id, idle_timeout = ?config.idle_timeout, "Update dispatcher created");

        Ok(Self {
            node_id,
            state_machine: StateMachine::new(config.idle_timeout),
            cache,
            storage,
            broadcast,
            registry,
            listener_failures: AtomicU64::new(0),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn CacheManager> {
        &self.cache
    }

    pub fn state_machine(&self) -> &StateMachine {
        &self.state_machine
    }

    /// Listener calls that returned an error or panicked since creation
    pub fn listener_failures(&self) -> u64 {
        self.listener_failures.load(Ordering::Relaxed)
    }

    /// Apply a status change to a device
    ///
    /// Resolves the device through the cache, reading through to storage on
    /// a miss. A remote update older than the cached state is ignored and
    /// the cached device returned unchanged. Local updates count as activity
    /// and are published to the other nodes.
    pub fn update_device(
        &self,
        origin: Origin,
        device_id: DeviceId,
        status: DeviceStatus,
        timestamp: DateTime<Utc>,
    ) -> Result<Device> {
        self.dispatch_status(origin, device_id, status, timestamp, origin.is_local())
    }

    fn dispatch_status(
        &self,
        origin: Origin,
        device_id: DeviceId,
        status: DeviceStatus,
        timestamp: DateTime<Utc>,
        activity: bool,
    ) -> Result<Device> {
        // Storage is only read here, before the section is taken
        let resolved = self.resolve_device(device_id)?;
        let session = self.section_for(origin, device_id);

        let updated = {
            let _section = session.as_ref().map(|session| session.dispatch.lock());

            let mut stale = false;
            let mut transition = None;
            let mut apply = |device: &mut Device| {
                if !origin.is_local() && device.last_update.is_some_and(|last| last > timestamp) {
                    stale = true;
                } else {
                    transition = Some(self.state_machine.apply(device, status, timestamp));
                }
            };

            let cached = self.cache.update_device(device_id, &mut apply);
            let updated = match cached {
                Some(device) => device,
                None => {
                    // Entry evicted since resolve; write the resolved copy back
                    let mut device = resolved;
                    apply(&mut device);
                    self.cache.put_device(device.clone());
                    device
                }
            };

            if stale {
                tracing::debug!(
                    %device_id,
                    %status,
                    cached = ?updated.last_update,
                    received = %timestamp,
                    "Ignoring stale remote status"
                );
                return Ok(updated);
            }

            if let Some(transition) = transition {
                tracing::debug!(
                    %device_id,
                    from = %transition.from,
                    to = %transition.to,
                    ?origin,
                    "Device status applied"
                );
            }

            if activity {
                self.registry.touch(device_id, Utc::now());
            }

            let listeners = self.registry.listeners(device_id);
            self.notify(device_id, &listeners, |listener| listener.on_update_device(&updated));
            updated
        };

        if origin.is_local() {
            self.publish(BroadcastMessage::device_status(device_id, status, timestamp));
        }

        Ok(updated)
    }

    /// Per-device section for an update
    ///
    /// Local updates always get a session. Remote replays only join one that
    /// already exists: without local listeners there is nobody to order
    /// notifications for, and the cache applies each mutation atomically.
    fn section_for(&self, origin: Origin, device_id: DeviceId) -> Option<Arc<Session>> {
        if origin.is_local() {
            Some(self.registry.session(device_id))
        } else {
            self.registry.existing(device_id)
        }
    }

    /// Record a new position
    ///
    /// Local positions are stored first (best effort, the assigned id is
    /// set on the returned position), then offered to the cache as the
    /// device's latest. Listeners are notified of every local position, and
    /// of remote positions the cache accepted. An idle device reporting a
    /// local position goes back online.
    pub fn update_position(&self, origin: Origin, mut position: Position) -> Position {
        let device_id = position.device_id;

        if origin.is_local() {
            if let Some(id) = self.persist(Some(device_id), Record::Position(position.clone())) {
                position.id = Some(id);
            }
        }

        let session = self.section_for(origin, device_id);
        let resume = {
            let _section = session.as_ref().map(|session| session.dispatch.lock());

            let accepted = self.cache.update_position(&position);
            if let Some(position_id) = position.id.filter(|_| accepted) {
                self.cache
                    .update_device(device_id, &mut |device| device.position_id = Some(position_id));
            }

            if origin.is_local() {
                self.registry.touch(device_id, Utc::now());
            }

            if accepted || origin.is_local() {
                let listeners = self.registry.listeners(device_id);
                self.notify(device_id, &listeners, |listener| listener.on_update_position(&position));
            } else {
                tracing::debug!(%device_id, fix_time = %position.fix_time, "Ignoring stale remote position");
            }

            origin.is_local()
                && self
                    .cache
                    .get_device(device_id)
                    .is_some_and(|device| device.status == DeviceStatus::Idle)
        };

        if origin.is_local() {
            self.publish(BroadcastMessage::Position {
                position: position.clone(),
            });
        }

        if resume {
            if let Err(error) = self.update_device(Origin::Local, device_id, DeviceStatus::Online, Utc::now()) {
                tracing::warn!(%device_id, %error, "Failed to resume idle device");
            }
        }

        position
    }

    /// Record an event
    ///
    /// Local events are stored (best effort) and published; listeners of the
    /// event's device are notified either way.
    pub fn update_event(&self, origin: Origin, mut event: Event) -> Event {
        let device_id = event.device_id;

        if origin.is_local() {
            if let Some(id) = self.persist(Some(device_id), Record::Event(event.clone())) {
                event.id = Some(id);
            }
        }

        if let Some(session) = self.section_for(origin, device_id) {
            let _section = session.dispatch.lock();
            let listeners = self.registry.listeners(device_id);
            self.notify(device_id, &listeners, |listener| listener.on_update_event(&event));
        }

        if origin.is_local() {
            self.publish(BroadcastMessage::Event { event: event.clone() });
        }

        event
    }

    /// Record a raw protocol log line
    ///
    /// Always stored (best effort), never broadcast. The device comes from
    /// the record, or from the connection it arrived on. Returns the device
    /// whose listeners were notified, if one could be resolved.
    pub fn update_log(&self, record: LogRecord) -> Option<DeviceId> {
        let device_id = record
            .device_id
            .or_else(|| self.registry.device_for_connection(&record.connection_key));

        self.persist(device_id, Record::Log(record.clone()));

        let Some(device_id) = device_id else {
            tracing::trace!(connection = %record.connection_key, "Log without a known device");
            return None;
        };

        let session = self.registry.session(device_id);
        let _section = session.dispatch.lock();
        let listeners = self.registry.listeners(device_id);
        self.notify(device_id, &listeners, |listener| listener.on_update_log(&record));

        Some(device_id)
    }

    /// Associate a live connection with an identified device
    pub fn device_connected(&self, device_id: DeviceId, key: ConnectionKey) {
        tracing::debug!(%device_id, connection = %key, "Device connected");
        self.registry.update_connection(device_id, key, Utc::now());
    }

    /// Handle a closed channel
    ///
    /// Every device whose current connection was on `channel` becomes
    /// offline, or unknown when its protocol cannot report going offline.
    /// The connection association is cleared in every case. Returns the
    /// affected devices.
    pub fn device_disconnected(&self, channel: ChannelId, supports_offline: bool) -> Vec<DeviceId> {
        let devices = self.registry.clear_connection(channel);
        let status = if supports_offline {
            DeviceStatus::Offline
        } else {
            DeviceStatus::Unknown
        };

        for &device_id in &devices {
            if let Err(error) = self.update_device(Origin::Local, device_id, status, Utc::now()) {
                tracing::warn!(%device_id, %channel, %error, "Failed to apply disconnect status");
            }
        }

        devices
    }

    /// Apply an envelope received from the broadcast channel
    ///
    /// Envelopes published by this node are ignored; the rest are applied
    /// as remote updates and never published again.
    pub fn handle_broadcast(&self, envelope: Envelope) -> Result<()> {
        if envelope.origin == self.node_id {
            tracing::trace!("Ignoring own broadcast");
            return Ok(());
        }

        tracing::trace!(origin = %envelope.origin, device_id = %envelope.message.device_id(), "Applying remote update");

        match envelope.message {
            BroadcastMessage::DeviceStatus {
                device_id,
                status,
                timestamp,
            } => self.update_device(Origin::Remote, device_id, status, timestamp).map(|_| ()),
            BroadcastMessage::Position { position } => {
                self.update_position(Origin::Remote, position);
                Ok(())
            }
            BroadcastMessage::Event { event } => {
                self.update_event(Origin::Remote, event);
                Ok(())
            }
        }
    }

    /// Register a listener for a device
    ///
    /// The device is resolved first so the cache is warm for the first
    /// dispatch. A device unknown to both cache and storage still
    /// registers; only a failing storage lookup is an error. Returns whether
    /// the listener was newly added.
    pub fn add_listener(&self, device_id: DeviceId, listener: Arc<dyn UpdateListener>) -> Result<bool> {
        match self.resolve_device(device_id) {
            Ok(_) | Err(SessionError::DeviceNotFound(_)) => {}
            Err(error) => return Err(error),
        }

        Ok(self.registry.add_listener(device_id, listener))
    }

    pub fn remove_listener(&self, device_id: DeviceId, listener: &Arc<dyn UpdateListener>) -> bool {
        self.registry.remove_listener(device_id, listener)
    }

    pub fn listeners(&self, device_id: DeviceId) -> Vec<Arc<dyn UpdateListener>> {
        self.registry.listeners(device_id)
    }

    /// Demote devices that have been silent for the idle timeout
    ///
    /// Only devices with activity on this node are considered; devices
    /// connected elsewhere are demoted by their own node. Demotions go
    /// through the local update path but do not count as activity.
    pub fn sweep_inactive(&self, now: DateTime<Utc>) -> Vec<DeviceId> {
        let mut demoted = Vec::new();

        for device_id in self.registry.session_devices() {
            let Some(last_activity) = self.registry.last_activity(device_id) else {
                continue;
            };

            let Some(session) = self.registry.existing(device_id) else {
                continue;
            };
            let _section = session.dispatch.lock();

            let Some(device) = self.cache.get_device(device_id) else {
                continue;
            };
            let Some(status) = self.state_machine.demotion(&device, Some(last_activity), now) else {
                continue;
            };

            match self.dispatch_status(Origin::Local, device_id, status, now, false) {
                Ok(_) => demoted.push(device_id),
                Err(error) => tracing::warn!(%device_id, %error, "Failed to demote inactive device"),
            }
        }

        if !demoted.is_empty() {
            tracing::debug!(count = demoted.len(), "Inactive devices demoted");
        }
        demoted
    }

    /// Ping every registered listener once
    ///
    /// A listener registered for several devices is pinged once. Returns the
    /// number of listeners pinged.
    pub fn keepalive(&self) -> usize {
        let mut seen: Vec<(DeviceId, Arc<dyn UpdateListener>)> = Vec::new();

        for (device_id, listener) in self.registry.all_listeners() {
            let duplicate = seen
                .iter()
                .any(|(_, l)| std::ptr::eq(Arc::as_ptr(l) as *const (), Arc::as_ptr(&listener) as *const ()));
            if !duplicate {
                seen.push((device_id, listener));
            }
        }

        for (device_id, listener) in &seen {
            self.notify(*device_id, std::slice::from_ref(listener), |l| l.on_keepalive());
        }

        tracing::trace!(listeners = seen.len(), "Keepalive sent");
        seen.len()
    }

    /// Cache first, then storage with a read-through fill
    fn resolve_device(&self, device_id: DeviceId) -> Result<Device> {
        if let Some(device) = self.cache.get_device(device_id) {
            return Ok(device);
        }

        match self.storage.get_device(device_id)? {
            Some(device) => {
                tracing::trace!(%device_id, "Device loaded from storage");
                Ok(self.cache.fill_device(device))
            }
            None => Err(SessionError::DeviceNotFound(device_id)),
        }
    }

    /// Call every listener, isolating errors and panics
    fn notify<F>(&self, device_id: DeviceId, listeners: &[Arc<dyn UpdateListener>], call: F)
    where
        F: Fn(&dyn UpdateListener) -> std::result::Result<(), ListenerError>,
    {
        for listener in listeners {
            let message = match catch_unwind(AssertUnwindSafe(|| call(listener.as_ref()))) {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            self.listener_failures.fetch_add(1, Ordering::Relaxed);
            let failure = SessionError::ListenerFailure { device_id, message };
            tracing::warn!(%device_id, error = %failure, "Listener failed, continuing dispatch");
        }
    }

    fn persist(&self, device_id: Option<DeviceId>, record: Record) -> Option<u64> {
        match self.storage.write_record(&record) {
            Ok(id) => Some(id),
            Err(error) => {
                tracing::warn!(?device_id, kind = record.kind(), %error, "Failed to store record");
                None
            }
        }
    }

    fn publish(&self, message: BroadcastMessage) {
        if self.broadcast.is_single_node() {
            return;
        }

        let device_id = message.device_id();
        if let Err(error) = self.broadcast.publish(&Envelope::new(self.node_id, message)) {
            tracing::warn!(%device_id, %error, "Failed to publish update");
        }
    }
}

impl std::fmt::Debug for UpdateDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateDispatcher")
            .field("node_id", &self.node_id)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{ChannelListener, ListenerUpdate};
    use crate::storage::MemoryStorage;
    use device_cache::InMemoryCache;
    use fleet_broadcast::NullBroadcast;

    fn dispatcher(devices: Vec<Device>) -> UpdateDispatcher {
        UpdateDispatcher::new(
            SessionConfig::fast(),
            Arc::new(InMemoryCache::new()),
            Arc::new(MemoryStorage::with_devices(devices)),
            Arc::new(NullBroadcast),
            Arc::new(SessionRegistry::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = UpdateDispatcher::new(
            SessionConfig::new().with_idle_timeout(std::time::Duration::ZERO),
            Arc::new(InMemoryCache::new()),
            Arc::new(MemoryStorage::new()),
            Arc::new(NullBroadcast),
            Arc::new(SessionRegistry::new()),
        );
        assert!(matches!(result, Err(SessionError::Configuration(_))));
    }

    #[test]
    fn test_unknown_device_not_found() {
        let dispatcher = dispatcher(vec![]);
        let result = dispatcher.update_device(Origin::Local, DeviceId::new(9), DeviceStatus::Online, Utc::now());
        assert!(matches!(result, Err(SessionError::DeviceNotFound(id)) if id == DeviceId::new(9)));
    }

    #[test]
    fn test_read_through_fills_cache() {
        let id = DeviceId::new(1);
        let dispatcher = dispatcher(vec![Device::new(id, "Unit", "U1")]);
        assert!(dispatcher.cache().get_device(id).is_none());

        dispatcher
            .update_device(Origin::Local, id, DeviceStatus::Connecting, Utc::now())
            .unwrap();

        assert_eq!(
            dispatcher.cache().get_device(id).map(|d| d.status),
            Some(DeviceStatus::Connecting)
        );
    }

    #[test]
    fn test_own_broadcast_ignored() {
        let id = DeviceId::new(1);
        let dispatcher = dispatcher(vec![Device::new(id, "Unit", "U1")]);
        let envelope = Envelope::new(
            dispatcher.node_id(),
            BroadcastMessage::device_status(id, DeviceStatus::Online, Utc::now()),
        );

        dispatcher.handle_broadcast(envelope).unwrap();
        assert!(dispatcher.cache().get_device(id).is_none());
    }

    #[test]
    fn test_log_resolves_device_from_connection() {
        let id = DeviceId::new(1);
        let dispatcher = dispatcher(vec![Device::new(id, "Unit", "U1")]);
        let key = ConnectionKey::new(
            ChannelId::new(3),
            "h02",
            "10.0.0.1:5013".parse().unwrap(),
            "172.16.0.9:40000".parse().unwrap(),
        );
        let (listener, rx) = ChannelListener::new();
        dispatcher.add_listener(id, listener).unwrap();
        dispatcher.device_connected(id, key.clone());

        let resolved = dispatcher.update_log(LogRecord::new(key, "*HQ,865205030330012,V1#"));

        assert_eq!(resolved, Some(id));
        assert!(matches!(rx.try_recv(), Ok(ListenerUpdate::Log(_))));
    }

    #[test]
    fn test_remote_replay_without_listeners_keeps_no_session() {
        let id = DeviceId::new(1);
        let dispatcher = dispatcher(vec![Device::new(id, "Unit", "U1")]);
        let origin = NodeId::random();
        let now = Utc::now();

        for message in [
            BroadcastMessage::device_status(id, DeviceStatus::Online, now),
            BroadcastMessage::Position {
                position: Position::new(id, "osmand", now, 52.52, 13.405),
            },
            BroadcastMessage::Event {
                event: Event::new("deviceOnline", id),
            },
        ] {
            dispatcher.handle_broadcast(Envelope::new(origin, message)).unwrap();
        }

        assert_eq!(dispatcher.registry().session_count(), 0);
        assert_eq!(dispatcher.cache().get_device(id).map(|d| d.status), Some(DeviceStatus::Online));
        assert!(dispatcher.cache().latest_position(id).is_some());
    }

    #[test]
    fn test_stale_remote_status_ignored_without_session() {
        let id = DeviceId::new(1);
        let dispatcher = dispatcher(vec![Device::new(id, "Unit", "U1")]);
        let now = Utc::now();

        dispatcher.update_device(Origin::Remote, id, DeviceStatus::Online, now).unwrap();
        let kept = dispatcher
            .update_device(Origin::Remote, id, DeviceStatus::Offline, now - chrono::Duration::seconds(30))
            .unwrap();

        assert_eq!(kept.status, DeviceStatus::Online);
        assert_eq!(dispatcher.registry().session_count(), 0);
    }

    #[test]
    fn test_panic_message() {
        let panic = catch_unwind(|| {
            panic!("boom");
        })
        .unwrap_err();
        assert_eq!(panic_message(panic.as_ref()), "panicked: boom");
    }
}
