//! Session registry: listeners and transient connection metadata per device
//!
//! One explicitly owned [`SessionRegistry`] per server process, shared by
//! `Arc` with the dispatcher and whatever registers listeners.
//!
//! # Architecture
//!
//! ```text
//! SessionRegistry
//! ├── sessions:    DashMap<DeviceId, Arc<Session>>
//! │   └── Session
//! │       ├── listeners: RwLock<Vec<Arc<dyn UpdateListener>>>
//! │       ├── meta:      Mutex<SessionMeta>  (connection, last activity)
//! │       └── dispatch:  ReentrantMutex<()>  (per-device critical section)
//! ├── connections: DashMap<ConnectionKey, DeviceId>
//! ├── channels:    DashMap<ChannelId, HashSet<ConnectionKey>>
//! └── rebinding:   Mutex<()>  (connection index changes)
//! ```
//!
//! Listener snapshots are cloned out under a read lock, so a dispatch pass
//! for one device never blocks registration on another.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fleet_model::{ChannelId, ConnectionKey, DeviceId};
use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::listener::UpdateListener;

/// Connection metadata of one device
#[derive(Debug, Default, Clone)]
struct SessionMeta {
    connection: Option<ConnectionKey>,
    last_activity: Option<DateTime<Utc>>,
}

/// Per-device session state
pub(crate) struct Session {
    listeners: RwLock<Vec<Arc<dyn UpdateListener>>>,
    meta: Mutex<SessionMeta>,
    /// Serializes resolve, mutate and notify for this device only.
    /// Re-entrant so a listener may dispatch for the same device.
    pub(crate) dispatch: ReentrantMutex<()>,
}

impl Session {
    fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            meta: Mutex::new(SessionMeta::default()),
            dispatch: ReentrantMutex::new(()),
        }
    }
}

/// Identity comparison on the data pointer, ignoring vtables
fn same_listener(a: &Arc<dyn UpdateListener>, b: &Arc<dyn UpdateListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Registry of listeners and connection metadata, keyed by device
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<DeviceId, Arc<Session>>,
    connections: DashMap<ConnectionKey, DeviceId>,
    channels: DashMap<ChannelId, HashSet<ConnectionKey>>,
    /// Held across a whole connect or channel clear so the device, key and
    /// channel indexes change together
    rebinding: Mutex<()>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or lazily create the session of a device
    pub(crate) fn session(&self, device_id: DeviceId) -> Arc<Session> {
        Arc::clone(
            self.sessions
                .entry(device_id)
                .or_insert_with(|| Arc::new(Session::new()))
                .value(),
        )
    }

    /// Session of a device, without creating one
    pub(crate) fn existing(&self, device_id: DeviceId) -> Option<Arc<Session>> {
        self.sessions.get(&device_id).map(|s| Arc::clone(s.value()))
    }

    /// Register a listener for a device
    ///
    /// Registering the same instance twice keeps a single registration.
    /// Returns whether the listener was newly added.
    pub fn add_listener(&self, device_id: DeviceId, listener: Arc<dyn UpdateListener>) -> bool {
        let session = self.session(device_id);
        let mut listeners = session.listeners.write();

        if listeners.iter().any(|l| same_listener(l, &listener)) {
            tracing::debug!(%device_id, "Listener already registered");
            return false;
        }

        listeners.push(listener);
        tracing::debug!(%device_id, count = listeners.len(), "Listener registered");
        true
    }

    /// Unregister a listener
    ///
    /// Not an error when the listener was never registered; returns whether
    /// anything was removed.
    pub fn remove_listener(&self, device_id: DeviceId, listener: &Arc<dyn UpdateListener>) -> bool {
        let Some(session) = self.existing(device_id) else {
            return false;
        };

        let mut listeners = session.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !same_listener(l, listener));
        let removed = listeners.len() != before;

        if removed {
            tracing::debug!(%device_id, count = listeners.len(), "Listener removed");
        }
        removed
    }

    /// Snapshot of a device's listeners in registration order
    pub fn listeners(&self, device_id: DeviceId) -> Vec<Arc<dyn UpdateListener>> {
        self.existing(device_id)
            .map(|session| session.listeners.read().clone())
            .unwrap_or_default()
    }

    /// Snapshot of every listener with the device it is registered for
    pub fn all_listeners(&self) -> Vec<(DeviceId, Arc<dyn UpdateListener>)> {
        let sessions: Vec<(DeviceId, Arc<Session>)> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        sessions
            .into_iter()
            .flat_map(|(device_id, session)| {
                let listeners = session.listeners.read().clone();
                listeners.into_iter().map(move |l| (device_id, l))
            })
            .collect()
    }

    pub fn listener_count(&self, device_id: DeviceId) -> usize {
        self.existing(device_id)
            .map(|session| session.listeners.read().len())
            .unwrap_or(0)
    }

    /// Associate a live connection with a device
    ///
    /// The newest connection wins: the device's previous key is dropped, and
    /// a key previously held by another device is taken over.
    pub fn update_connection(&self, device_id: DeviceId, key: ConnectionKey, at: DateTime<Utc>) {
        let _rebinding = self.rebinding.lock();
        let session = self.session(device_id);
        let previous = {
            let mut meta = session.meta.lock();
            meta.last_activity = Some(meta.last_activity.map_or(at, |last| last.max(at)));
            meta.connection.replace(key.clone())
        };

        if let Some(previous) = previous.filter(|p| *p != key) {
            self.connections.remove_if(&previous, |_, owner| *owner == device_id);
            self.unindex(&previous);
            tracing::debug!(%device_id, old = %previous, new = %key, "Connection superseded");
        }

        if let Some(other) = self.connections.insert(key.clone(), device_id) {
            if other != device_id {
                if let Some(other_session) = self.existing(other) {
                    let mut meta = other_session.meta.lock();
                    if meta.connection.as_ref() == Some(&key) {
                        meta.connection = None;
                    }
                }
            }
        }
        self.channels.entry(key.channel).or_default().insert(key);
    }

    /// Drop every connection carried by a channel
    ///
    /// Resolves devices from the channel handle alone. Returns the devices
    /// whose current connection was on this channel; devices that already
    /// moved to a newer connection are left alone.
    pub fn clear_connection(&self, channel: ChannelId) -> Vec<DeviceId> {
        let _rebinding = self.rebinding.lock();
        let keys = self
            .channels
            .remove(&channel)
            .map(|(_, keys)| keys)
            .unwrap_or_default();

        let mut devices = Vec::new();
        for key in keys {
            let Some((_, device_id)) = self.connections.remove(&key) else {
                continue;
            };
            let Some(session) = self.existing(device_id) else {
                continue;
            };

            let mut meta = session.meta.lock();
            if meta.connection.as_ref() == Some(&key) {
                meta.connection = None;
                devices.push(device_id);
            }
        }

        tracing::debug!(%channel, devices = devices.len(), "Channel connections cleared");
        devices
    }

    fn unindex(&self, key: &ConnectionKey) {
        if let Some(mut keys) = self.channels.get_mut(&key.channel) {
            keys.remove(key);
        }
        self.channels.remove_if(&key.channel, |_, keys| keys.is_empty());
    }

    /// Device currently bound to a connection
    pub fn device_for_connection(&self, key: &ConnectionKey) -> Option<DeviceId> {
        self.connections.get(key).map(|entry| *entry.value())
    }

    /// Current connection of a device
    pub fn connection(&self, device_id: DeviceId) -> Option<ConnectionKey> {
        self.existing(device_id)?.meta.lock().connection.clone()
    }

    /// Record activity for a device; never moves the timestamp backwards
    pub fn touch(&self, device_id: DeviceId, at: DateTime<Utc>) {
        let session = self.session(device_id);
        let mut meta = session.meta.lock();
        meta.last_activity = Some(meta.last_activity.map_or(at, |last| last.max(at)));
    }

    pub fn last_activity(&self, device_id: DeviceId) -> Option<DateTime<Utc>> {
        self.existing(device_id)?.meta.lock().last_activity
    }

    /// Devices that have a session on this node
    pub fn session_devices(&self) -> Vec<DeviceId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct Noop;
    impl UpdateListener for Noop {}

    fn key(channel: u64, port: u16) -> ConnectionKey {
        ConnectionKey::new(
            ChannelId::new(channel),
            "gt06",
            "10.0.0.1:5023".parse().unwrap(),
            format!("172.16.0.2:{}", port).parse().unwrap(),
        )
    }

    #[test]
    fn test_add_same_listener_twice_keeps_one() {
        let registry = SessionRegistry::new();
        let listener: Arc<dyn UpdateListener> = Arc::new(Noop);

        assert!(registry.add_listener(DeviceId::new(1), Arc::clone(&listener)));
        assert!(!registry.add_listener(DeviceId::new(1), Arc::clone(&listener)));
        assert_eq!(registry.listener_count(DeviceId::new(1)), 1);
    }

    #[test]
    fn test_distinct_instances_both_register() {
        let registry = SessionRegistry::new();
        registry.add_listener(DeviceId::new(1), Arc::new(Noop));
        registry.add_listener(DeviceId::new(1), Arc::new(Noop));
        assert_eq!(registry.listener_count(DeviceId::new(1)), 2);
    }

    #[test]
    fn test_remove_unknown_listener_is_noop() {
        let registry = SessionRegistry::new();
        let listener: Arc<dyn UpdateListener> = Arc::new(Noop);

        assert!(!registry.remove_listener(DeviceId::new(1), &listener));
        assert_eq!(registry.session_count(), 0);

        registry.add_listener(DeviceId::new(1), Arc::new(Noop));
        assert!(!registry.remove_listener(DeviceId::new(1), &listener));
        assert_eq!(registry.listener_count(DeviceId::new(1)), 1);
    }

    #[test]
    fn test_listeners_keep_registration_order() {
        let registry = SessionRegistry::new();
        let first: Arc<dyn UpdateListener> = Arc::new(Noop);
        let second: Arc<dyn UpdateListener> = Arc::new(Noop);

        registry.add_listener(DeviceId::new(1), Arc::clone(&first));
        registry.add_listener(DeviceId::new(1), Arc::clone(&second));

        let snapshot = registry.listeners(DeviceId::new(1));
        assert!(same_listener(&snapshot[0], &first));
        assert!(same_listener(&snapshot[1], &second));
    }

    #[test]
    fn test_newer_connection_supersedes() {
        let registry = SessionRegistry::new();
        let device = DeviceId::new(1);
        let now = Utc::now();

        registry.update_connection(device, key(1, 4000), now);
        registry.update_connection(device, key(2, 4001), now);

        assert_eq!(registry.connection(device), Some(key(2, 4001)));
        assert_eq!(registry.device_for_connection(&key(1, 4000)), None);
        assert_eq!(registry.device_for_connection(&key(2, 4001)), Some(device));

        // The old channel no longer resolves to the device
        assert!(registry.clear_connection(ChannelId::new(1)).is_empty());
        assert_eq!(registry.connection(device), Some(key(2, 4001)));
    }

    #[test]
    fn test_clear_connection_resolves_from_channel() {
        let registry = SessionRegistry::new();
        let now = Utc::now();

        // A datagram channel carrying two devices
        registry.update_connection(DeviceId::new(1), key(7, 4000), now);
        registry.update_connection(DeviceId::new(2), key(7, 4001), now);
        registry.update_connection(DeviceId::new(3), key(8, 4002), now);

        let mut cleared = registry.clear_connection(ChannelId::new(7));
        cleared.sort();

        assert_eq!(cleared, vec![DeviceId::new(1), DeviceId::new(2)]);
        assert!(registry.connection(DeviceId::new(1)).is_none());
        assert_eq!(registry.connection(DeviceId::new(3)), Some(key(8, 4002)));
        assert!(registry.clear_connection(ChannelId::new(7)).is_empty());
    }

    #[test]
    fn test_key_taken_over_by_other_device() {
        let registry = SessionRegistry::new();
        let now = Utc::now();

        registry.update_connection(DeviceId::new(1), key(1, 4000), now);
        registry.update_connection(DeviceId::new(2), key(1, 4000), now);

        assert!(registry.connection(DeviceId::new(1)).is_none());
        assert_eq!(registry.device_for_connection(&key(1, 4000)), Some(DeviceId::new(2)));
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let registry = SessionRegistry::new();
        let device = DeviceId::new(1);
        let now = Utc::now();

        registry.touch(device, now);
        registry.touch(device, now - Duration::seconds(30));

        assert_eq!(registry.last_activity(device), Some(now));
    }
}
