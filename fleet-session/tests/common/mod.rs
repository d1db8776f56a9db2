//! Shared doubles for the session integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use device_cache::InMemoryCache;
use fleet_broadcast::{BroadcastError, BroadcastService, Envelope, NullBroadcast};
use fleet_model::{Device, DeviceId, DeviceStatus, Position};
use fleet_session::storage::Record;
use fleet_session::{
    ListenerError, MemoryStorage, SessionConfig, SessionRegistry, Storage, StorageError, UpdateDispatcher,
    UpdateListener,
};
use parking_lot::Mutex;

/// Broadcast service remembering everything it was asked to publish
#[derive(Default)]
pub struct RecordingBroadcast {
    published: Mutex<Vec<Envelope>>,
}

impl RecordingBroadcast {
    pub fn published(&self) -> Vec<Envelope> {
        self.published.lock().clone()
    }
}

impl BroadcastService for RecordingBroadcast {
    fn publish(&self, envelope: &Envelope) -> fleet_broadcast::Result<()> {
        self.published.lock().push(envelope.clone());
        Ok(())
    }
}

/// Broadcast service whose publish always fails
pub struct BrokenBroadcast;

impl BroadcastService for BrokenBroadcast {
    fn publish(&self, _envelope: &Envelope) -> fleet_broadcast::Result<()> {
        Err(BroadcastError::Disconnected)
    }
}

/// Storage that is down
pub struct FailingStorage;

impl Storage for FailingStorage {
    fn get_device(&self, _id: DeviceId) -> Result<Option<Device>, StorageError> {
        Err(StorageError::Unavailable("connection refused".to_string()))
    }

    fn write_record(&self, _record: &Record) -> Result<u64, StorageError> {
        Err(StorageError::Unavailable("connection refused".to_string()))
    }
}

/// Listener counting device notifications
#[derive(Default)]
pub struct CountingListener {
    pub devices: AtomicUsize,
    pub positions: AtomicUsize,
}

impl CountingListener {
    pub fn device_count(&self) -> usize {
        self.devices.load(Ordering::SeqCst)
    }

    pub fn position_count(&self) -> usize {
        self.positions.load(Ordering::SeqCst)
    }
}

impl UpdateListener for CountingListener {
    fn on_update_device(&self, _device: &Device) -> Result<(), ListenerError> {
        self.devices.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_update_position(&self, _position: &Position) -> Result<(), ListenerError> {
        self.positions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Listener remembering every status it was notified of, in order
#[derive(Default)]
pub struct StatusLog {
    statuses: Mutex<Vec<DeviceStatus>>,
    positions: AtomicUsize,
}

impl StatusLog {
    pub fn statuses(&self) -> Vec<DeviceStatus> {
        self.statuses.lock().clone()
    }

    pub fn position_count(&self) -> usize {
        self.positions.load(Ordering::SeqCst)
    }
}

impl UpdateListener for StatusLog {
    fn on_update_device(&self, device: &Device) -> Result<(), ListenerError> {
        self.statuses.lock().push(device.status);
        Ok(())
    }

    fn on_update_position(&self, _position: &Position) -> Result<(), ListenerError> {
        self.positions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Listener that always reports an error
pub struct FailingListener;

impl UpdateListener for FailingListener {
    fn on_update_device(&self, _device: &Device) -> Result<(), ListenerError> {
        Err(ListenerError::new("web socket closed"))
    }
}

/// Listener that panics
pub struct PanickingListener;

impl UpdateListener for PanickingListener {
    fn on_update_device(&self, _device: &Device) -> Result<(), ListenerError> {
        panic!("listener bug");
    }
}

/// Dispatcher over in-memory collaborators, with `devices` in storage
pub fn dispatcher_with(
    devices: Vec<Device>,
    broadcast: Arc<dyn BroadcastService>,
) -> UpdateDispatcher {
    fleet_session::init_test_logging();

    UpdateDispatcher::new(
        SessionConfig::fast(),
        Arc::new(InMemoryCache::new()),
        Arc::new(MemoryStorage::with_devices(devices)),
        broadcast,
        Arc::new(SessionRegistry::new()),
    )
    .unwrap()
}

pub fn dispatcher(devices: Vec<Device>) -> UpdateDispatcher {
    dispatcher_with(devices, Arc::new(NullBroadcast))
}

pub fn device(id: u64) -> Device {
    Device::new(DeviceId::new(id), format!("Unit {}", id), format!("35693803564{:04}", id))
}
