//! Persistent storage boundary
//!
//! The core needs very little from storage: resolve a device on a cache
//! miss, and append position, event and log records. Failures are error
//! values, never silent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use fleet_model::{Device, DeviceId, Event, LogRecord, Position};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

/// Errors reported by a storage backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Backend unreachable or timed out; may succeed on retry
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Backend refused the record
    #[error("Storage rejected record: {0}")]
    Rejected(String),
}

/// A record appended to storage
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Position(Position),
    Event(Event),
    Log(LogRecord),
}

impl Record {
    /// Short name of the record type, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Position(_) => "position",
            Record::Event(_) => "event",
            Record::Log(_) => "log",
        }
    }
}

/// Storage boundary used by the session core
pub trait Storage: Send + Sync {
    /// Look a device up by id
    fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StorageError>;

    /// Append a record, returning its assigned id
    fn write_record(&self, record: &Record) -> Result<u64, StorageError>;
}

/// In-memory storage backend
///
/// Keeps a device table and an append-only record log with a shared id
/// sequence. Suitable for tests and single-process deployments without a
/// database.
#[derive(Debug)]
pub struct MemoryStorage {
    devices: RwLock<HashMap<DeviceId, Device>>,
    records: Mutex<Vec<(u64, Record)>>,
    next_id: AtomicU64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            records: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a storage with a pre-filled device table
    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let storage = Self::new();
        for device in devices {
            storage.insert_device(device);
        }
        storage
    }

    pub fn insert_device(&self, device: Device) {
        self.devices.write().insert(device.id, device);
    }

    /// Every appended record, oldest first
    pub fn records(&self) -> Vec<(u64, Record)> {
        self.records.lock().clone()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.records
            .lock()
            .iter()
            .filter_map(|(_, record)| match record {
                Record::Position(position) => Some(position.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<Event> {
        self.records
            .lock()
            .iter()
            .filter_map(|(_, record)| match record {
                Record::Event(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn logs(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter_map(|(_, record)| match record {
                Record::Log(log) => Some(log.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StorageError> {
        Ok(self.devices.read().get(&id).cloned())
    }

    fn write_record(&self, record: &Record) -> Result<u64, StorageError> {
        // Relaxed is enough, ids only need to be unique
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.records.lock().push((id, record.clone()));
        Ok(id)
    }
}
