//! In-memory cache backed by a concurrent map

use std::sync::Arc;

use dashmap::DashMap;
use fleet_model::{Device, DeviceId, Position};

use crate::CacheManager;

/// Everything cached for one device id
#[derive(Debug, Default, Clone)]
struct CacheEntry {
    device: Option<Device>,
    position: Option<Position>,
}

/// Default [`CacheManager`] implementation
///
/// Clones share the same underlying map, so one instance can be handed to
/// the dispatcher while tests or API handlers keep another.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<DashMap<DeviceId, CacheEntry>>,
}

impl InMemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Create a cache pre-filled with devices
    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let cache = Self::new();
        for device in devices {
            cache.put_device(device);
        }
        cache
    }

    /// Number of cached devices
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().device.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the cached latest position of a device
    ///
    /// The device record itself stays; the next accepted position refills it.
    pub fn invalidate(&self, id: DeviceId) -> bool {
        self.entries
            .get_mut(&id)
            .map(|mut entry| entry.position.take().is_some())
            .unwrap_or(false)
    }
}

impl CacheManager for InMemoryCache {
    fn get_device(&self, id: DeviceId) -> Option<Device> {
        self.entries.get(&id)?.device.clone()
    }

    fn put_device(&self, device: Device) {
        tracing::trace!(device_id = %device.id, "Caching device");
        let id = device.id;
        self.entries.entry(id).or_default().device = Some(device);
    }

    fn fill_device(&self, device: Device) -> Device {
        let mut entry = self.entries.entry(device.id).or_default();
        if let Some(existing) = &entry.device {
            return existing.clone();
        }

        tracing::trace!(device_id = %device.id, "Filling cache from storage");
        entry.device = Some(device.clone());
        device
    }

    fn update_device(&self, id: DeviceId, f: &mut dyn FnMut(&mut Device)) -> Option<Device> {
        let mut entry = self.entries.get_mut(&id)?;
        let device = entry.device.as_mut()?;
        f(device);
        Some(device.clone())
    }

    fn latest_position(&self, id: DeviceId) -> Option<Position> {
        self.entries.get(&id)?.position.clone()
    }

    fn update_position(&self, position: &Position) -> bool {
        let mut entry = self.entries.entry(position.device_id).or_default();
        let accepted = entry
            .position
            .as_ref()
            .map_or(true, |current| position.supersedes(current));

        if accepted {
            entry.position = Some(position.clone());
        } else {
            tracing::trace!(
                device_id = %position.device_id,
                fix_time = %position.fix_time,
                "Ignoring stale position"
            );
        }
        accepted
    }

    fn device_ids(&self) -> Vec<DeviceId> {
        self.entries
            .iter()
            .filter(|entry| entry.value().device.is_some())
            .map(|entry| *entry.key())
            .collect()
    }
}

impl std::fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("device_count", &self.len())
            .finish()
    }
}
