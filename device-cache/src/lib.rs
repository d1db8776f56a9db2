//! Device Cache
//!
//! Short-term authoritative store for the latest known device record and
//! latest position of every device. The session core never keeps its own
//! copy of "current" state; every status or position write goes through a
//! [`CacheManager`].
//!
//! # Quick Start
//!
//! ```rust
//! use device_cache::{CacheManager, InMemoryCache};
//! use fleet_model::{Device, DeviceId, DeviceStatus};
//!
//! let cache = InMemoryCache::new();
//! let id = DeviceId::new(12345);
//! cache.put_device(Device::new(id, "Truck 7", "356938035643809"));
//!
//! // Atomic read-modify-write of one entry
//! let updated = cache.update_device(id, &mut |device| device.status = DeviceStatus::Online);
//! assert_eq!(updated.map(|d| d.status), Some(DeviceStatus::Online));
//! ```
//!
//! # Architecture
//!
//! ```text
//! InMemoryCache
//!     │
//!     └── entries: DashMap<DeviceId, CacheEntry>
//!             │
//!             ├── device:   Option<Device>
//!             └── position: Option<Position>   (latest by fix time)
//! ```

pub mod memory;

pub use memory::InMemoryCache;

use fleet_model::{Device, DeviceId, Position};

/// Cache boundary used by the session core
///
/// Implementations must make `update_device` atomic per entry: two
/// near-simultaneous updates touching different fields of the same device
/// must both land.
pub trait CacheManager: Send + Sync {
    /// Get the cached device, `None` on a miss
    fn get_device(&self, id: DeviceId) -> Option<Device>;

    /// Insert or replace a device
    fn put_device(&self, device: Device);

    /// Read-through fill: insert `device` only if nothing is cached yet
    ///
    /// Returns the cached copy, which is the existing entry when another
    /// writer got there first.
    fn fill_device(&self, device: Device) -> Device;

    /// Apply `f` to the cached device and return the updated copy
    ///
    /// Returns `None` without calling `f` when the device is not cached.
    /// `f` runs under the entry lock and must not call back into the cache.
    fn update_device(&self, id: DeviceId, f: &mut dyn FnMut(&mut Device)) -> Option<Device>;

    /// Latest accepted position for a device
    fn latest_position(&self, id: DeviceId) -> Option<Position>;

    /// Offer a position as the device's latest
    ///
    /// Accepted when no latest exists or its fix time is newer or equal.
    /// Returns whether it was accepted.
    fn update_position(&self, position: &Position) -> bool;

    /// Ids of every cached device
    fn device_ids(&self) -> Vec<DeviceId>;
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::memory::InMemoryCache;
    pub use crate::CacheManager;
}
