//! Fleet data model
//!
//! Plain data types shared by the cache, broadcast and session crates.
//! Everything here is `Clone + Serialize + Deserialize` so the same values
//! can sit in the device cache, travel over the cluster broadcast channel
//! and be handed to listeners.
//!
//! # Overview
//!
//! ```text
//! Device ─── status: DeviceStatus
//!   │
//!   ├── latest Position (cached separately)
//!   ├── Event*           (point-in-time, keyed by DeviceId)
//!   └── LogRecord*       (point-in-time, keyed by ConnectionKey)
//! ```

pub mod device;
pub mod event;
pub mod ids;
pub mod position;
pub mod status;

pub use device::Device;
pub use event::{Event, LogRecord};
pub use ids::{ChannelId, ConnectionKey, DeviceId};
pub use position::Position;
pub use status::{DeviceStatus, ParseStatusError};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ChannelId, ConnectionKey, Device, DeviceId, DeviceStatus, Event, LogRecord, Position,
    };
}
