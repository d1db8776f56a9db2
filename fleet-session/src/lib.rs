//! # Fleet Session
//!
//! Session core of a GPS tracking server: which listeners care about which
//! device, which connection a device is on, and how status, position, event
//! and log updates flow from protocol connectors to those listeners and to
//! the other nodes of the cluster.
//!
//! ## Key Features
//!
//! - **Single dispatch path**: every device-state change goes through the
//!   [`UpdateDispatcher`], with per-device ordering and no cross-device
//!   contention
//! - **Cache-backed state**: current status and latest position live in a
//!   [`device_cache::CacheManager`], read through to [`Storage`] on a miss
//! - **Isolated listeners**: an erroring or panicking listener is logged
//!   and skipped, its siblings are still notified
//! - **Cluster aware**: local updates are published through a
//!   [`fleet_broadcast::BroadcastService`], remote ones replayed without
//!   republishing
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use device_cache::InMemoryCache;
//! use fleet_broadcast::NullBroadcast;
//! use fleet_model::{Device, DeviceId, DeviceStatus};
//! use fleet_session::{
//!     ChannelListener, ListenerUpdate, MemoryStorage, Origin, SessionConfig, SessionRegistry,
//!     UpdateDispatcher,
//! };
//!
//! let id = DeviceId::new(12345);
//! let storage = MemoryStorage::with_devices([Device::new(id, "Truck 7", "356938035643809")]);
//!
//! let dispatcher = UpdateDispatcher::new(
//!     SessionConfig::default(),
//!     Arc::new(InMemoryCache::new()),
//!     Arc::new(storage),
//!     Arc::new(NullBroadcast),
//!     Arc::new(SessionRegistry::new()),
//! )?;
//!
//! let (listener, updates) = ChannelListener::new();
//! dispatcher.add_listener(id, listener)?;
//!
//! dispatcher.update_device(Origin::Local, id, DeviceStatus::Connecting, Utc::now())?;
//!
//! match updates.try_recv() {
//!     Ok(ListenerUpdate::Device(device)) => assert_eq!(device.status, DeviceStatus::Connecting),
//!     other => panic!("unexpected update: {:?}", other),
//! }
//! # Ok::<(), fleet_session::SessionError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//!  connectors ──► UpdateDispatcher ──► listeners
//!                   │    │     │
//!                   │    │     └──► BroadcastService ──► other nodes
//!                   │    └──► Storage (positions, events, logs)
//!                   └──► CacheManager (status, latest position)
//!
//!  other nodes ──► broadcast pump ──► UpdateDispatcher (remote origin)
//!  InactivityMonitor ──► sweep_inactive / keepalive
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod logging;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod state;
pub mod storage;

// Re-export main types for convenience
pub use config::SessionConfig;
pub use dispatcher::{Origin, UpdateDispatcher};
pub use error::{Result, SessionError};
pub use listener::{ChannelListener, ListenerError, ListenerUpdate, UpdateListener};
pub use logging::{init_logging, init_logging_from_env, init_test_logging, LoggingError, LoggingMode};
pub use monitor::{spawn_broadcast_pump, InactivityMonitor};
pub use registry::SessionRegistry;
pub use server::{ConnectorError, Protocol, ServerManager, TrackerConnector};
pub use state::{StateMachine, Transition};
pub use storage::{MemoryStorage, Record, Storage, StorageError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ChannelListener, ListenerUpdate, MemoryStorage, Origin, SessionConfig, SessionError,
        SessionRegistry, Storage, UpdateDispatcher, UpdateListener,
    };
}
