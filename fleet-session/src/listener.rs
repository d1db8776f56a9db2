//! Listener capability
//!
//! Anything that wants updates for a device implements [`UpdateListener`]
//! and registers itself with the dispatcher. The dispatcher holds listeners
//! by `Arc`; their lifetime belongs to whoever registered them (typically an
//! API or web-socket connection), which must unregister on teardown.

use std::sync::mpsc;

use fleet_model::{Device, Event, LogRecord, Position};
use thiserror::Error;

/// Error a listener reports back to the dispatcher
///
/// Isolated per listener: it is logged and the dispatch continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ListenerError(String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Receiver of device updates
///
/// Every method defaults to doing nothing, so implementors only override
/// the notifications they care about.
pub trait UpdateListener: Send + Sync {
    /// Periodic liveness ping with no payload
    fn on_keepalive(&self) -> Result<(), ListenerError> {
        Ok(())
    }

    fn on_update_device(&self, _device: &Device) -> Result<(), ListenerError> {
        Ok(())
    }

    fn on_update_position(&self, _position: &Position) -> Result<(), ListenerError> {
        Ok(())
    }

    fn on_update_event(&self, _event: &Event) -> Result<(), ListenerError> {
        Ok(())
    }

    fn on_update_log(&self, _record: &LogRecord) -> Result<(), ListenerError> {
        Ok(())
    }
}

/// One notification, as forwarded by [`ChannelListener`]
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerUpdate {
    Keepalive,
    Device(Device),
    Position(Position),
    Event(Event),
    Log(LogRecord),
}

/// Listener forwarding every notification into a channel
///
/// Handy for consumers that process updates on their own thread. Once the
/// receiver is dropped every notification fails, which the dispatcher logs
/// until the owner unregisters the listener.
#[derive(Debug)]
pub struct ChannelListener {
    tx: mpsc::Sender<ListenerUpdate>,
}

impl ChannelListener {
    /// Create a listener and the receiver of its updates
    pub fn new() -> (std::sync::Arc<Self>, mpsc::Receiver<ListenerUpdate>) {
        let (tx, rx) = mpsc::channel();
        (std::sync::Arc::new(Self { tx }), rx)
    }

    fn forward(&self, update: ListenerUpdate) -> Result<(), ListenerError> {
        self.tx
            .send(update)
            .map_err(|_| ListenerError::new("listener receiver dropped"))
    }
}

impl UpdateListener for ChannelListener {
    fn on_keepalive(&self) -> Result<(), ListenerError> {
        self.forward(ListenerUpdate::Keepalive)
    }

    fn on_update_device(&self, device: &Device) -> Result<(), ListenerError> {
        self.forward(ListenerUpdate::Device(device.clone()))
    }

    fn on_update_position(&self, position: &Position) -> Result<(), ListenerError> {
        self.forward(ListenerUpdate::Position(position.clone()))
    }

    fn on_update_event(&self, event: &Event) -> Result<(), ListenerError> {
        self.forward(ListenerUpdate::Event(event.clone()))
    }

    fn on_update_log(&self, record: &LogRecord) -> Result<(), ListenerError> {
        self.forward(ListenerUpdate::Log(record.clone()))
    }
}
