//! Connector lifecycle
//!
//! Connectors are the upstream producers: each owns a listening socket for
//! one tracker protocol, decodes traffic and calls into the dispatcher. The
//! [`ServerManager`] starts and stops them as a group and looks protocols up
//! by name.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

/// Errors raised while starting a connector
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Socket could not be bound
    #[error("Failed to bind {name}: {source}")]
    Bind {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Connector is misconfigured
    #[error("Connector {name} misconfigured: {message}")]
    Configuration { name: String, message: String },
}

/// A protocol connector
pub trait TrackerConnector: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    fn start(&self) -> Result<(), ConnectorError>;

    fn stop(&self);
}

/// A tracker protocol decoder, known by name
pub trait Protocol: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the protocol can tell a device went offline
    ///
    /// Decides the status applied when one of its channels closes.
    fn supports_offline(&self) -> bool {
        true
    }
}

/// Starts and stops every connector of the server
pub struct ServerManager {
    connectors: Vec<Arc<dyn TrackerConnector>>,
    protocols: BTreeMap<String, Arc<dyn Protocol>>,
}

impl ServerManager {
    pub fn new(connectors: Vec<Arc<dyn TrackerConnector>>, protocols: Vec<Arc<dyn Protocol>>) -> Self {
        let protocols = protocols
            .into_iter()
            .map(|protocol| (protocol.name().to_string(), protocol))
            .collect();

        Self {
            connectors,
            protocols,
        }
    }

    /// No connectors and no protocols
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Start every connector
    ///
    /// A connector that fails to start is logged and skipped; the others
    /// still start. Returns how many started.
    pub fn start(&self) -> usize {
        let mut started = 0;

        for connector in &self.connectors {
            match connector.start() {
                Ok(()) => {
                    tracing::info!(connector = connector.name(), "Connector started");
                    started += 1;
                }
                Err(error) => {
                    tracing::warn!(connector = connector.name(), %error, "Connector failed to start");
                }
            }
        }

        tracing::info!(started, total = self.connectors.len(), "Server started");
        started
    }

    /// Stop every connector
    pub fn stop(&self) {
        for connector in &self.connectors {
            connector.stop();
            tracing::debug!(connector = connector.name(), "Connector stopped");
        }
    }

    pub fn protocol(&self, name: &str) -> Option<Arc<dyn Protocol>> {
        self.protocols.get(name).cloned()
    }

    /// Registered protocol names, sorted
    pub fn protocol_names(&self) -> Vec<&str> {
        self.protocols.keys().map(String::as_str).collect()
    }

    pub fn connector_count(&self) -> usize {
        self.connectors.len()
    }
}

impl std::fmt::Debug for ServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerManager")
            .field("connectors", &self.connectors.len())
            .field("protocols", &self.protocol_names())
            .finish()
    }
}
