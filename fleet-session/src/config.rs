//! Session core configuration

use std::time::Duration;

use fleet_broadcast::NodeId;

use crate::error::{Result, SessionError};

/// Configuration for the session core
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Inactivity after which an online device is demoted to idle
    /// Default: 5 minutes
    pub idle_timeout: Duration,

    /// How often the inactivity monitor looks for devices to demote
    /// Default: 30 seconds
    pub sweep_interval: Duration,

    /// How often listeners receive a keepalive
    /// Default: 30 seconds
    pub keepalive_interval: Duration,

    /// Identity of this node on the broadcast channel
    /// Default: None (a random id is generated)
    pub node_id: Option<NodeId>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(30),
            node_id: None,
        }
    }
}

impl SessionConfig {
    /// Create a new SessionConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Short timers, for tests and demos
    pub fn fast() -> Self {
        Self {
            idle_timeout: Duration::from_secs(2),
            sweep_interval: Duration::from_millis(100),
            keepalive_interval: Duration::from_millis(100),
            ..Default::default()
        }
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout == Duration::ZERO {
            return Err(SessionError::Configuration(
                "Idle timeout must be greater than 0".to_string(),
            ));
        }

        if self.sweep_interval == Duration::ZERO {
            return Err(SessionError::Configuration(
                "Sweep interval must be greater than 0".to_string(),
            ));
        }

        if self.keepalive_interval == Duration::ZERO {
            return Err(SessionError::Configuration(
                "Keepalive interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert!(config.node_id.is_none());
        assert!(config.validate().is_ok());
        assert!(SessionConfig::fast().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let invalid = SessionConfig::new().with_idle_timeout(Duration::ZERO);
        assert!(matches!(invalid.validate(), Err(SessionError::Configuration(_))));

        let invalid = SessionConfig::new().with_sweep_interval(Duration::ZERO);
        assert!(invalid.validate().is_err());

        let invalid = SessionConfig::new().with_keepalive_interval(Duration::ZERO);
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let node = NodeId::random();
        let config = SessionConfig::new()
            .with_idle_timeout(Duration::from_secs(60))
            .with_node_id(node);

        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.node_id, Some(node));
    }
}
