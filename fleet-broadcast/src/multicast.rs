//! UDP multicast transport
//!
//! One JSON-encoded [`Envelope`] per datagram, sent to a multicast group
//! every node of the cluster has joined. Loopback is on so the publishing
//! node sees its own envelopes, like every other transport.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{BroadcastError, Result};
use crate::hub::Subscription;
use crate::message::Envelope;
use crate::BroadcastService;

const MAX_DATAGRAM: usize = 65_507;

/// Configuration for the multicast transport
#[derive(Debug, Clone)]
pub struct MulticastConfig {
    /// Multicast group address
    /// Default: 239.0.0.7
    pub group: Ipv4Addr,

    /// UDP port shared by the cluster
    /// Default: 5017
    pub port: u16,

    /// Local interface used to join the group
    /// Default: 0.0.0.0 (let the OS pick)
    pub interface: Ipv4Addr,

    /// How long the receiver thread blocks before re-checking for shutdown
    /// Default: 500 ms
    pub read_timeout: Duration,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(239, 0, 0, 7),
            port: 5017,
            interface: Ipv4Addr::UNSPECIFIED,
            read_timeout: Duration::from_millis(500),
        }
    }
}

impl MulticastConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: Ipv4Addr, port: u16) -> Self {
        self.group = group;
        self.port = port;
        self
    }

    pub fn with_interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = interface;
        self
    }

    /// Validate the configuration and return any issues
    pub fn validate(&self) -> Result<()> {
        if !self.group.is_multicast() {
            return Err(BroadcastError::Configuration(format!(
                "{} is not a multicast address",
                self.group
            )));
        }
        if self.port == 0 {
            return Err(BroadcastError::Configuration(
                "Multicast port must be greater than 0".to_string(),
            ));
        }
        if self.read_timeout == Duration::ZERO {
            return Err(BroadcastError::Configuration(
                "Read timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    fn target(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.group, self.port)
    }
}

/// Multicast broadcast service
pub struct MulticastBroadcast {
    socket: UdpSocket,
    config: MulticastConfig,
    /// Set on drop; receiver threads check it after every read timeout
    closed: Arc<AtomicBool>,
}

impl MulticastBroadcast {
    /// Bind the cluster port and join the multicast group
    pub fn bind(config: MulticastConfig) -> Result<Self> {
        config.validate()?;

        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port))?;
        socket.join_multicast_v4(&config.group, &config.interface)?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_read_timeout(Some(config.read_timeout))?;

        tracing::info!(group = %config.group, port = config.port, "Joined broadcast multicast group");
        Ok(Self {
            socket,
            config,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &MulticastConfig {
        &self.config
    }

    /// Start a receiver thread feeding decoded envelopes into a [`Subscription`]
    ///
    /// The thread exits once the subscription is dropped or this service is
    /// dropped. Undecodable datagrams are logged and skipped.
    pub fn subscribe(&self) -> Result<(Subscription, JoinHandle<()>)> {
        let socket = self.socket.try_clone()?;
        let closed = Arc::clone(&self.closed);
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let mut buffer = vec![0u8; MAX_DATAGRAM];
            while !closed.load(Ordering::Acquire) {
                match socket.recv_from(&mut buffer) {
                    Ok((size, from)) => match Envelope::from_bytes(&buffer[..size]) {
                        Ok(envelope) => {
                            if tx.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(%from, error = %e, "Dropping undecodable broadcast datagram");
                        }
                    },
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Broadcast receiver socket failed");
                        break;
                    }
                }
            }
            tracing::debug!("Broadcast multicast receiver stopped");
        });

        Ok((Subscription::new(rx), handle))
    }
}

impl BroadcastService for MulticastBroadcast {
    fn publish(&self, envelope: &Envelope) -> Result<()> {
        let bytes = envelope.to_bytes()?;
        if bytes.len() > MAX_DATAGRAM {
            return Err(BroadcastError::Configuration(format!(
                "Envelope of {} bytes exceeds datagram limit",
                bytes.len()
            )));
        }
        self.socket.send_to(&bytes, self.config.target())?;
        Ok(())
    }
}

impl Drop for MulticastBroadcast {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for MulticastBroadcast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MulticastBroadcast")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_target() {
        assert_eq!(MulticastConfig::default().target().to_string(), "239.0.0.7:5017");
    }

    #[rstest]
    #[case::default(MulticastConfig::default(), true)]
    #[case::other_group(MulticastConfig::new().with_group(Ipv4Addr::new(239, 1, 2, 3), 6000), true)]
    #[case::explicit_interface(MulticastConfig::new().with_interface(Ipv4Addr::new(10, 0, 0, 5)), true)]
    #[case::unicast_group(MulticastConfig::new().with_group(Ipv4Addr::new(10, 0, 0, 1), 5017), false)]
    #[case::broadcast_group(MulticastConfig::new().with_group(Ipv4Addr::BROADCAST, 5017), false)]
    #[case::zero_port(MulticastConfig::new().with_group(Ipv4Addr::new(239, 1, 2, 3), 0), false)]
    #[case::zero_read_timeout(MulticastConfig { read_timeout: Duration::ZERO, ..MulticastConfig::default() }, false)]
    fn test_validate(#[case] config: MulticastConfig, #[case] valid: bool) {
        match config.validate() {
            Ok(()) => assert!(valid, "{:?} should be rejected", config),
            Err(BroadcastError::Configuration(message)) => {
                assert!(!valid, "{:?} rejected: {}", config, message)
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
}
