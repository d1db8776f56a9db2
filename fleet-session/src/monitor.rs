//! Background threads driving the dispatcher
//!
//! - [`InactivityMonitor`]: periodic idle demotion and listener keepalive
//! - [`spawn_broadcast_pump`]: feeds envelopes from other nodes into the
//!   dispatcher

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use fleet_broadcast::Subscription;

use crate::config::SessionConfig;
use crate::dispatcher::UpdateDispatcher;

/// Commands sent to the monitor thread
#[derive(Debug)]
enum Command {
    /// Run a sweep now, outside the schedule
    Sweep,
    /// Stop the thread
    Shutdown,
}

/// Periodic inactivity sweep and keepalive
///
/// Every `sweep_interval` online devices silent for `idle_timeout` are
/// demoted to idle; every `keepalive_interval` all listeners are pinged.
/// Stopped by [`InactivityMonitor::shutdown`] or on drop.
#[derive(Debug)]
pub struct InactivityMonitor {
    command_tx: mpsc::Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl InactivityMonitor {
    /// Start the monitor thread for `dispatcher`
    pub fn spawn(dispatcher: Arc<UpdateDispatcher>, config: &SessionConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel();
        let sweep_interval = config.sweep_interval;
        let keepalive_interval = config.keepalive_interval;

        let worker = thread::Builder::new()
            .name("fleet-inactivity".to_string())
            .spawn(move || run_monitor(dispatcher, command_rx, sweep_interval, keepalive_interval));

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Failed to spawn inactivity monitor: {}", e);
                None
            }
        };

        Self { command_tx, worker }
    }

    /// Request an immediate sweep
    pub fn sweep_now(&self) {
        let _ = self.command_tx.send(Command::Sweep);
    }

    /// Whether the monitor thread is still running
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the monitor and wait for its thread to exit
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.command_tx.send(Command::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("Inactivity monitor thread panicked");
            }
        }
    }
}

impl Drop for InactivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_monitor(
    dispatcher: Arc<UpdateDispatcher>,
    command_rx: mpsc::Receiver<Command>,
    sweep_interval: Duration,
    keepalive_interval: Duration,
) {
    tracing::debug!(?sweep_interval, ?keepalive_interval, "Inactivity monitor started");

    let mut next_sweep = Instant::now() + sweep_interval;
    let mut next_keepalive = Instant::now() + keepalive_interval;

    loop {
        let wait = next_sweep
            .min(next_keepalive)
            .saturating_duration_since(Instant::now());

        match command_rx.recv_timeout(wait) {
            Ok(Command::Sweep) => {
                dispatcher.sweep_inactive(Utc::now());
            }
            Ok(Command::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        if now >= next_sweep {
            dispatcher.sweep_inactive(Utc::now());
            next_sweep = now + sweep_interval;
        }
        if now >= next_keepalive {
            dispatcher.keepalive();
            next_keepalive = now + keepalive_interval;
        }
    }

    tracing::debug!("Inactivity monitor stopped");
}

/// Feed envelopes from other nodes into the dispatcher
///
/// Runs until every sender of the subscription is gone. Failures to apply an
/// envelope are logged and the pump keeps going.
pub fn spawn_broadcast_pump(dispatcher: Arc<UpdateDispatcher>, subscription: Subscription) -> JoinHandle<()> {
    thread::spawn(move || {
        tracing::debug!(node_id = %dispatcher.node_id(), "Broadcast pump started");

        for envelope in subscription {
            let device_id = envelope.message.device_id();
            if let Err(error) = dispatcher.handle_broadcast(envelope) {
                tracing::warn!(%device_id, %error, "Failed to apply remote update");
            }
        }

        tracing::debug!(node_id = %dispatcher.node_id(), "Broadcast pump stopped");
    })
}
