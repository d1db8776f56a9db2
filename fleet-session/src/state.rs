//! Device status state machine
//!
//! ```text
//! unknown ──► connecting ──► authenticating ──► online ◄──► idle
//!                 ▲  │              │             │
//!                 │  ▼              ▼             │
//!                 └─ error ◄────────┘             │
//!                 ▲                               │
//!                 └───────────────────────────────┘
//!
//!        any ──► offline ──► connecting
//! ```
//!
//! The machine is permissive: a requested status is always applied and an
//! unexpected edge is only recorded. Protocol decoders know things the core
//! does not, and a dropped status would leave listeners with a stale view.

use std::time::Duration;

use chrono::{DateTime, Utc};
use fleet_model::{Device, DeviceStatus};

/// Result of applying a status to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: DeviceStatus,
    pub to: DeviceStatus,
    pub at: DateTime<Utc>,
    /// Whether the edge is part of the diagram
    pub intended: bool,
}

impl Transition {
    /// Status actually changed, as opposed to a same-status refresh
    pub fn is_change(&self) -> bool {
        self.from != self.to
    }
}

/// Status transitions and timing-based demotion
#[derive(Debug, Clone)]
pub struct StateMachine {
    idle_timeout: Duration,
}

impl StateMachine {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Whether `from -> to` is a diagram edge
    ///
    /// Same-status transitions are refreshes and count as intended.
    pub fn is_intended(from: DeviceStatus, to: DeviceStatus) -> bool {
        use DeviceStatus::*;

        if from == to {
            return true;
        }

        matches!(
            (from, to),
            (_, Offline)
                | (Unknown, Connecting)
                | (Connecting, Authenticating)
                | (Connecting, Error)
                | (Authenticating, Online)
                | (Authenticating, Error)
                | (Online, Idle)
                | (Idle, Online)
                | (Online, Connecting)
                | (Error, Connecting)
                | (Offline, Connecting)
        )
    }

    /// Apply `status` observed at `at` to a device
    pub fn apply(&self, device: &mut Device, status: DeviceStatus, at: DateTime<Utc>) -> Transition {
        let from = device.status;
        let intended = Self::is_intended(from, status);

        if !intended {
            tracing::debug!(
                device_id = %device.id,
                %from,
                to = %status,
                "Unexpected status transition applied"
            );
        }

        device.status = status;
        device.last_update = Some(at);

        Transition {
            from,
            to: status,
            at,
            intended,
        }
    }

    /// Status a device should be demoted to at `now`, if any
    ///
    /// An online device with no activity for the idle timeout becomes idle.
    /// Activity is the later of the session's last activity and the
    /// device's own last update.
    pub fn demotion(
        &self,
        device: &Device,
        last_activity: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DeviceStatus> {
        if device.status != DeviceStatus::Online {
            return None;
        }

        let last = match (last_activity, device.last_update) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => return None,
        };

        // Negative elapsed time (clock skew) never demotes
        let elapsed = (now - last).to_std().ok()?;
        (elapsed >= self.idle_timeout).then_some(DeviceStatus::Idle)
    }
}
