//! Device lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a polled ccTalk device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    /// Initial state; the device has not been probed, or was shut down.
    /// Entering this state stops the poll timer.
    #[default]
    ShutDown,

    /// The device failed the alive check while initializing, or was soft
    /// reset. It is polled with `SimplePoll` until it answers, then
    /// initialized.
    UninitializedDown,

    /// The device answered the alive check and self-identification,
    /// identifiers and operating modes were set up. Entering this state
    /// starts the poll timer.
    Initialized,

    /// Initialization failed after a successful alive check. Terminal: the
    /// poll timer is stopped and the device cannot be used.
    InitializationFailed,

    /// Master inhibit cleared; the event window is polled and credits are
    /// forwarded to the host.
    NormalAccepting,

    /// Master inhibit set; the event window is still polled so faults and
    /// external resets are noticed.
    NormalRejecting,

    /// A fault was detected; the fault code is polled until it clears, then
    /// the device returns to `NormalRejecting`.
    DiagnosticsPolling,

    /// The link was lost during normal operation. The device is NOT reset
    /// (the event log still holds unprocessed credits); it is
    /// re-initialized instead.
    UnexpectedDown,

    /// The event counter dropped to zero after being non-zero: the device
    /// was reset externally, with possible loss of credit. Re-initialized
    /// on the next tick.
    ExternalReset,
}

impl DeviceState {
    /// True for the states in which the device converses normally and the
    /// short polling interval applies.
    pub fn is_working(self) -> bool {
        matches!(
            self,
            DeviceState::Initialized
                | DeviceState::NormalAccepting
                | DeviceState::NormalRejecting
                | DeviceState::DiagnosticsPolling
        )
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::ShutDown => "ShutDown",
            DeviceState::UninitializedDown => "UninitializedDown",
            DeviceState::Initialized => "Initialized",
            DeviceState::InitializationFailed => "InitializationFailed",
            DeviceState::NormalAccepting => "NormalAccepting",
            DeviceState::NormalRejecting => "NormalRejecting",
            DeviceState::DiagnosticsPolling => "DiagnosticsPolling",
            DeviceState::UnexpectedDown => "UnexpectedDown",
            DeviceState::ExternalReset => "ExternalReset",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_states() {
        assert!(DeviceState::NormalAccepting.is_working());
        assert!(DeviceState::DiagnosticsPolling.is_working());
        assert!(!DeviceState::ShutDown.is_working());
        assert!(!DeviceState::UnexpectedDown.is_working());
        assert!(!DeviceState::InitializationFailed.is_working());
    }
}
