//! Reconnect state machine.
//!
//! Pure transitions only; [`crate::client`] owns the sockets and timers and
//! feeds events in.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──open──▶ Connected
//!  ▲                    │                    │
//!  │ clean close        │ unclean close      │ unclean close
//!  │                    ▼                    ▼
//!  └────────────── Reconnecting ◀────────────┘
//!                       │ attempts exhausted
//!                       ▼
//!                    GivenUp
//! ```

use std::time::Duration;

use beacon_core::constants::{DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_INTERVAL};
use serde::Serialize;

/// Terminal error recorded when reconnection is abandoned.
pub const GIVE_UP_ERROR: &str = "maximum reconnect attempts exceeded";

/// Connection phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No connection and none pending.
    #[default]
    Idle,
    /// A handshake is in flight.
    Connecting,
    /// The socket is open.
    Connected,
    /// Waiting for the retry timer.
    Reconnecting,
    /// Reconnect attempts exhausted.
    GivenUp,
}

/// Retry limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts allowed after an unclean close.
    pub max_attempts: u32,
    /// Fixed delay before each attempt.
    pub interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// What the driver must do after a close.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Nothing to do; the machine is idle.
    Idle,
    /// Schedule one connect attempt after the delay.
    ReconnectAfter(Duration),
    /// Attempts exhausted.
    GaveUp,
    /// The close did not belong to a live connection.
    Ignored,
}

/// Client session state.
#[derive(Clone, Debug, Default)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    phase: Phase,
    attempts: u32,
    last_error: Option<String>,
}

impl ReconnectMachine {
    /// Create an idle machine.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Reconnect attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Most recent error, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Retry limits in force.
    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    /// Whether a handshake is in flight.
    pub fn is_connecting(&self) -> bool {
        self.phase == Phase::Connecting
    }

    /// Start a connection attempt. Returns `false` (no-op) when one is
    /// already in flight or established.
    pub fn begin_connect(&mut self) -> bool {
        if matches!(self.phase, Phase::Connecting | Phase::Connected) {
            return false;
        }
        self.phase = Phase::Connecting;
        self.last_error = None;
        true
    }

    /// The handshake completed.
    pub fn on_open(&mut self) {
        self.phase = Phase::Connected;
        self.attempts = 0;
        self.last_error = None;
    }

    /// The socket closed or the handshake failed.
    ///
    /// `clean` means close code 1000. A failed handshake is unclean.
    pub fn on_close(&mut self, clean: bool) -> CloseOutcome {
        if !matches!(self.phase, Phase::Connecting | Phase::Connected) {
            return CloseOutcome::Ignored;
        }
        if clean {
            self.phase = Phase::Idle;
            return CloseOutcome::Idle;
        }
        if self.attempts < self.policy.max_attempts {
            self.attempts += 1;
            self.phase = Phase::Reconnecting;
            CloseOutcome::ReconnectAfter(self.policy.interval)
        } else {
            self.phase = Phase::GivenUp;
            self.last_error = Some(GIVE_UP_ERROR.to_string());
            CloseOutcome::GaveUp
        }
    }

    /// Record an error. Does not change phase.
    pub fn on_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Deliberate disconnect: back to idle with a fresh attempt budget.
    pub fn disconnect(&mut self) {
        self.phase = Phase::Idle;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn machine(max_attempts: u32) -> ReconnectMachine {
        ReconnectMachine::new(ReconnectPolicy {
            max_attempts,
            interval: Duration::from_millis(100),
        })
    }

    #[test]
    fn starts_idle() {
        let m = ReconnectMachine::default();
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.attempts(), 0);
        assert!(m.last_error().is_none());
        assert_eq!(m.policy().max_attempts, 5);
    }

    #[test]
    fn connect_is_guarded() {
        let mut m = machine(3);
        assert!(m.begin_connect());
        assert!(m.is_connecting());
        assert!(!m.begin_connect());
        m.on_open();
        assert!(m.is_connected());
        assert!(!m.begin_connect());
    }

    #[test]
    fn begin_connect_clears_error() {
        let mut m = machine(3);
        m.on_error("boom");
        assert!(m.begin_connect());
        assert!(m.last_error().is_none());
    }

    #[test]
    fn clean_close_goes_idle() {
        let mut m = machine(3);
        let _ = m.begin_connect();
        m.on_open();
        assert_eq!(m.on_close(true), CloseOutcome::Idle);
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.attempts(), 0);
    }

    #[test]
    fn three_attempts_then_give_up() {
        let mut m = machine(3);
        let _ = m.begin_connect();
        m.on_open();

        for attempt in 1..=3 {
            assert_matches!(m.on_close(false), CloseOutcome::ReconnectAfter(d) if d == Duration::from_millis(100));
            assert_eq!(m.phase(), Phase::Reconnecting);
            assert_eq!(m.attempts(), attempt);
            assert!(m.begin_connect());
        }

        assert_eq!(m.on_close(false), CloseOutcome::GaveUp);
        assert_eq!(m.phase(), Phase::GivenUp);
        assert_eq!(m.attempts(), 3);
        assert_eq!(m.last_error(), Some(GIVE_UP_ERROR));
    }

    #[test]
    fn open_resets_attempts() {
        let mut m = machine(3);
        let _ = m.begin_connect();
        let _ = m.on_close(false);
        let _ = m.begin_connect();
        let _ = m.on_close(false);
        assert_eq!(m.attempts(), 2);
        let _ = m.begin_connect();
        m.on_open();
        assert_eq!(m.attempts(), 0);
    }

    #[test]
    fn zero_budget_gives_up_immediately() {
        let mut m = machine(0);
        let _ = m.begin_connect();
        assert_eq!(m.on_close(false), CloseOutcome::GaveUp);
    }

    #[test]
    fn disconnect_resets_and_ignores_late_close() {
        let mut m = machine(3);
        let _ = m.begin_connect();
        let _ = m.on_close(false);
        m.disconnect();
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.attempts(), 0);
        assert_eq!(m.on_close(false), CloseOutcome::Ignored);
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn error_keeps_phase() {
        let mut m = machine(3);
        let _ = m.begin_connect();
        m.on_open();
        m.on_error("send failed");
        assert!(m.is_connected());
        assert_eq!(m.last_error(), Some("send failed"));
    }

    #[test]
    fn given_up_can_be_restarted_manually() {
        let mut m = machine(0);
        let _ = m.begin_connect();
        let _ = m.on_close(false);
        assert!(m.begin_connect());
        assert!(m.last_error().is_none());
        m.on_open();
        assert!(m.is_connected());
    }
}
