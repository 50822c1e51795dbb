//! Session lifecycle state machine
//!
//! ```text
//! Disconnected --connect--> Connecting --ack--> Ready --shutdown--> Draining --released--> Closed
//!       |                        |
//!       +------shutdown----------+--failed/shutdown--------------------------------------> Closed
//! ```
//!
//! Transitions are a pure function of the current state and an event, so the
//! controller and its tests agree on exactly which moves are legal.

use std::fmt;

/// Externally observable session states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Configured, nothing sent to the broker yet
    #[default]
    Disconnected,
    /// Connect requested, waiting for the broker acknowledgment
    Connecting,
    /// Connected; subscribe and publish are allowed
    Ready,
    /// Shutdown in progress; releasing subscriptions and the connection
    Draining,
    /// Terminal; every resource has been released
    Closed,
}

impl SessionState {
    /// Whether subscribe, publish and unsubscribe may be issued
    pub fn accepts_operations(self) -> bool {
        matches!(self, SessionState::Ready)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Draining => "draining",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Events that drive state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectRequested,
    ConnectAcknowledged,
    ConnectFailed,
    ShutdownRequested,
    Released,
}

/// Next state for `event` in `state`, or `None` if the move is illegal
pub fn transition(state: SessionState, event: SessionEvent) -> Option<SessionState> {
    use SessionEvent::*;
    use SessionState::*;

    match (state, event) {
        (Disconnected, ConnectRequested) => Some(Connecting),
        (Connecting, ConnectAcknowledged) => Some(Ready),
        (Connecting, ConnectFailed) => Some(Closed),
        (Ready, ShutdownRequested) => Some(Draining),
        (Draining, Released) => Some(Closed),
        // No session was established: nothing to release
        (Disconnected | Connecting, ShutdownRequested) => Some(Closed),
        _ => None,
    }
}
