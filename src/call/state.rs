use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    Idle,
    Connecting,
    AwaitingChannel,
    Negotiating,
    Connected,
    Reconnecting,
    Closed,
    Failed,
}

impl CallState {
    pub const ALL: [CallState; 8] = [
        CallState::Idle,
        CallState::Connecting,
        CallState::AwaitingChannel,
        CallState::Negotiating,
        CallState::Connected,
        CallState::Reconnecting,
        CallState::Closed,
        CallState::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Closed | CallState::Failed)
    }

    /// Neither idle nor terminal: a `start()` here is a no-op.
    pub fn is_active(&self) -> bool {
        !matches!(self, CallState::Idle) && !self.is_terminal()
    }

    /// Whether the transition table allows `self -> to`.
    ///
    /// Every active state may close or fail. A self-transition is always allowed.
    pub fn can_transition(&self, to: CallState) -> bool {
        use CallState::*;

        if *self == to {
            return true;
        }
        if self.is_active() && matches!(to, Closed | Failed) {
            return true;
        }
        matches!(
            (*self, to),
            (Idle, Connecting)
                | (Connecting, AwaitingChannel)
                | (AwaitingChannel, Negotiating)
                | (Negotiating, Connected)
                | (Negotiating, Reconnecting)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
                | (Closed, Idle)
                | (Failed, Idle)
        )
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
