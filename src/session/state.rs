use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one conversation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Requesting,
    Connecting,
    AwaitingReady,
    Active,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    /// Whether a new attempt may start from here (the start control is enabled)
    pub fn can_start(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Closed | SessionState::Failed
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    /// Legal transitions of the attempt state machine
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle | Closed | Failed, Requesting) => true,
            (Requesting, Connecting) => true,
            (Connecting, AwaitingReady) => true,
            (AwaitingReady, Active) => true,
            (Requesting | Connecting | AwaitingReady | Active, Closing) => true,
            (Closing, Closed) => true,
            (from, Failed) => !from.is_terminal() && from != Idle,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Requesting => "requesting",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingReady => "awaiting_ready",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State plus the human-readable line shown next to the start control
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub message: String,
}

impl SessionStatus {
    pub fn new(state: SessionState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }

    pub fn idle() -> Self {
        Self::new(SessionState::Idle, "Status: Idle")
    }

    pub fn start_enabled(&self) -> bool {
        self.state.can_start()
    }
}
