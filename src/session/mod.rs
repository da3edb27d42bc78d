//! Conversation session management
//!
//! This module provides the `ConversationSession` state machine that manages:
//! - Credential fetch and agent connection sequencing
//! - The readiness gate between the start message and outbound audio
//! - Capture (encode + send) and playback (decode + render) pipelines
//! - Session status, statistics and teardown

mod capture;
mod config;
mod gate;
mod session;
mod state;
mod stats;

pub use config::SessionConfig;
pub use gate::ReadinessGate;
pub use session::{ConversationHandle, ConversationSession};
pub use state::{SessionState, SessionStatus};
pub use stats::{AgentUtterance, SessionStats, Speaker};
