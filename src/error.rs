use thiserror::Error;

/// Failures surfaced by a conversation attempt.
///
/// None of these are retried by the session; every variant leaves the
/// session in a restartable state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The credential endpoint failed or returned a body without a session URL
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// The WebSocket could not be opened
    #[error("failed to open connection: {0}")]
    TransportOpenFailure(String),

    /// The WebSocket failed after it was opened
    #[error("connection error: {0}")]
    TransportRuntimeError(String),

    /// The capture device could not be acquired or started
    #[error("microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    /// A single inbound audio frame could not be decoded or played
    #[error("playback decode error: {0}")]
    PlaybackDecodeError(String),

    /// A start was requested while another attempt is still in flight
    #[error("a conversation attempt is already in progress")]
    AttemptInProgress,

    /// The session driver task is no longer running
    #[error("session driver has shut down")]
    SessionEnded,
}
