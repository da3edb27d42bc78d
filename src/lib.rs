pub mod audio;
pub mod config;
pub mod credential;
pub mod error;
pub mod http;
pub mod protocol;
pub mod session;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioEncoding, AudioFile, AudioFrame,
    AudioSource, ChannelBackend, PlaybackOutput, Waveform,
};
pub use config::Config;
pub use credential::{CredentialFetcher, HttpCredentialFetcher, SessionCredential, StaticCredential};
pub use error::SessionError;
pub use http::{create_router, AppState};
pub use protocol::{InboundEnvelope, StartMessage};
pub use session::{
    ConversationHandle, ConversationSession, SessionConfig, SessionState, SessionStats,
    SessionStatus,
};
