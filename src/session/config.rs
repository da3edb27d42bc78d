use serde::{Deserialize, Serialize};

use crate::audio::{AudioBackendConfig, AudioEncoding};
use crate::config::Config;
use crate::protocol::StartMessage;

/// Configuration for a conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Agent to talk to
    pub agent_id: String,

    /// Conversation language tag (e.g. "en")
    pub language: String,

    /// Negotiated sample rate for both directions
    pub sample_rate: u32,

    pub voice_id: Option<String>,

    pub model_id: Option<String>,

    /// Wire encoding for outbound and inbound audio
    pub encoding: AudioEncoding,

    /// Duration of one outbound frame
    pub frame_duration_ms: u64,

    /// Peak magnitude at or below which a frame counts as silence (0 disables)
    pub silence_threshold: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            language: "en".to_string(),
            sample_rate: 16000,
            voice_id: None,
            model_id: None,
            encoding: AudioEncoding::Pcm,
            frame_duration_ms: 250,
            silence_threshold: 0.01,
        }
    }
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            agent_id: config.agent.agent_id.clone(),
            language: config.agent.language.clone(),
            sample_rate: config.agent.sample_rate,
            voice_id: config.agent.voice_id.clone(),
            model_id: config.agent.model_id.clone(),
            encoding: config.audio.encoding,
            frame_duration_ms: config.audio.frame_duration_ms,
            silence_threshold: config.audio.silence_threshold,
        }
    }

    /// Capture settings: one device buffer per outbound frame
    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            buffer_duration_ms: self.frame_duration_ms,
            ..AudioBackendConfig::default()
        }
    }

    /// The first message sent on every new connection
    pub fn start_message(&self) -> StartMessage {
        StartMessage {
            voice_id: self.voice_id.clone(),
            model_id: self.model_id.clone(),
            ..StartMessage::new(&self.agent_id, &self.language, self.sample_rate)
        }
    }
}
